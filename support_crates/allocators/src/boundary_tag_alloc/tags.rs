use core::mem;

const WORD_SIZE: usize = mem::size_of::<usize>();

/// Encodes a missing link inside a tag.
const NIL: usize = usize::MAX;

/// The boundary tag which is placed at the beginning of every occupied block.
///
/// Free memory carries no tag at all.
/// It is whatever lies between the end of one occupied block and the tag of the next one (or the arena edges).
///
/// Links are stored as offsets relative to the start of the arena and always point to the tag of the neighbouring
/// occupied block in address order.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) struct BlockTag {
    /// The number of bytes handed out to the owner of the block
    pub payload_size: usize,
    /// The previous occupied block in address order
    pub prev: Option<usize>,
    /// The next occupied block in address order
    pub next: Option<usize>,
}

impl BlockTag {
    /// How much memory the allocator must reserve in front of a block's payload for storing its tag.
    pub const TAG_SIZE: usize = 3 * WORD_SIZE;

    /// The total number of arena bytes the block occupies.
    pub fn block_size(&self) -> usize {
        Self::TAG_SIZE + self.payload_size
    }

    /// Read the tag from a chunk.
    /// The tag is expected to be located at the first few bytes of the chunk.
    pub fn read_from_chunk(chunk: &[u8]) -> Self {
        assert!(
            chunk.len() >= Self::TAG_SIZE,
            "chunk is not large enough to contain a block tag"
        );

        let word = |i: usize| {
            let mut bytes = [0u8; WORD_SIZE];
            bytes.copy_from_slice(&chunk[i * WORD_SIZE..(i + 1) * WORD_SIZE]);
            usize::from_ne_bytes(bytes)
        };
        let link = |raw: usize| if raw == NIL { None } else { Some(raw) };

        Self {
            payload_size: word(0),
            prev: link(word(1)),
            next: link(word(2)),
        }
    }

    /// Write the tag data into the first few bytes of the chunk.
    pub fn write_to_chunk(&self, chunk: &mut [u8]) {
        let words = [
            self.payload_size,
            self.prev.unwrap_or(NIL),
            self.next.unwrap_or(NIL),
        ];
        for (dst, word) in chunk[..Self::TAG_SIZE]
            .chunks_exact_mut(WORD_SIZE)
            .zip(words)
        {
            dst.copy_from_slice(&word.to_ne_bytes());
        }
    }
}
