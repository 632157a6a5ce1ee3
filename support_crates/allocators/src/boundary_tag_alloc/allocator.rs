use crate::boundary_tag_alloc::tags::BlockTag;
use crate::diagnostics::Diagnostics;
use crate::global_heap::GLOBAL_HEAP;
use crate::{AllocError, Allocator};
use alloc::vec::Vec;
use core::fmt::{self, Debug, Display, Formatter};
use core::ptr::NonNull;
use core::slice;
use ksync::{SpinLock, WouldBlock};
use log::{Level, Log};

const TYPENAME: &str = "BoundaryTagAllocator";

/// The policy used to choose among the gaps that are large enough for a new block.
///
/// Ties are always resolved in favor of the gap with the lowest address.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum FitMode {
    /// Use the first gap that is large enough.
    #[default]
    FirstFit,
    /// Use the gap that leaves the least memory unused.
    BestFit,
    /// Use the gap that leaves the most memory unused.
    WorstFit,
}

/// One span of the arena as reported by [`BoundaryTagAllocator::get_blocks_info`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockInfo {
    /// Size of the span in bytes.
    /// For occupied spans this includes the block's tag.
    pub size: usize,
    pub is_occupied: bool,
}

impl BlockInfo {
    pub const fn free(size: usize) -> Self {
        Self {
            size,
            is_occupied: false,
        }
    }

    pub const fn occupied(size: usize) -> Self {
        Self {
            size,
            is_occupied: true,
        }
    }
}

/// A free span between two occupied blocks (or between a block and an edge of the arena).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Gap {
    start: usize,
    size: usize,
    /// The occupied block in front of the gap
    prev: Option<usize>,
    /// The occupied block behind the gap
    next: Option<usize>,
}

/// The arena bookkeeping which may only be accessed while holding the arena lock.
pub(super) struct Arena {
    /// Start of the arena memory, all block offsets are relative to it
    pub(super) start: NonNull<u8>,
    capacity: usize,
    fit_mode: FitMode,
    available: usize,
    /// The occupied block with the lowest address
    head: Option<usize>,
}

// Safety: The arena exclusively owns the memory behind `start` and is only reachable through its lock.
unsafe impl Send for Arena {}

pub(super) struct BlockIterator<'arena> {
    arena: &'arena Arena,
    next: Option<usize>,
}

impl Iterator for BlockIterator<'_> {
    type Item = (usize, BlockTag);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next?;
        let tag = self.arena.read_tag(offset);
        debug_assert!(
            tag.next.map_or(true, |next| next >= offset + tag.block_size()),
            "occupied blocks are not in address order"
        );
        self.next = tag.next;
        Some((offset, tag))
    }
}

/// Walks all gaps of an arena in address order, including empty ones.
struct GapIterator<'arena> {
    blocks: BlockIterator<'arena>,
    free_start: usize,
    prev: Option<usize>,
    finished: bool,
}

impl Iterator for GapIterator<'_> {
    type Item = Gap;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.blocks.next() {
            Some((offset, tag)) => {
                let gap = Gap {
                    start: self.free_start,
                    size: offset - self.free_start,
                    prev: self.prev,
                    next: Some(offset),
                };
                self.free_start = offset + tag.block_size();
                self.prev = Some(offset);
                Some(gap)
            }
            None => {
                self.finished = true;
                Some(Gap {
                    start: self.free_start,
                    size: self.blocks.arena.capacity - self.free_start,
                    prev: self.prev,
                    next: None,
                })
            }
        }
    }
}

impl Arena {
    fn tag_chunk(&self, offset: usize) -> *mut u8 {
        debug_assert!(
            offset
                .checked_add(BlockTag::TAG_SIZE)
                .map_or(false, |end| end <= self.capacity),
            "block tag at offset {offset} exceeds the arena"
        );
        // Safety: the tag lies within the arena as asserted above
        unsafe { self.start.as_ptr().add(offset) }
    }

    fn read_tag(&self, offset: usize) -> BlockTag {
        // Safety: only tag bytes are touched, which are never handed out, and the arena lock is held
        let chunk = unsafe { slice::from_raw_parts(self.tag_chunk(offset), BlockTag::TAG_SIZE) };
        BlockTag::read_from_chunk(chunk)
    }

    fn write_tag(&mut self, offset: usize, tag: &BlockTag) {
        // Safety: see read_tag()
        let chunk =
            unsafe { slice::from_raw_parts_mut(self.tag_chunk(offset), BlockTag::TAG_SIZE) };
        tag.write_to_chunk(chunk);
    }

    pub(super) fn block_iter(&self) -> BlockIterator<'_> {
        BlockIterator {
            arena: self,
            next: self.head,
        }
    }

    fn gap_iter(&self) -> GapIterator<'_> {
        GapIterator {
            blocks: self.block_iter(),
            free_start: 0,
            prev: None,
            finished: false,
        }
    }

    /// Select a gap that can hold `needed` bytes according to the current fit mode.
    ///
    /// A candidate only replaces the current choice on strict improvement so that the lowest address wins ties.
    fn find_gap(&self, needed: usize) -> Option<Gap> {
        let mut candidates = self.gap_iter().filter(|gap| gap.size >= needed);
        match self.fit_mode {
            FitMode::FirstFit => candidates.next(),
            FitMode::BestFit => candidates.fold(None, |chosen: Option<Gap>, gap| match chosen {
                Some(chosen) if chosen.size <= gap.size => Some(chosen),
                _ => Some(gap),
            }),
            FitMode::WorstFit => candidates.fold(None, |chosen: Option<Gap>, gap| match chosen {
                Some(chosen) if chosen.size >= gap.size => Some(chosen),
                _ => Some(gap),
            }),
        }
    }

    fn largest_gap(&self) -> usize {
        self.gap_iter().map(|gap| gap.size).max().unwrap_or(0)
    }

    /// Place a new block at the start of `gap` and link it between the gap's neighbours.
    fn splice(&mut self, gap: Gap, payload_size: usize) -> usize {
        debug_assert!(BlockTag::TAG_SIZE + payload_size <= gap.size);
        let offset = gap.start;
        self.write_tag(
            offset,
            &BlockTag {
                payload_size,
                prev: gap.prev,
                next: gap.next,
            },
        );

        match gap.prev {
            Some(prev) => {
                let mut prev_tag = self.read_tag(prev);
                prev_tag.next = Some(offset);
                self.write_tag(prev, &prev_tag);
            }
            None => self.head = Some(offset),
        }
        if let Some(next) = gap.next {
            let mut next_tag = self.read_tag(next);
            next_tag.prev = Some(offset);
            self.write_tag(next, &next_tag);
        }

        offset
    }

    /// Unlink the block described by `tag` so that its memory becomes part of the surrounding gaps.
    fn unsplice(&mut self, tag: &BlockTag) {
        match tag.prev {
            Some(prev) => {
                let mut prev_tag = self.read_tag(prev);
                prev_tag.next = tag.next;
                self.write_tag(prev, &prev_tag);
            }
            None => self.head = tag.next,
        }
        if let Some(next) = tag.next {
            let mut next_tag = self.read_tag(next);
            next_tag.prev = tag.prev;
            self.write_tag(next, &next_tag);
        }
    }

    /// Translate a payload pointer into the offset of its tag if the tag would lie inside the arena.
    fn tag_offset_of(&self, ptr: *const u8) -> Option<usize> {
        let offset = (ptr as usize)
            .checked_sub(self.start.as_ptr() as usize)?
            .checked_sub(BlockTag::TAG_SIZE)?;
        (offset + BlockTag::TAG_SIZE <= self.capacity).then_some(offset)
    }

    /// Find the occupied block whose tag starts at `offset`.
    ///
    /// Only tags of occupied blocks are read, so an offset pointing into some payload is never interpreted as a tag.
    fn locate(&self, offset: usize) -> Option<BlockTag> {
        let (_, tag) = self
            .block_iter()
            .take_while(|(block, _)| *block <= offset)
            .find(|(block, _)| *block == offset)?;

        let prev_ok = tag.prev.map_or(true, |prev| prev < offset);
        let next_ok = tag.next.map_or(true, |next| {
            next >= offset + tag.block_size() && next + BlockTag::TAG_SIZE <= self.capacity
        });
        (prev_ok && next_ok).then_some(tag)
    }

    fn payload(&self, offset: usize) -> NonNull<u8> {
        // Safety: the block lies within the arena so its payload starts at most one past the arena end
        unsafe { NonNull::new_unchecked(self.start.as_ptr().add(offset + BlockTag::TAG_SIZE)) }
    }

    fn spans(&self) -> Vec<BlockInfo> {
        let mut spans = Vec::new();
        for gap in self.gap_iter() {
            if gap.size > 0 {
                spans.push(BlockInfo::free(gap.size));
            }
            if let Some(next) = gap.next {
                spans.push(BlockInfo::occupied(self.read_tag(next).block_size()));
            }
        }
        spans
    }
}

/// Renders spans compactly as `occup 40|avail 984`.
struct SpanList<'spans>(&'spans [BlockInfo]);

impl Display for SpanList<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, span) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            let state = if span.is_occupied { "occup" } else { "avail" };
            write!(f, "{} {}", state, span.size)?;
        }
        Ok(())
    }
}

/// A general purpose allocator that attaches boundary tags to handed out memory for bookkeeping.
///
/// The allocator owns a single arena of fixed capacity which it obtains from an upstream [`Allocator`] on
/// construction and returns to it when dropped.
/// All operations lock the arena for their entire duration, so the allocator can be shared between threads.
///
/// Payloads are placed directly behind their tag and are therefore only byte-aligned.
///
/// The allocator cannot be cloned because its blocks are owned by whoever allocated them.
pub struct BoundaryTagAllocator<'a> {
    upstream: &'a dyn Allocator,
    diagnostics: Diagnostics<'a>,
    pub(super) arena: SpinLock<Arena>,
}

impl<'a> BoundaryTagAllocator<'a> {
    /// The smallest capacity an arena can have, which is exactly enough for one empty block.
    pub const MIN_CAPACITY: usize = BlockTag::TAG_SIZE;

    /// Create a new allocator managing an arena of `capacity` bytes.
    ///
    /// The arena is allocated from `upstream` or, if none is given, from the [`GlobalHeap`](crate::GlobalHeap).
    /// Diagnostic messages are sent to `logger` if one is given.
    pub fn new(
        capacity: usize,
        upstream: Option<&'a dyn Allocator>,
        logger: Option<&'a dyn Log>,
        fit_mode: FitMode,
    ) -> Result<Self, AllocError> {
        let diagnostics = Diagnostics::new(TYPENAME, logger);
        diagnostics.trace(format_args!(
            "new(capacity = {}, fit_mode = {:?}) called",
            capacity, fit_mode
        ));

        if capacity < Self::MIN_CAPACITY {
            diagnostics.error(format_args!(
                "new: a capacity of {} bytes cannot hold a block tag of {} bytes",
                capacity,
                BlockTag::TAG_SIZE
            ));
            return Err(AllocError::InvalidConfiguration {
                capacity,
                minimum: Self::MIN_CAPACITY,
            });
        }

        let upstream = upstream.unwrap_or(&GLOBAL_HEAP);
        let start = upstream.allocate(capacity, 1).map_err(|e| {
            diagnostics.error(format_args!("new: could not obtain the arena: {}", e));
            e
        })?;

        diagnostics.trace(format_args!("new: arena placed at {:p}", start));
        Ok(Self {
            upstream,
            diagnostics,
            arena: SpinLock::new(Arena {
                start,
                capacity,
                fit_mode,
                available: capacity,
                head: None,
            }),
        })
    }

    /// Allocate `value_size * count` bytes from the arena.
    ///
    /// The returned pointer is valid for at least the requested number of bytes until it is passed to
    /// [`deallocate`](Self::deallocate).
    /// If the gap that is used would leave a remainder too small to ever hold another block, that remainder is
    /// handed out as part of this allocation.
    pub fn allocate(&self, value_size: usize, count: usize) -> Result<NonNull<u8>, AllocError> {
        self.diagnostics.trace(format_args!(
            "allocate(value_size = {}, count = {}) called",
            value_size, count
        ));

        let needed = value_size
            .checked_mul(count)
            .and_then(|requested| Some((requested, requested.checked_add(BlockTag::TAG_SIZE)?)));
        let Some((requested, needed)) = needed else {
            self.diagnostics.error(format_args!(
                "allocate: {} * {} bytes cannot be represented",
                value_size, count
            ));
            return Err(AllocError::OutOfMemory {
                requested: usize::MAX,
            });
        };

        let mut arena = self.arena.spin_lock();
        let Some(gap) = arena.find_gap(needed) else {
            self.diagnostics.error(format_args!(
                "allocate: no gap can hold {} bytes, the largest one has {} bytes",
                needed,
                arena.largest_gap()
            ));
            return Err(AllocError::OutOfMemory { requested });
        };

        let remainder = gap.size - needed;
        let payload_size = if remainder < BlockTag::TAG_SIZE {
            if remainder > 0 {
                self.diagnostics.warn(format_args!(
                    "allocate: {} bytes requested but {} granted to avoid an unusable remainder",
                    requested,
                    requested + remainder
                ));
            }
            requested + remainder
        } else {
            requested
        };

        let offset = arena.splice(gap, payload_size);
        arena.available -= BlockTag::TAG_SIZE + payload_size;
        let payload = arena.payload(offset);
        self.log_state(&arena);

        self.diagnostics
            .trace(format_args!("allocate: handed out {:p}", payload));
        Ok(payload)
    }

    /// Return a block to the arena.
    ///
    /// Passing a null pointer does nothing.
    /// A pointer that was not handed out by this allocator, or that was already deallocated, is rejected with
    /// [`AllocError::InvalidPointer`] and leaves the arena untouched.
    pub fn deallocate(&self, ptr: *mut u8) -> Result<(), AllocError> {
        self.diagnostics
            .trace(format_args!("deallocate({:p}) called", ptr));
        if ptr.is_null() {
            self.diagnostics
                .trace(format_args!("deallocate: finished, nothing to do for null"));
            return Ok(());
        }

        let invalid = AllocError::InvalidPointer {
            address: ptr as usize,
        };
        let mut arena = self.arena.spin_lock();
        let Some(offset) = arena.tag_offset_of(ptr) else {
            self.diagnostics.error(format_args!(
                "deallocate: {:p} lies outside of the arena",
                ptr
            ));
            return Err(invalid);
        };
        let Some(tag) = arena.locate(offset) else {
            self.diagnostics.error(format_args!(
                "deallocate: {:p} does not belong to an occupied block",
                ptr
            ));
            return Err(invalid);
        };

        arena.unsplice(&tag);
        arena.available += tag.block_size();
        self.log_state(&arena);

        self.diagnostics.trace(format_args!("deallocate: finished"));
        Ok(())
    }

    /// Describe the whole arena as a sequence of free and occupied spans in address order.
    ///
    /// Empty gaps are left out, so two occupied spans are adjacent when their blocks touch.
    /// The sizes of all spans add up to the arena's capacity.
    pub fn get_blocks_info(&self) -> Vec<BlockInfo> {
        self.diagnostics.trace(format_args!("get_blocks_info() called"));
        let spans = self.arena.spin_lock().spans();
        self.diagnostics
            .trace(format_args!("get_blocks_info: found {} spans", spans.len()));
        spans
    }

    /// Change the policy used by subsequent allocations.
    pub fn set_fit_mode(&self, mode: FitMode) {
        self.diagnostics
            .trace(format_args!("set_fit_mode({:?}) called", mode));
        self.arena.spin_lock().fit_mode = mode;
        self.diagnostics.trace(format_args!("set_fit_mode: finished"));
    }

    pub fn fit_mode(&self) -> FitMode {
        self.arena.spin_lock().fit_mode
    }

    /// The total number of bytes the arena provides for blocks and their tags.
    pub fn capacity(&self) -> usize {
        self.arena.spin_lock().capacity
    }

    /// The number of bytes not used by any occupied block or its tag.
    pub fn available(&self) -> usize {
        self.arena.spin_lock().available
    }

    fn log_state(&self, arena: &Arena) {
        if self.diagnostics.enabled(Level::Debug) {
            let spans = arena.spans();
            self.diagnostics.debug(format_args!(
                "available {} of {} bytes, blocks: {}",
                arena.available,
                arena.capacity,
                SpanList(&spans)
            ));
        }
    }
}

impl BoundaryTagAllocator<'static> {
    /// Create a first-fit allocator with an arena from the global heap and no logger.
    pub fn with_capacity(capacity: usize) -> Result<Self, AllocError> {
        Self::new(capacity, None, None, FitMode::default())
    }
}

impl Allocator for BoundaryTagAllocator<'_> {
    fn allocate(&self, value_size: usize, count: usize) -> Result<NonNull<u8>, AllocError> {
        BoundaryTagAllocator::allocate(self, value_size, count)
    }

    unsafe fn deallocate(&self, ptr: *mut u8) -> Result<(), AllocError> {
        BoundaryTagAllocator::deallocate(self, ptr)
    }
}

impl Drop for BoundaryTagAllocator<'_> {
    fn drop(&mut self) {
        self.diagnostics.trace(format_args!("drop() called"));
        let start = self.arena.get_mut().start;
        // Safety: the arena was allocated from this upstream and nothing can reference it after the drop
        if let Err(e) = unsafe { self.upstream.deallocate(start.as_ptr()) } {
            self.diagnostics.error(format_args!(
                "drop: could not return the arena to its upstream allocator: {}",
                e
            ));
        }
        self.diagnostics.trace(format_args!("drop: finished"));
    }
}

impl Debug for BoundaryTagAllocator<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let arena = match self.arena.try_lock() {
            Ok(arena) => arena,
            Err(WouldBlock) => {
                return f
                    .debug_struct(TYPENAME)
                    .field("arena", &"<locked>")
                    .finish()
            }
        };

        let alternate = f.alternate();
        let mut s = f.debug_struct(TYPENAME);
        s.field("capacity", &arena.capacity)
            .field("available", &arena.available)
            .field("fit_mode", &arena.fit_mode);
        if alternate {
            s.field("blocks", &BlockList(&arena.spans()));
        }
        s.finish()
    }
}

/// Renders spans as `[<40 Used>] [<984 Free>]`.
struct BlockList<'spans>(&'spans [BlockInfo]);

impl Debug for BlockList<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, span) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let state = if span.is_occupied { "Used" } else { "Free" };
            write!(f, "[<{} {}>]", span.size, state)?;
        }
        Ok(())
    }
}
