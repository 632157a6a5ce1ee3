use crate::diagnostics::Diagnostics;
use crate::{AllocError, Allocator};
use alloc::alloc::{alloc_zeroed, dealloc};
use core::alloc::Layout;
use core::fmt::{self, Display, Formatter};
use core::mem;
use core::ptr::{self, NonNull};
use core::slice;
use log::{Level, Log};

/// Bytes in front of every allocation: an ownership marker followed by the requested size.
const HEADER_SIZE: usize = 2 * mem::size_of::<usize>();

/// Marks a header written by a [`GlobalHeap`]; cleared again on deallocation.
const OWNER_MARKER: usize = 0x6865_6170;

/// The arena source used when no upstream allocator is given.
pub(crate) static GLOBAL_HEAP: GlobalHeap<'static> = GlobalHeap::new(None);

/// An [`Allocator`] that forwards to the global heap of the process.
///
/// Every allocation is prefixed with a small header so that [`deallocate`](Allocator::deallocate) only needs the
/// pointer to release the memory again.
#[derive(Debug)]
pub struct GlobalHeap<'a> {
    diagnostics: Diagnostics<'a>,
}

impl<'a> GlobalHeap<'a> {
    pub const fn new(logger: Option<&'a dyn Log>) -> Self {
        Self {
            diagnostics: Diagnostics::new("GlobalHeap", logger),
        }
    }

    fn layout_for(size: usize) -> Result<Layout, AllocError> {
        size.checked_add(HEADER_SIZE)
            .and_then(|total| Layout::from_size_align(total, HEADER_SIZE).ok())
            .ok_or(AllocError::OutOfMemory { requested: size })
    }
}

impl Allocator for GlobalHeap<'_> {
    fn allocate(&self, value_size: usize, count: usize) -> Result<NonNull<u8>, AllocError> {
        self.diagnostics.trace(format_args!(
            "allocate(value_size = {}, count = {}) called",
            value_size, count
        ));

        let size = value_size
            .checked_mul(count)
            .ok_or(AllocError::OutOfMemory {
                requested: usize::MAX,
            })
            .and_then(|size| Self::layout_for(size).map(|layout| (size, layout)));
        let (size, layout) = match size {
            Ok(v) => v,
            Err(e) => {
                self.diagnostics.error(format_args!(
                    "allocate: {} * {} bytes cannot be represented",
                    value_size, count
                ));
                return Err(e);
            }
        };

        // zeroed because deallocate() may dump every byte of the block
        // Safety: the layout has a non-zero size because it always contains the header
        let base = match NonNull::new(unsafe { alloc_zeroed(layout) }) {
            Some(base) => base,
            None => {
                self.diagnostics.error(format_args!(
                    "allocate: the global heap could not provide {} bytes",
                    layout.size()
                ));
                return Err(AllocError::OutOfMemory { requested: size });
            }
        };

        // Safety: the block is at least HEADER_SIZE bytes long and aligned for usize
        let data = unsafe {
            let header = base.as_ptr().cast::<usize>();
            header.write(OWNER_MARKER);
            header.add(1).write(size);
            NonNull::new_unchecked(base.as_ptr().add(HEADER_SIZE))
        };

        self.diagnostics.trace(format_args!(
            "allocate: handed out {} bytes at {:p}",
            size, data
        ));
        Ok(data)
    }

    unsafe fn deallocate(&self, ptr: *mut u8) -> Result<(), AllocError> {
        self.diagnostics
            .trace(format_args!("deallocate({:p}) called", ptr));
        if ptr.is_null() {
            return Ok(());
        }

        let header = ptr.sub(HEADER_SIZE).cast::<usize>();
        if header.read() != OWNER_MARKER {
            self.diagnostics.error(format_args!(
                "deallocate: tried to deallocate {:p} which is not owned by the global heap",
                ptr
            ));
            return Err(AllocError::InvalidPointer {
                address: ptr as usize,
            });
        }
        let size = header.add(1).read();

        if self.diagnostics.enabled(Level::Debug) {
            self.diagnostics.debug(format_args!(
                "deallocate: released {} bytes{}",
                size,
                HexDump(slice::from_raw_parts(ptr, size))
            ));
        }

        ptr::write(header, 0);
        // the layout was valid when the block was allocated so it is still valid now
        let layout = Layout::from_size_align_unchecked(size + HEADER_SIZE, HEADER_SIZE);
        dealloc(header.cast(), layout);

        self.diagnostics.trace(format_args!("deallocate: finished"));
        Ok(())
    }
}

/// Renders the content of a released block as ` with data: 0x.. 0x..`.
struct HexDump<'data>(&'data [u8]);

impl Display for HexDump<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if !self.0.is_empty() {
            f.write_str(" with data:")?;
        }
        for byte in self.0 {
            write!(f, " {:#04x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use crate::{BoundaryTagAllocator, FitMode};
    use log::LevelFilter;
    use sinklog::SinkLogger;
    use std::string::String;

    #[test]
    fn test_alloc_write_dealloc() {
        let heap = GlobalHeap::new(None);
        let data = heap.allocate(mem::size_of::<u32>(), 4).unwrap();
        assert_eq!(data.as_ptr() as usize % mem::align_of::<usize>(), 0);
        unsafe {
            let values = slice::from_raw_parts_mut(data.as_ptr().cast::<u32>(), 4);
            values.copy_from_slice(&[1, 2, 3, 4]);
            assert_eq!(values, [1, 2, 3, 4]);
            assert_eq!(heap.deallocate(data.as_ptr()), Ok(()));
        }
    }

    #[test]
    fn test_zero_sized_allocations_are_distinct() {
        let heap = GlobalHeap::new(None);
        let a = heap.allocate(0, 10).unwrap();
        let b = heap.allocate(10, 0).unwrap();
        assert_ne!(a, b);
        unsafe {
            heap.deallocate(a.as_ptr()).unwrap();
            heap.deallocate(b.as_ptr()).unwrap();
        }
    }

    #[test]
    fn test_overflowing_request() {
        let heap = GlobalHeap::new(None);
        assert_eq!(
            heap.allocate(usize::MAX, 2),
            Err(AllocError::OutOfMemory {
                requested: usize::MAX
            })
        );
        assert_eq!(
            heap.allocate(usize::MAX, 1),
            Err(AllocError::OutOfMemory {
                requested: usize::MAX
            })
        );
    }

    #[test]
    fn test_null_is_ignored() {
        let heap = GlobalHeap::new(None);
        assert_eq!(unsafe { heap.deallocate(ptr::null_mut()) }, Ok(()));
    }

    #[test]
    fn test_foreign_memory_is_rejected() {
        let logger = SinkLogger::new(String::new(), LevelFilter::Error);
        let heap = GlobalHeap::new(Some(&logger));
        let mut foreign = [0usize; 4];
        let ptr = unsafe { foreign.as_mut_ptr().add(2).cast::<u8>() };

        let result = unsafe { heap.deallocate(ptr) };

        assert_eq!(
            result,
            Err(AllocError::InvalidPointer {
                address: ptr as usize
            })
        );
        assert!(logger.sink().contains("not owned by the global heap"));
    }

    #[test]
    fn test_dealloc_dumps_content() {
        let logger = SinkLogger::new(String::new(), LevelFilter::Debug);
        let heap = GlobalHeap::new(Some(&logger));
        let data = heap.allocate(1, 3).unwrap();
        unsafe {
            slice::from_raw_parts_mut(data.as_ptr(), 3).copy_from_slice(&[0x01, 0xab, 0xff]);
            heap.deallocate(data.as_ptr()).unwrap();
        }
        std::println!("{}", logger.sink().as_str());
        assert!(logger
            .sink()
            .contains("GlobalHeap: deallocate: released 3 bytes with data: 0x01 0xab 0xff"));
    }

    #[test]
    fn test_dump_of_partially_written_arena() {
        let logger = SinkLogger::new(String::new(), LevelFilter::Debug);
        let heap = GlobalHeap::new(Some(&logger));
        let arena = BoundaryTagAllocator::new(64, Some(&heap), None, FitMode::FirstFit).unwrap();
        let block = arena.allocate(8, 1).unwrap();
        unsafe { block.as_ptr().write_bytes(0xee, 8) };
        drop(arena);

        let output = logger.sink().clone();
        std::println!("{}", output);
        assert!(output.contains("GlobalHeap: deallocate: released 64 bytes with data: "));
        assert!(output.contains(" 0xee 0xee 0x00"));
        // the untouched tail of the arena reads as zeroes
        assert!(output.trim_end().ends_with(" 0x00 0x00"));
    }
}
