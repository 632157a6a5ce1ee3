use allocators::{AllocError, Allocator, BlockInfo, BoundaryTagAllocator, FitMode};
use log::LevelFilter;
use sinklog::SinkLogger;

#[test]
fn test_arena_from_parent_arena() {
    let parent = BoundaryTagAllocator::with_capacity(4096).unwrap();
    let child = BoundaryTagAllocator::new(1024, Some(&parent), None, FitMode::FirstFit).unwrap();

    // the child's arena is one block of the parent
    let parent_spans = parent.get_blocks_info();
    assert_eq!(parent_spans.len(), 2);
    assert!(parent_spans[0].is_occupied);
    assert_eq!(parent.available(), 4096 - parent_spans[0].size);
    assert!(parent_spans[0].size > 1024);

    let block = child.allocate(100, 1).unwrap();
    unsafe { block.as_ptr().write_bytes(0xab, 100) };
    assert_eq!(parent.get_blocks_info(), parent_spans);
    child.deallocate(block.as_ptr()).unwrap();

    drop(child);
    assert_eq!(parent.get_blocks_info(), [BlockInfo::free(4096)]);
}

#[test]
fn test_child_larger_than_parent() {
    let parent = BoundaryTagAllocator::with_capacity(512).unwrap();
    let result = BoundaryTagAllocator::new(512, Some(&parent), None, FitMode::FirstFit);
    assert_eq!(
        result.err(),
        Some(AllocError::OutOfMemory { requested: 512 })
    );
    assert_eq!(parent.get_blocks_info(), [BlockInfo::free(512)]);
}

#[test]
fn test_allocator_trait_object() {
    let logger = SinkLogger::new(String::new(), LevelFilter::Error);
    let arena = BoundaryTagAllocator::new(256, None, Some(&logger), FitMode::WorstFit).unwrap();
    let dynamic: &dyn Allocator = &arena;

    let block = dynamic.allocate(4, 8).unwrap();
    unsafe {
        dynamic.deallocate(block.as_ptr()).unwrap();
        assert_eq!(
            dynamic.deallocate(block.as_ptr()),
            Err(AllocError::InvalidPointer {
                address: block.as_ptr() as usize
            })
        );
    }
    assert!(logger
        .sink()
        .contains("BoundaryTagAllocator: deallocate: "));
}

#[test]
fn test_siblings_share_parent() {
    let parent = BoundaryTagAllocator::new(2048, None, None, FitMode::BestFit).unwrap();
    let first = BoundaryTagAllocator::new(512, Some(&parent), None, FitMode::FirstFit).unwrap();
    let second = BoundaryTagAllocator::new(512, Some(&parent), None, FitMode::FirstFit).unwrap();

    let a = first.allocate(64, 1).unwrap();
    let b = second.allocate(64, 1).unwrap();
    assert_ne!(a, b);
    assert_eq!(parent.get_blocks_info().iter().filter(|s| s.is_occupied).count(), 2);

    drop(first);
    assert_eq!(parent.get_blocks_info().iter().filter(|s| s.is_occupied).count(), 1);
    second.deallocate(b.as_ptr()).unwrap();
}
