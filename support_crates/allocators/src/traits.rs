use core::ptr::NonNull;
use thiserror_no_std::Error;

/// The error returned when an allocator operation fails
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum AllocError {
    #[error("an arena of {capacity} bytes cannot hold a single block (at least {minimum} bytes are required)")]
    InvalidConfiguration { capacity: usize, minimum: usize },
    #[error("the allocator has insufficient free memory to allocate {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("the pointer {address:#x} was not handed out by this allocator")]
    InvalidPointer { address: usize },
}

/// An implementation of `Allocator` can hand out and take back untyped blocks of memory.
///
/// It is the capability an arena needs from whoever supplies its backing memory.
pub trait Allocator: Send + Sync {
    /// Attempt to allocate a block large enough to hold `count` values of `value_size` bytes each.
    ///
    /// The returned memory is uninitialized.
    /// If `value_size * count` overflows, [`AllocError::OutOfMemory`] is returned.
    fn allocate(&self, value_size: usize, count: usize) -> Result<NonNull<u8>, AllocError>;

    /// Return a block to the allocator.
    ///
    /// Passing a null pointer does nothing.
    ///
    /// # Safety
    /// The given pointer must be *currently allocated* from this allocator.
    ///
    /// This means that:
    /// - it was previously returned by [`allocate`](Allocator::allocate) of the same allocator
    /// - it has not yet been deallocated
    ///
    /// Implementations may detect some violations and report them as [`AllocError::InvalidPointer`] but are
    /// not required to.
    unsafe fn deallocate(&self, ptr: *mut u8) -> Result<(), AllocError>;
}
