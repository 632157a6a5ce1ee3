//! Memory allocators that manage a single fixed-size arena.
//!
//! The main type is the [`BoundaryTagAllocator`], which obtains its arena from an upstream [`Allocator`]
//! (the [`GlobalHeap`] unless another one is given) and places a boundary tag in front of every block it hands out.
#![no_std]

extern crate alloc;

pub mod boundary_tag_alloc;
mod diagnostics;
mod global_heap;
mod traits;

pub use boundary_tag_alloc::{BlockInfo, BoundaryTagAllocator, FitMode};
pub use global_heap::GlobalHeap;
pub use traits::{AllocError, Allocator};
