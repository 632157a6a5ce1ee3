//! Implementation of the boundary tagged allocator.
//!
//! The main type is the [`BoundaryTagAllocator`] which manages exactly one arena of a fixed capacity.
//! Every occupied block inside the arena is prefixed with a tag holding the block's payload size and links to the
//! previous and next occupied blocks.
//! The tags form a list that is always sorted by address, so free memory never needs to be tracked explicitly:
//! the gaps between consecutive occupied blocks *are* the free list.
//!
//! ```text
//!   ┌──────────────────────────────── arena ──────────────────────────────────┐
//!   │                                                                         │
//!   [tag|payload][   gap   ][tag|payload][tag|payload][        gap           ]
//!     │    ▲                  ▲ │            ▲
//!     └────┼──── next ────────┘ └── next ────┘
//!          │
//!      handed out
//! ```
//!
//! Which gap is used for a new block is decided by the allocator's [`FitMode`].
//! Freeing a block simply unlinks its tag, which implicitly merges its memory with the surrounding gaps.
//!
//! # Example
//!
//! ```rust
//! # use allocators::{BlockInfo, BoundaryTagAllocator, FitMode};
//! #
//! let allocator = BoundaryTagAllocator::new(1024, None, None, FitMode::BestFit).unwrap();
//!
//! let data = allocator.allocate(8, 4).unwrap();
//! assert_eq!(allocator.get_blocks_info().len(), 2);
//!
//! allocator.deallocate(data.as_ptr()).unwrap();
//! assert_eq!(allocator.get_blocks_info(), [BlockInfo::free(1024)]);
//! ```
mod allocator;
mod tags;


pub use allocator::*;
