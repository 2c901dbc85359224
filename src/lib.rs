#![no_std]

//! tslab: a temporal slab allocator.
//!
//! Objects are bucketed into one of eight fixed size classes and carved
//! from fixed-size pages (slabs). Every allocation additionally belongs to
//! exactly one *epoch* — a caller-declared temporal bucket drawn from a
//! 16-slot ring — and closing an epoch reclaims every slab that epoch left
//! empty. Allocations are referenced by an opaque 64-bit handle rather than
//! a raw pointer; handles carry a generation counter so a stale handle
//! (pointing at a slab that has since been reused) is detected and
//! rejected rather than silently misinterpreted.
//!
//! # Usage
//!
//! ```ignore
//! use tslab::Allocator;
//!
//! let alloc = Allocator::new();
//! let epoch = alloc.epoch_current();
//! let (ptr, handle) = alloc.allocate(128, epoch).unwrap();
//! assert!(alloc.free(handle));
//! ```

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

#[macro_use]
pub mod macros;

pub mod allocator;
pub mod bitmap;
pub mod cache;
pub mod class_allocator;
pub mod config;
pub mod epoch;
pub mod handle;
pub mod list;
pub mod platform;
pub mod registry;
pub mod size_class;
pub mod slab;
pub mod stats;
pub mod sync;

pub use allocator::{Allocator, TslabError};
pub use config::{PAGE_SHIFT, PAGE_SIZE};
pub use handle::Handle;
