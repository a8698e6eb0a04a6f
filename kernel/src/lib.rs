//! Physical frame allocator and zone manager.
//!
//! Owns every page-sized chunk of physical RAM in the machine: tracks
//! which frames are free or busy, allocates contiguous runs under
//! address-range and priority constraints, releases them, and parks
//! callers when memory is momentarily exhausted.
//!
//! The slab shrinker, the reservation accountant, architecture frame-init
//! hooks, and the logger are external collaborators consumed through the
//! traits in [`mm::collaborators`] rather than implemented here.

#![no_std]
#![allow(clippy::needless_lifetimes, mismatched_lifetime_syntaxes)]

#[cfg(feature = "alloc")]
extern crate alloc;

// Host target (used for `cargo test`): delegate to the system allocator so
// test code can use Vec/Box freely. On bare metal the embedding kernel is
// responsible for installing its own `#[global_allocator]`.
#[cfg(test)]
extern crate std;

pub mod error;
pub mod mm;
pub mod raii;
pub mod sync;

pub use error::{KernelError, KernelResult};
