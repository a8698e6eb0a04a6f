//! Error types for the frame allocator and zone manager.

use core::fmt;

/// Recoverable errors surfaced by the allocator's public API.
///
/// Invariant violations (double free, freeing an address outside any zone,
/// an allocation racing a supposedly-clear frame) are programming errors and
/// panic instead of returning a value here -- see the module docs on each
/// operation for which failure mode applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "allocator errors must be handled, not silently discarded"]
pub enum KernelError {
    /// No zone could satisfy the request, even after reclaim (non-atomic
    /// callers never see this -- they sleep instead).
    OutOfMemory { requested: usize, available: usize },
    /// A supplied physical address or PFN does not belong to any zone.
    InvalidAddress { addr: usize },
    /// An argument violated a precondition (zero count, malformed range).
    InvalidArgument { name: &'static str, value: &'static str },
    /// A fixed-capacity resource (the zone table) is full.
    ResourceExhausted { resource: &'static str },
    /// A requested zone or zone pair does not exist or isn't mergeable.
    NotFound { resource: &'static str, id: u64 },
    /// A subsystem was used before `frame_init`.
    NotInitialized { subsystem: &'static str },
}

/// Result type alias for allocator operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {requested} frames, {available} available"
            ),
            Self::InvalidAddress { addr } => write!(f, "address 0x{addr:x} is not in any zone"),
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{name}': {value}")
            }
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {resource}"),
            Self::NotFound { resource, id } => write!(f, "{resource} {id} not found"),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {subsystem}")
            }
        }
    }
}
