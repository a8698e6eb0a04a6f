//! Capabilities the allocator calls out to, instead of linking against.
//!
//! The slab shrinker, the reservation accountant, architecture-specific
//! frame bring-up, and the blocked-allocator wait/wake backend all live
//! in other subsystems. Rather than hard-depend on their crates, the
//! allocator is handed trait objects for each at [`super::frame_init`]
//! time and calls through them -- this is what keeps the allocator
//! testable in isolation and free of a dependency cycle back to the
//! slab cache it triggers reclaim in.

#[cfg(feature = "alloc")]
use alloc::boxed::Box;

/// How hard to lean on the slab shrinker before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReclaimLevel {
    /// Drop caches that cost nothing to rebuild.
    Light,
    /// Shrink caches that are merely convenient to keep warm.
    Moderate,
    /// Reclaim everything reclaimable, including recently used entries.
    Aggressive,
}

/// The slab allocator's reclaim entry point, as seen from this crate.
pub trait SlabReclaim: Send + Sync {
    /// Ask the slab layer to give back frames at the given pressure level.
    /// Returns the number of frames it believes it released; the caller
    /// re-probes the zones rather than trusting this count directly.
    fn reclaim(&self, level: ReclaimLevel) -> u64;
}

/// Tracks outstanding promises to hand out memory so that `alloc` can be
/// refused (or succeed) consistently with promises already made via
/// overcommit accounting elsewhere in the kernel.
pub trait ReservationAccountant: Send + Sync {
    /// Returns `true` if `count` additional frames may be committed.
    fn try_commit(&self, count: u64) -> bool;
    /// Give back a commitment made earlier (on free, or a failed alloc
    /// that had already called `try_commit`).
    fn uncommit(&self, count: u64);
}

/// Architecture-specific bring-up for a freshly discovered frame range
/// (e.g. zeroing, poisoning in debug builds, NX bit setup). Invoked once
/// per zone at `frame_init` time, never on the hot alloc/free path.
pub trait ArchInit: Send + Sync {
    fn init_range(&self, base_pfn: u64, frame_count: u64);
}

/// Parks and wakes callers that asked to block rather than fail when no
/// zone can currently satisfy a request. See [`super::wait`] for the
/// default, generation-counter-based implementation and its std-backed
/// variant.
pub trait WaitBackend: Send + Sync {
    /// Block the calling context until `generation` advances past `since`,
    /// or indefinitely if the backend has no way to learn unblocking
    /// happened (callers must re-check their condition in a loop).
    fn wait(&self, since: u64);
    /// Wake every parked waiter; called after any free that could have
    /// unblocked someone.
    fn wake_all(&self);
    /// Monotonic counter bumped by `wake_all`. Used by callers to detect
    /// whether a wake already happened between their check and their wait.
    fn generation(&self) -> u64;
}

/// The full set of external collaborators, installed once at init time.
pub struct Collaborators {
    pub reservations: Box<dyn ReservationAccountant>,
    pub slab: Box<dyn SlabReclaim>,
    pub arch: Box<dyn ArchInit>,
    pub wait: Box<dyn WaitBackend>,
}
