//! Shared test-double collaborators and one-time global init for the
//! integration tests in this directory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

use physmem_kernel::mm::{self, ArchInit, Collaborators, ReclaimLevel, ReservationAccountant, SlabReclaim, WaitBackend, ZoneFlags};

pub struct UnlimitedReservations;
impl ReservationAccountant for UnlimitedReservations {
    fn try_commit(&self, _count: u64) -> bool {
        true
    }
    fn uncommit(&self, _count: u64) {}
}

pub struct NoopSlab;
impl SlabReclaim for NoopSlab {
    fn reclaim(&self, _level: ReclaimLevel) -> u64 {
        0
    }
}

pub struct NoopArch;
impl ArchInit for NoopArch {
    fn init_range(&self, _base_pfn: u64, _frame_count: u64) {}
}

pub struct SpinWait {
    pub generation: AtomicU64,
}
impl Default for SpinWait {
    fn default() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }
}
impl WaitBackend for SpinWait {
    fn wait(&self, since: u64) {
        while self.generation.load(Ordering::Acquire) == since {
            std::hint::spin_loop();
        }
    }
    fn wake_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

pub fn basic_collaborators() -> Collaborators {
    Collaborators {
        reservations: Box::new(UnlimitedReservations),
        slab: Box::new(NoopSlab),
        arch: Box::new(NoopArch),
        wait: Box::new(SpinWait::default()),
    }
}

static INIT: Once = Once::new();

/// Install the shared zone layout for this test binary, exactly once.
/// Each test scenario below gets its own disjoint PFN range so tests can
/// run concurrently (the default `cargo test` thread-per-test model)
/// without interfering with each other.
pub fn ensure_init() {
    INIT.call_once(|| {
        mm::frame_init(
            vec![
                mm::ZoneSpec {
                    base_pfn: 0x1000,
                    frame_count: 64,
                    flags: ZoneFlags::AVAILABLE,
                },
                mm::ZoneSpec {
                    base_pfn: 0x2000,
                    frame_count: 16,
                    flags: ZoneFlags::AVAILABLE,
                },
                mm::ZoneSpec {
                    base_pfn: 0x3000,
                    frame_count: 8,
                    flags: ZoneFlags::AVAILABLE | ZoneFlags::HIGHMEM,
                },
                mm::ZoneSpec {
                    base_pfn: 0x3008,
                    frame_count: 8,
                    flags: ZoneFlags::AVAILABLE | ZoneFlags::LOWMEM,
                },
                mm::ZoneSpec {
                    base_pfn: 0x6000,
                    frame_count: 4,
                    flags: ZoneFlags::AVAILABLE,
                },
                mm::ZoneSpec {
                    base_pfn: 0x7000,
                    frame_count: 4,
                    flags: ZoneFlags::AVAILABLE,
                },
            ],
            vec![],
            basic_collaborators(),
        )
        .expect("shared test zone layout failed to register");
    });
}
