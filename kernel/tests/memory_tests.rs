//! Integration tests for the frame allocator and zone manager, driven
//! entirely through the crate's public API with test-double collaborators.

mod common;

use std::sync::Mutex;

use physmem_kernel::mm::{self, allocator, zone_table::ZoneTable, AllocFlags, Collaborators, ParentHandle, ReclaimLevel};

#[test]
fn alloc_and_free_round_trip() {
    common::ensure_init();

    let before = mm::frames_total_free();
    let pfn = mm::frame_alloc(4, AllocFlags::empty()).unwrap();
    assert_eq!(mm::frames_total_free(), before - 4);

    mm::frame_free(pfn.as_addr(), 4).unwrap();
    assert_eq!(mm::frames_total_free(), before);
}

#[test]
fn shared_frames_need_every_reference_dropped() {
    common::ensure_init();

    let pfn = mm::frame_alloc(1, AllocFlags::empty()).unwrap();
    assert!((0x2000..0x2010).contains(&pfn.0));
    mm::frame_reference_add(pfn.as_addr(), 1).unwrap();

    let before = mm::frames_total_free();
    mm::frame_free(pfn.as_addr(), 1).unwrap();
    assert_eq!(mm::frames_total_free(), before); // still held once

    mm::frame_free(pfn.as_addr(), 1).unwrap();
    assert_eq!(mm::frames_total_free(), before + 1);
}

#[test]
fn lowmem_only_requests_never_draw_from_highmem_zones() {
    common::ensure_init();

    let pfn = mm::frame_alloc_generic(4, AllocFlags::LOWMEM_ONLY, 0).unwrap();
    assert!(pfn.0 >= 0x3008);
    mm::frame_free(pfn.as_addr(), 4).unwrap();
}

#[test]
fn atomic_request_fails_fast_instead_of_blocking() {
    use physmem_kernel::mm::collaborators::{ArchInit, ReservationAccountant, SlabReclaim};
    use physmem_kernel::mm::wait::SpinWaitBackend;
    use physmem_kernel::mm::zone::{Zone, ZoneFlags as ZF};

    struct AlwaysCommit;
    impl ReservationAccountant for AlwaysCommit {
        fn try_commit(&self, _count: u64) -> bool {
            true
        }
        fn uncommit(&self, _count: u64) {}
    }
    struct NoopSlab;
    impl SlabReclaim for NoopSlab {
        fn reclaim(&self, _level: ReclaimLevel) -> u64 {
            0
        }
    }
    struct NoInit;
    impl ArchInit for NoInit {
        fn init_range(&self, _base_pfn: u64, _frame_count: u64) {}
    }

    let mut table = ZoneTable::new();
    table.insert(Zone::new(0, 4, ZF::AVAILABLE)).unwrap();
    let collaborators = Collaborators {
        reservations: Box::new(AlwaysCommit),
        slab: Box::new(NoopSlab),
        arch: Box::new(NoInit),
        wait: Box::new(SpinWaitBackend::new()),
    };

    let err = allocator::alloc(&table, &collaborators, 8, AllocFlags::ATOMIC, 0).unwrap_err();
    assert!(matches!(
        err,
        physmem_kernel::KernelError::OutOfMemory { .. }
    ));
}

#[test]
fn reclaim_ladder_frees_space_the_search_alone_could_not_find() {
    use physmem_kernel::mm::collaborators::{ArchInit, ReservationAccountant, SlabReclaim};
    use physmem_kernel::mm::wait::SpinWaitBackend;
    use physmem_kernel::mm::zone::{Zone, ZoneFlags as ZF};

    struct AlwaysCommit;
    impl ReservationAccountant for AlwaysCommit {
        fn try_commit(&self, _count: u64) -> bool {
            true
        }
        fn uncommit(&self, _count: u64) {}
    }
    struct NoInit;
    impl ArchInit for NoInit {
        fn init_range(&self, _base_pfn: u64, _frame_count: u64) {}
    }
    struct ReclaimOnModerate {
        levels_seen: Mutex<Vec<ReclaimLevel>>,
        table: *const ZoneTable,
    }
    // SAFETY: `table` points at the `ZoneTable` local below, which outlives
    // every call to `alloc` in this test.
    unsafe impl Send for ReclaimOnModerate {}
    unsafe impl Sync for ReclaimOnModerate {}
    impl SlabReclaim for ReclaimOnModerate {
        fn reclaim(&self, level: ReclaimLevel) -> u64 {
            self.levels_seen.lock().unwrap().push(level);
            if level == ReclaimLevel::Moderate {
                // SAFETY: see struct comment.
                let table = unsafe { &*self.table };
                let zone = table.find_zone(0).unwrap();
                zone.free(0, 4);
            }
            0
        }
    }

    let mut table = ZoneTable::new();
    table.insert(Zone::new(0, 4, ZF::AVAILABLE)).unwrap();
    table.find_zone(0).unwrap().alloc(4, 0).unwrap();

    let slab = ReclaimOnModerate {
        levels_seen: Mutex::new(Vec::new()),
        table: &table as *const ZoneTable,
    };
    let collaborators = Collaborators {
        reservations: Box::new(AlwaysCommit),
        slab: Box::new(slab),
        arch: Box::new(NoInit),
        wait: Box::new(SpinWaitBackend::new()),
    };

    let pfn = allocator::alloc(&table, &collaborators, 4, AllocFlags::ATOMIC, 0).unwrap();
    assert_eq!(pfn, 0);
}

#[test]
fn blocked_allocator_wakes_when_another_thread_frees() {
    common::ensure_init();

    let held = mm::frame_alloc(4, AllocFlags::empty()).unwrap();
    assert!((0x7000..0x7004).contains(&held.0));

    let waiter = std::thread::spawn(|| mm::frame_alloc(4, AllocFlags::empty()));

    std::thread::sleep(std::time::Duration::from_millis(20));
    mm::frame_free(held.as_addr(), 4).unwrap();

    let woken = waiter.join().unwrap().unwrap();
    assert_eq!(woken.0, held.0);
}

#[test]
fn zone_merge_lets_an_allocation_span_the_old_boundary() {
    use physmem_kernel::mm::collaborators::{ArchInit, ReservationAccountant, SlabReclaim};
    use physmem_kernel::mm::wait::SpinWaitBackend;
    use physmem_kernel::mm::zone::{Zone, ZoneFlags as ZF};

    struct AlwaysCommit;
    impl ReservationAccountant for AlwaysCommit {
        fn try_commit(&self, _count: u64) -> bool {
            true
        }
        fn uncommit(&self, _count: u64) {}
    }
    struct NoopSlab;
    impl SlabReclaim for NoopSlab {
        fn reclaim(&self, _level: ReclaimLevel) -> u64 {
            0
        }
    }
    struct NoInit;
    impl ArchInit for NoInit {
        fn init_range(&self, _base_pfn: u64, _frame_count: u64) {}
    }
    fn collaborators() -> Collaborators {
        Collaborators {
            reservations: Box::new(AlwaysCommit),
            slab: Box::new(NoopSlab),
            arch: Box::new(NoInit),
            wait: Box::new(SpinWaitBackend::new()),
        }
    }

    let mut table = ZoneTable::new();
    table.insert(Zone::new(0, 4, ZF::AVAILABLE)).unwrap();
    table.insert(Zone::new(4, 4, ZF::AVAILABLE)).unwrap();

    assert!(allocator::alloc(&table, &collaborators(), 8, AllocFlags::ATOMIC, 0).is_err());

    table.zone_merge(0).unwrap();

    let pfn = allocator::alloc(&table, &collaborators(), 8, AllocFlags::empty(), 0).unwrap();
    assert_eq!(pfn, 0);
}

#[test]
fn parent_handle_round_trips_through_allocated_frame() {
    common::ensure_init();

    let pfn = mm::frame_alloc(1, AllocFlags::empty()).unwrap();
    assert!((0x6000..0x6004).contains(&pfn.0));
    mm::frame_set_parent(pfn.as_addr(), ParentHandle(42)).unwrap();
    assert_eq!(
        mm::frame_get_parent(pfn.as_addr()).unwrap(),
        ParentHandle(42)
    );
    mm::frame_free(pfn.as_addr(), 1).unwrap();
}

#[test]
fn no_reserve_alloc_leaves_an_always_denying_accountant_untouched() {
    use physmem_kernel::mm::collaborators::{ArchInit, ReservationAccountant, SlabReclaim};
    use physmem_kernel::mm::wait::SpinWaitBackend;
    use physmem_kernel::mm::zone::{Zone, ZoneFlags as ZF};

    struct DenyAll;
    impl ReservationAccountant for DenyAll {
        fn try_commit(&self, _count: u64) -> bool {
            false
        }
        fn uncommit(&self, _count: u64) {}
    }
    struct NoopSlab;
    impl SlabReclaim for NoopSlab {
        fn reclaim(&self, _level: ReclaimLevel) -> u64 {
            0
        }
    }
    struct NoInit;
    impl ArchInit for NoInit {
        fn init_range(&self, _base_pfn: u64, _frame_count: u64) {}
    }

    let mut table = ZoneTable::new();
    table.insert(Zone::new(0, 8, ZF::AVAILABLE)).unwrap();
    let collaborators = Collaborators {
        reservations: Box::new(DenyAll),
        slab: Box::new(NoopSlab),
        arch: Box::new(NoInit),
        wait: Box::new(SpinWaitBackend::new()),
    };

    // The accountant would refuse any commit, but NO_RESERVE means the
    // allocator never asks it.
    let pfn = allocator::alloc(&table, &collaborators, 4, AllocFlags::NO_RESERVE, 0).unwrap();
    assert_eq!(pfn, 0);
}

#[test]
fn reservation_accountant_can_deny_before_any_zone_is_checked() {
    use physmem_kernel::mm::collaborators::{ArchInit, ReservationAccountant, SlabReclaim};
    use physmem_kernel::mm::wait::SpinWaitBackend;
    use physmem_kernel::mm::zone::{Zone, ZoneFlags as ZF};

    struct DenyAll;
    impl ReservationAccountant for DenyAll {
        fn try_commit(&self, _count: u64) -> bool {
            false
        }
        fn uncommit(&self, _count: u64) {}
    }
    struct NoopSlab;
    impl SlabReclaim for NoopSlab {
        fn reclaim(&self, _level: ReclaimLevel) -> u64 {
            0
        }
    }
    struct NoInit;
    impl ArchInit for NoInit {
        fn init_range(&self, _base_pfn: u64, _frame_count: u64) {}
    }

    let mut table = ZoneTable::new();
    table.insert(Zone::new(0, 64, ZF::AVAILABLE)).unwrap();
    let collaborators = Collaborators {
        reservations: Box::new(DenyAll),
        slab: Box::new(NoopSlab),
        arch: Box::new(NoInit),
        wait: Box::new(SpinWaitBackend::new()),
    };

    // Plenty of physically free frames, but the accountant refuses to
    // commit any of them -- the allocator must not even probe the zone.
    let err = allocator::alloc(&table, &collaborators, 4, AllocFlags::ATOMIC, 0).unwrap_err();
    assert!(matches!(
        err,
        physmem_kernel::KernelError::OutOfMemory { .. }
    ));
}

#[test]
fn mark_unavailable_at_boot_withdraws_a_frame_and_debits_the_accountant() {
    use physmem_kernel::mm::collaborators::{ArchInit, ReservationAccountant, SlabReclaim};
    use physmem_kernel::mm::wait::SpinWaitBackend;
    use physmem_kernel::mm::zone::{Zone, ZoneFlags as ZF};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct Debitable(Arc<AtomicU64>);
    impl ReservationAccountant for Debitable {
        fn try_commit(&self, count: u64) -> bool {
            self.0.fetch_add(count, Ordering::SeqCst);
            true
        }
        fn uncommit(&self, count: u64) {
            self.0.fetch_sub(count, Ordering::SeqCst);
        }
    }
    struct NoopSlab;
    impl SlabReclaim for NoopSlab {
        fn reclaim(&self, _level: ReclaimLevel) -> u64 {
            0
        }
    }
    struct NoInit;
    impl ArchInit for NoInit {
        fn init_range(&self, _base_pfn: u64, _frame_count: u64) {}
    }

    let mut table = ZoneTable::new();
    table.insert(Zone::new(0, 8, ZF::AVAILABLE)).unwrap();
    let debited = Arc::new(AtomicU64::new(0));
    let collaborators = Collaborators {
        reservations: Box::new(Debitable(debited.clone())),
        slab: Box::new(NoopSlab),
        arch: Box::new(NoInit),
        wait: Box::new(SpinWaitBackend::new()),
    };

    allocator::mark_unavailable(&table, &collaborators, 0, 1).unwrap();
    assert_eq!(table.find_zone(0).unwrap().free_count(), 7);
    assert_eq!(debited.load(Ordering::SeqCst), 1);

    let pfn = allocator::alloc(&table, &collaborators, 1, AllocFlags::ATOMIC, 0).unwrap();
    assert_ne!(pfn, 0);
}
