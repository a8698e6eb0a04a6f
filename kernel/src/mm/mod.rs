//! Physical frame allocation and zone management.
//!
//! Public entry points mirror the lifecycle of physical memory: zones are
//! registered once at boot ([`frame_init`], [`zone_create`]), may later be
//! coalesced ([`zone_merge`], [`zone_merge_all`]), and frames are drawn
//! from and returned to them for the life of the system
//! ([`frame_alloc`], [`frame_free`], [`frame_reference_add`]).

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

pub mod allocator;
pub mod bitmap;
pub mod collaborators;
pub mod frame;
pub mod search;
pub mod wait;
pub mod zone;
pub mod zone_table;

pub use allocator::AllocFlags;
pub use collaborators::{
    ArchInit, Collaborators, ReclaimLevel, ReservationAccountant, SlabReclaim, WaitBackend,
};
pub use frame::{FrameRecord, ParentHandle};
pub use zone::ZoneFlags;
pub use zone_table::ZONES_MAX;

use crate::error::{KernelError, KernelResult};
use crate::sync::OnceLock;
use zone::Zone;
use zone_table::ZoneTable;

/// Bytes per frame. Every PFN/address conversion in this crate assumes
/// this page size; there is no support for mixed page sizes at this
/// layer (that's the page-table layer's concern).
pub const FRAME_SIZE: usize = 4096;

/// Physical frame number: a physical address divided by [`FRAME_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pfn(pub u64);

impl Pfn {
    pub fn from_addr(addr: usize) -> Self {
        Pfn((addr / FRAME_SIZE) as u64)
    }

    pub fn as_addr(&self) -> usize {
        self.0 as usize * FRAME_SIZE
    }
}

static ZONE_TABLE: spin::RwLock<ZoneTable> = spin::RwLock::new(ZoneTable::new());
static COLLABORATORS: OnceLock<Collaborators> = OnceLock::new();

fn collaborators() -> KernelResult<&'static Collaborators> {
    COLLABORATORS
        .get()
        .ok_or(KernelError::NotInitialized { subsystem: "mm" })
}

/// One zone's boot-time description, as handed to [`frame_init`].
pub struct ZoneSpec {
    pub base_pfn: u64,
    pub frame_count: u64,
    pub flags: ZoneFlags,
}

/// Register the initial zone layout and install the external
/// collaborators. Must be called exactly once, before any other function
/// in this module.
///
/// `unavailable` lists `(base_pfn, frame_count)` ranges -- the kernel
/// image, the boot stack, each init task, the boot allocator's own
/// arena -- that occupy frames within the zones above but must never be
/// handed out. Each range is withdrawn via [`allocator::mark_unavailable`]
/// after the zones are registered; a range that falls outside every zone
/// is skipped rather than failing boot. PFN 0 is always withdrawn as
/// well, regardless of `unavailable`, since a null physical address must
/// never be a valid allocation.
pub fn frame_init(
    zones: Vec<ZoneSpec>,
    unavailable: Vec<(u64, u64)>,
    collabs: Collaborators,
) -> KernelResult<()> {
    for z in &zones {
        collabs.arch.init_range(z.base_pfn, z.frame_count);
    }

    COLLABORATORS
        .set(collabs)
        .map_err(|_| KernelError::InvalidArgument {
            name: "frame_init",
            value: "already initialized",
        })?;

    let mut table = ZONE_TABLE.write();
    for z in zones {
        table.insert(Zone::new(z.base_pfn, z.frame_count, z.flags))?;
    }

    let collabs = collaborators()?;
    for (base_pfn, frame_count) in unavailable {
        let _ = allocator::mark_unavailable(&table, collabs, base_pfn, frame_count);
    }
    let _ = allocator::mark_unavailable(&table, collabs, 0, 1);

    Ok(())
}

/// Allocate `count` contiguous frames with no address constraint.
pub fn frame_alloc(count: u64, flags: AllocFlags) -> KernelResult<Pfn> {
    frame_alloc_generic(count, flags, 0)
}

/// Allocate `count` contiguous frames whose starting PFN must not set any
/// bit in `constraint` (used to express alignment and address-range caps,
/// e.g. "below 4 GiB" as a mask over the high bits).
pub fn frame_alloc_generic(count: u64, flags: AllocFlags, constraint: u64) -> KernelResult<Pfn> {
    let collaborators = collaborators()?;
    let table = ZONE_TABLE.read();
    allocator::alloc(&table, collaborators, count, flags, constraint).map(Pfn)
}

/// Drop one reference from each frame in `[addr, addr + count*FRAME_SIZE)`,
/// returning any that reach a zero refcount to their zone's free pool.
pub fn frame_free(addr: usize, count: u64) -> KernelResult<()> {
    let collaborators = collaborators()?;
    let table = ZONE_TABLE.read();
    allocator::free(&table, collaborators, Pfn::from_addr(addr).0, count)
}

/// Like [`frame_free`] but does not uncommit a reservation -- for frames
/// that were never charged against the accountant.
pub fn frame_free_noreserve(addr: usize, count: u64) -> KernelResult<()> {
    let collaborators = collaborators()?;
    let table = ZONE_TABLE.read();
    allocator::free_noreserve(&table, collaborators, Pfn::from_addr(addr).0, count)
}

/// Add one reference to each frame in the range, keeping it alive across
/// an additional owner. The range must already be fully allocated.
pub fn frame_reference_add(addr: usize, count: u64) -> KernelResult<()> {
    let table = ZONE_TABLE.read();
    allocator::reference_add(&table, Pfn::from_addr(addr).0, count)
}

/// Permanently withdraw frames from circulation (firmware regions,
/// bookkeeping storage). Not reversible through the public API.
pub fn frame_mark_unavailable(addr: usize, count: u64) -> KernelResult<()> {
    let collaborators = collaborators()?;
    let table = ZONE_TABLE.read();
    allocator::mark_unavailable(&table, collaborators, Pfn::from_addr(addr).0, count)
}

pub fn frame_set_parent(addr: usize, parent: ParentHandle) -> KernelResult<()> {
    let table = ZONE_TABLE.read();
    let pfn = Pfn::from_addr(addr).0;
    let zone = table
        .find_zone(pfn)
        .ok_or(KernelError::InvalidAddress { addr })?;
    zone.set_parent(pfn, parent)
}

pub fn frame_get_parent(addr: usize) -> KernelResult<ParentHandle> {
    let table = ZONE_TABLE.read();
    let pfn = Pfn::from_addr(addr).0;
    let zone = table
        .find_zone(pfn)
        .ok_or(KernelError::InvalidAddress { addr })?;
    zone.get_parent(pfn)
}

/// Register a new zone covering `[base_pfn, base_pfn + frame_count)`.
pub fn zone_create(base_pfn: u64, frame_count: u64, flags: ZoneFlags) -> KernelResult<()> {
    ZONE_TABLE
        .write()
        .insert(Zone::new(base_pfn, frame_count, flags))
}

/// Merge the zone at `base_pfn` with its immediate successor.
pub fn zone_merge(base_pfn: u64) -> KernelResult<()> {
    ZONE_TABLE.write().zone_merge(base_pfn)
}

/// Merge every adjacent, compatible pair of zones; returns how many
/// merges were performed.
pub fn zone_merge_all() -> usize {
    ZONE_TABLE.write().zone_merge_all()
}

pub fn frames_total_free() -> u64 {
    allocator::frames_total_free(&ZONE_TABLE.read())
}

/// Point-in-time snapshot of one zone, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct ZoneStats {
    pub base_pfn: u64,
    pub frame_count: u64,
    pub free_count: u64,
    pub flags: ZoneFlags,
}

pub fn zones_stats() -> Vec<ZoneStats> {
    ZONE_TABLE
        .read()
        .iter()
        .map(|z| ZoneStats {
            base_pfn: z.base_pfn(),
            frame_count: z.frame_count(),
            free_count: z.free_count(),
            flags: z.flags(),
        })
        .collect()
}

pub fn print_zone(stats: &ZoneStats) {
    log::info!(
        "zone base_pfn={} frames={} free={} flags={:?}",
        stats.base_pfn,
        stats.frame_count,
        stats.free_count,
        stats.flags
    );
}

pub fn print_zones() {
    for stats in zones_stats() {
        print_zone(&stats);
    }
}
