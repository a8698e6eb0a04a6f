//! The allocate/free facade: reservation accounting, the reclaim ladder,
//! and the wait/retry loop sit here, above plain zone-local allocation.

#[cfg(feature = "alloc")]
extern crate alloc;

use crate::error::{KernelError, KernelResult};

use super::collaborators::{Collaborators, ReclaimLevel};
use super::search::find_free_zone;
use super::zone_table::ZoneTable;

bitflags::bitflags! {
    /// Request-time modifiers for [`alloc`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Never reclaim or block; fail immediately if no zone can serve
        /// the request right now. Required from interrupt context.
        const ATOMIC      = 1 << 0;
        /// Restrict the search to `LOWMEM` zones entirely (DMA buffers
        /// that a 32-bit-only device will read from).
        const LOWMEM_ONLY = 1 << 1;
        /// Skip the reservation accountant entirely -- for frames that
        /// are never counted against a memory budget (the allocator's
        /// own bookkeeping storage, for instance).
        const NO_RESERVE  = 1 << 2;
        /// Never invoke the slab shrinker on shortage; only the zones'
        /// own free space is considered before failing or blocking.
        const NO_RECLAIM  = 1 << 3;
    }
}

/// Escalating reclaim attempts, tried in order after a bare zone search
/// comes up empty and before giving up or blocking. A richer ladder than
/// a plain partial/all split, but `NO_RECLAIM` still skips it outright.
const RECLAIM_LADDER: [ReclaimLevel; 3] = [
    ReclaimLevel::Light,
    ReclaimLevel::Moderate,
    ReclaimLevel::Aggressive,
];

/// Allocate `count` contiguous frames, escalating through reclaim and
/// (unless `ATOMIC`) blocking on the wait backend before giving up.
///
/// Each attempt: commit the reservation, search zones, and on failure
/// uncommit before trying the next reclaim level or waiting. The
/// reservation is only held while a zone search is in flight so a denial
/// doesn't leave phantom commitments behind.
pub fn alloc(
    table: &ZoneTable,
    collaborators: &Collaborators,
    count: u64,
    flags: AllocFlags,
    constraint: u64,
) -> KernelResult<u64> {
    loop {
        if let Some(pfn) = try_once(table, collaborators, count, flags, constraint) {
            return Ok(pfn);
        }

        if !flags.contains(AllocFlags::NO_RECLAIM) {
            for &level in &RECLAIM_LADDER {
                collaborators.slab.reclaim(level);
                if let Some(pfn) = try_once(table, collaborators, count, flags, constraint) {
                    return Ok(pfn);
                }
            }
        }

        if flags.contains(AllocFlags::ATOMIC) {
            return Err(KernelError::OutOfMemory {
                requested: count as usize,
                available: frames_total_free(table) as usize,
            });
        }

        let gen = collaborators.wait.generation();
        collaborators.wait.wait(gen);
    }
}

fn try_once(
    table: &ZoneTable,
    collaborators: &Collaborators,
    count: u64,
    flags: AllocFlags,
    constraint: u64,
) -> Option<u64> {
    let no_reserve = flags.contains(AllocFlags::NO_RESERVE);
    if !no_reserve && !collaborators.reservations.try_commit(count) {
        return None;
    }
    let zone = find_free_zone(table, count, flags, constraint).or_else(|| {
        if !no_reserve {
            collaborators.reservations.uncommit(count);
        }
        None
    })?;
    match zone.alloc(count, constraint) {
        Some(pfn) => Some(pfn),
        None => {
            if !no_reserve {
                collaborators.reservations.uncommit(count);
            }
            None
        }
    }
}

/// Release `count` frames starting at `pfn`, uncommit the matching
/// reservation, and wake anyone parked waiting for memory.
pub fn free(
    table: &ZoneTable,
    collaborators: &Collaborators,
    pfn: u64,
    count: u64,
) -> KernelResult<()> {
    let zone = table
        .find_zone(pfn)
        .ok_or(KernelError::InvalidAddress { addr: pfn as usize })?;
    if !zone.contains_range(pfn, count) {
        return Err(KernelError::InvalidAddress { addr: pfn as usize });
    }
    zone.free(pfn, count);
    collaborators.reservations.uncommit(count);
    collaborators.wait.wake_all();
    Ok(())
}

/// Like [`free`] but skips the reservation accountant -- for frames that
/// were never counted against a commitment (bookkeeping frames carved
/// out during `zone_create`/`zone_merge`, for instance).
pub fn free_noreserve(table: &ZoneTable, collaborators: &Collaborators, pfn: u64, count: u64) -> KernelResult<()> {
    let zone = table
        .find_zone(pfn)
        .ok_or(KernelError::InvalidAddress { addr: pfn as usize })?;
    if !zone.contains_range(pfn, count) {
        return Err(KernelError::InvalidAddress { addr: pfn as usize });
    }
    zone.free(pfn, count);
    collaborators.wait.wake_all();
    Ok(())
}

pub fn reference_add(table: &ZoneTable, pfn: u64, count: u64) -> KernelResult<()> {
    let zone = table
        .find_zone(pfn)
        .ok_or(KernelError::InvalidAddress { addr: pfn as usize })?;
    if !zone.contains_range(pfn, count) {
        return Err(KernelError::InvalidAddress { addr: pfn as usize });
    }
    zone.reference_add(pfn, count)
}

/// Withdraw frames from circulation and debit the reservation accountant
/// for each one actually withdrawn -- a frame already busy (already
/// allocated, or already marked unavailable) is left untouched and not
/// re-debited.
pub fn mark_unavailable(
    table: &ZoneTable,
    collaborators: &Collaborators,
    pfn: u64,
    count: u64,
) -> KernelResult<()> {
    let zone = table
        .find_zone(pfn)
        .ok_or(KernelError::InvalidAddress { addr: pfn as usize })?;
    if !zone.contains_range(pfn, count) {
        return Err(KernelError::InvalidAddress { addr: pfn as usize });
    }
    let withdrawn = zone.mark_unavailable(pfn, count);
    if withdrawn > 0 {
        collaborators.reservations.try_commit(withdrawn);
    }
    Ok(())
}

pub fn frames_total_free(table: &ZoneTable) -> u64 {
    table.iter().map(|z| z.free_count()).sum()
}
