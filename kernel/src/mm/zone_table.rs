//! The ordered collection of zones covering all known physical memory.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

use super::zone::{Zone, ZoneFlags};

/// Upper bound on the number of zones the table will hold. Not a hard
/// storage limit (the table is backed by a `Vec`) but a sanity ceiling on
/// how fragmented the physical map is allowed to get before `zone_create`
/// starts refusing new entries -- a machine needing more than this has a
/// firmware memory map that should be coalesced first.
pub const ZONES_MAX: usize = 64;

/// Zones kept sorted by ascending `base_pfn`, with no overlaps.
pub struct ZoneTable {
    zones: Vec<Zone>,
}

impl ZoneTable {
    pub const fn new() -> Self {
        Self { zones: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    /// Insert a new zone, keeping the table sorted by `base_pfn`.
    ///
    /// A new zone wholly contained within an existing zone of the same
    /// flags is redundant -- that range is already described -- so it is
    /// dropped silently and this returns `Ok(())` without inserting
    /// anything. Any other overlap is a configuration conflict.
    pub fn insert(&mut self, zone: Zone) -> KernelResult<()> {
        if self.zones.len() >= ZONES_MAX {
            return Err(KernelError::ResourceExhausted { resource: "zone_table" });
        }
        let base = zone.base_pfn();
        let end = zone.end_pfn();
        let flags = zone.flags();
        for existing in &self.zones {
            let eb = existing.base_pfn();
            let ee = existing.end_pfn();
            if base < ee && eb < end {
                if base >= eb && end <= ee && flags == existing.flags() {
                    return Ok(());
                }
                return Err(KernelError::InvalidArgument {
                    name: "zone_create",
                    value: "overlaps an existing zone",
                });
            }
        }
        let pos = self.zones.partition_point(|z| z.base_pfn() < base);
        self.zones.insert(pos, zone);
        Ok(())
    }

    /// Find the zone containing `pfn`, if any.
    pub fn find_zone(&self, pfn: u64) -> Option<&Zone> {
        let pos = self.zones.partition_point(|z| z.base_pfn() <= pfn);
        if pos == 0 {
            return None;
        }
        let candidate = &self.zones[pos - 1];
        candidate.contains_pfn(pfn).then_some(candidate)
    }

    /// Merge the zone starting at `base_pfn` with its immediate successor
    /// in the table. Both must exist, be physically adjacent, carry
    /// identical flags, and neither may be flagged `FIRMWARE` (firmware
    /// regions are never coalesced with general memory since their flags
    /// must stay distinguishable).
    pub fn zone_merge(&mut self, base_pfn: u64) -> KernelResult<()> {
        let idx = self
            .zones
            .iter()
            .position(|z| z.base_pfn() == base_pfn)
            .ok_or(KernelError::NotFound {
                resource: "zone",
                id: base_pfn,
            })?;
        if idx + 1 >= self.zones.len() {
            return Err(KernelError::NotFound {
                resource: "zone_successor",
                id: base_pfn,
            });
        }
        {
            let a = &self.zones[idx];
            let b = &self.zones[idx + 1];
            if a.end_pfn() != b.base_pfn() {
                return Err(KernelError::InvalidArgument {
                    name: "zone_merge",
                    value: "zones are not adjacent",
                });
            }
            if a.flags().contains(ZoneFlags::FIRMWARE) || b.flags().contains(ZoneFlags::FIRMWARE) {
                return Err(KernelError::InvalidArgument {
                    name: "zone_merge",
                    value: "firmware zones cannot be merged",
                });
            }
            if a.flags() != b.flags() {
                return Err(KernelError::InvalidArgument {
                    name: "zone_merge",
                    value: "zones have different flags",
                });
            }
        }
        let b = self.zones.remove(idx + 1);
        let a = self.zones.remove(idx);
        let merged = a.merge_with(b)?;
        self.zones.insert(idx, merged);
        Ok(())
    }

    /// Repeatedly merge every pair of physically adjacent, compatible
    /// zones until no more merges are possible. Used after a batch of
    /// `zone_create` calls from a fragmented firmware memory map.
    pub fn zone_merge_all(&mut self) -> usize {
        let mut merges = 0;
        loop {
            let mut merged_any = false;
            let mut i = 0;
            while i + 1 < self.zones.len() {
                let adjacent = self.zones[i].end_pfn() == self.zones[i + 1].base_pfn();
                let mergeable = !self.zones[i].flags().contains(ZoneFlags::FIRMWARE)
                    && !self.zones[i + 1].flags().contains(ZoneFlags::FIRMWARE)
                    && self.zones[i].flags() == self.zones[i + 1].flags();
                if adjacent && mergeable {
                    let base = self.zones[i].base_pfn();
                    // zone_merge re-finds the index; table stays consistent.
                    self.zone_merge(base).expect("adjacency just verified");
                    merges += 1;
                    merged_any = true;
                } else {
                    i += 1;
                }
            }
            if !merged_any {
                break;
            }
        }
        merges
    }
}

impl Default for ZoneTable {
    fn default() -> Self {
        Self::new()
    }
}
