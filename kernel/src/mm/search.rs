//! Zone selection: which zone should service a given allocation request.

use super::allocator::AllocFlags;
use super::zone::{Zone, ZoneFlags, FRAME_LOWPRIO};
use super::zone_table::ZoneTable;

/// True if every frame in the zone lies below [`FRAME_LOWPRIO`] -- scarce,
/// DMA-capable memory with nothing to spare for general requests.
fn is_high_priority(base_pfn: u64, frame_count: u64) -> bool {
    base_pfn + frame_count <= FRAME_LOWPRIO
}

/// First pass: zones that contain at least one low-priority frame, in
/// table order. Tried on every request unconditionally -- low-priority
/// memory is the resource to spend first, so nothing gates this beyond
/// the request itself being satisfiable.
fn find_free_zone_lowprio<'a>(table: &'a ZoneTable, count: u64, constraint: u64) -> Option<&'a Zone> {
    table
        .iter()
        .find(|z| !is_high_priority(z.base_pfn(), z.frame_count()) && z.probe(count, constraint))
}

/// Second pass: every zone, in table order, including ones made up
/// entirely of high-priority memory.
fn find_free_zone_all<'a>(table: &'a ZoneTable, count: u64, constraint: u64) -> Option<&'a Zone> {
    table.iter().find(|z| z.probe(count, constraint))
}

/// Pick a zone to service `count` frames under `flags`/`constraint`.
///
/// `LOWMEM_ONLY` restricts the whole search to `LOWMEM` zones. Otherwise
/// every call tries the low-priority pass first, falling back to the
/// full pass -- this preference is automatic, not something a caller
/// flag turns on.
pub fn find_free_zone<'a>(
    table: &'a ZoneTable,
    count: u64,
    flags: AllocFlags,
    constraint: u64,
) -> Option<&'a Zone> {
    if flags.contains(AllocFlags::LOWMEM_ONLY) {
        return table
            .iter()
            .find(|z| z.flags().contains(ZoneFlags::LOWMEM) && z.probe(count, constraint));
    }

    find_free_zone_lowprio(table, count, constraint).or_else(|| find_free_zone_all(table, count, constraint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowmem_only_skips_highmem_zones() {
        let mut t = ZoneTable::new();
        t.insert(Zone::new(0, 8, ZoneFlags::AVAILABLE | ZoneFlags::HIGHMEM))
            .unwrap();
        t.insert(Zone::new(8, 8, ZoneFlags::AVAILABLE | ZoneFlags::LOWMEM))
            .unwrap();
        let z = find_free_zone(&t, 4, AllocFlags::LOWMEM_ONLY, 0).unwrap();
        assert_eq!(z.base_pfn(), 8);
    }

    #[test]
    fn low_priority_zone_is_preferred_even_with_no_flags_set() {
        let mut t = ZoneTable::new();
        t.insert(Zone::new(0, FRAME_LOWPRIO, ZoneFlags::AVAILABLE))
            .unwrap();
        t.insert(Zone::new(FRAME_LOWPRIO, 256, ZoneFlags::AVAILABLE))
            .unwrap();
        let z = find_free_zone(&t, 1, AllocFlags::empty(), 0).unwrap();
        assert_eq!(z.base_pfn(), FRAME_LOWPRIO);
    }

    #[test]
    fn falls_back_to_high_priority_zone_when_low_priority_exhausted() {
        let mut t = ZoneTable::new();
        t.insert(Zone::new(0, FRAME_LOWPRIO, ZoneFlags::AVAILABLE))
            .unwrap();
        let lowprio = Zone::new(FRAME_LOWPRIO, 4, ZoneFlags::AVAILABLE);
        lowprio.alloc(4, 0).unwrap();
        t.insert(lowprio).unwrap();
        let z = find_free_zone(&t, 4, AllocFlags::empty(), 0).unwrap();
        assert_eq!(z.base_pfn(), 0);
    }
}
