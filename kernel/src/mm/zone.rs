//! A single contiguous span of physical memory and its allocation state.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::vec;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use spin::Mutex;

use super::bitmap::Bitmap;
use super::frame::{FrameRecord, ParentHandle};
use crate::error::{KernelError, KernelResult};

bitflags::bitflags! {
    /// Properties of a zone, independent of its allocation state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ZoneFlags: u32 {
        /// Frames in this zone may be handed out by the allocator.
        const AVAILABLE = 1 << 0;
        /// Reserved by firmware or a boot-time carve-out; never allocated.
        const RESERVED  = 1 << 1;
        /// Owned by firmware (ACPI tables, SMM) -- never allocated, never merged.
        const FIRMWARE  = 1 << 2;
        /// Addressable by 32-bit-only DMA engines.
        const LOWMEM    = 1 << 3;
        /// Requires temporary mapping before CPU access.
        const HIGHMEM   = 1 << 4;
    }
}

/// PFN boundary dividing physical memory into *high-priority* frames
/// (below this, scarce, e.g. the low memory a 32-bit-only DMA engine
/// can reach) and *low-priority* frames (at or above it, plentiful).
/// General allocation prefers to draw from the low-priority region,
/// conserving the high-priority one for requests that specifically
/// need it.
pub const FRAME_LOWPRIO: u64 = 256;

struct ZoneInner {
    base_pfn: u64,
    frame_count: u64,
    flags: ZoneFlags,
    bitmap: Bitmap,
    frames: Vec<FrameRecord>,
    free_count: u64,
    busy_count: u64,
}

/// One zone of physical memory: a base PFN, a frame count, a set of
/// [`ZoneFlags`], and the bitmap + per-frame records covering its range.
///
/// All mutation goes through the zone's own lock, so zones are allocated
/// from independently -- a search that spans several zones never holds
/// more than one zone lock at a time.
pub struct Zone {
    inner: Mutex<ZoneInner>,
}

impl Zone {
    /// Non-`AVAILABLE` zones (reserved/firmware carve-outs) get no bitmap
    /// or frame records -- they exist only as address-range annotations
    /// and are never allocated from.
    pub fn new(base_pfn: u64, frame_count: u64, flags: ZoneFlags) -> Self {
        let n = if flags.contains(ZoneFlags::AVAILABLE) {
            frame_count as usize
        } else {
            0
        };
        Self {
            inner: Mutex::new(ZoneInner {
                base_pfn,
                frame_count,
                flags,
                bitmap: Bitmap::new(n),
                frames: vec![FrameRecord::new(); n],
                free_count: frame_count,
                busy_count: 0,
            }),
        }
    }

    pub fn base_pfn(&self) -> u64 {
        self.inner.lock().base_pfn
    }

    pub fn frame_count(&self) -> u64 {
        self.inner.lock().frame_count
    }

    pub fn flags(&self) -> ZoneFlags {
        self.inner.lock().flags
    }

    pub fn free_count(&self) -> u64 {
        self.inner.lock().free_count
    }

    pub fn busy_count(&self) -> u64 {
        self.inner.lock().busy_count
    }

    pub fn end_pfn(&self) -> u64 {
        let inner = self.inner.lock();
        inner.base_pfn + inner.frame_count
    }

    pub fn contains_pfn(&self, pfn: u64) -> bool {
        let inner = self.inner.lock();
        pfn >= inner.base_pfn && pfn < inner.base_pfn + inner.frame_count
    }

    pub fn contains_range(&self, pfn: u64, count: u64) -> bool {
        let inner = self.inner.lock();
        pfn >= inner.base_pfn && pfn + count <= inner.base_pfn + inner.frame_count
    }

    pub fn is_available(&self) -> bool {
        self.flags().contains(ZoneFlags::AVAILABLE)
    }

    /// Non-mutating check: could this zone currently satisfy the request?
    ///
    /// The search always prefers a run that stays within the low-priority
    /// region ([`FRAME_LOWPRIO`] and above), falling back to any run --
    /// this is [`Bitmap::allocate_range`]'s own two-pass behaviour, not
    /// something this call opts into.
    pub fn probe(&self, count: u64, constraint: u64) -> bool {
        let mut inner = self.inner.lock();
        if !inner.flags.contains(ZoneFlags::AVAILABLE) || count > inner.free_count {
            return false;
        }
        let base = inner.base_pfn;
        inner
            .bitmap
            .allocate_range(count as usize, base, FRAME_LOWPRIO, constraint, None)
    }

    /// Reserve `count` contiguous frames and return the PFN of the first.
    pub fn alloc(&self, count: u64, constraint: u64) -> Option<u64> {
        let mut inner = self.inner.lock();
        if !inner.flags.contains(ZoneFlags::AVAILABLE) || count > inner.free_count {
            return None;
        }
        let base = inner.base_pfn;
        let mut start = 0usize;
        let ok = inner
            .bitmap
            .allocate_range(count as usize, base, FRAME_LOWPRIO, constraint, Some(&mut start));
        if !ok {
            return None;
        }
        for i in start..start + count as usize {
            inner.frames[i].refcount = 1;
        }
        inner.free_count -= count;
        inner.busy_count += count;
        Some(base + start as u64)
    }

    /// Drop one reference on each frame in `[pfn, pfn+count)`, freeing any
    /// whose refcount reaches zero. Panics if a frame was already free --
    /// that is a caller bug (double free), not a recoverable error.
    pub fn free(&self, pfn: u64, count: u64) {
        let mut inner = self.inner.lock();
        let rel = (pfn - inner.base_pfn) as usize;
        let mut newly_free = 0u64;
        for i in rel..rel + count as usize {
            let rec = &mut inner.frames[i];
            assert!(rec.refcount > 0, "double free of frame {}", inner.base_pfn + i as u64);
            rec.refcount -= 1;
            if rec.refcount == 0 {
                rec.parent = ParentHandle::NONE;
                newly_free += 1;
            }
        }
        if newly_free > 0 {
            // Only clear bits for frames that actually dropped to zero refs;
            // a shared range may have some frames still held by others.
            for i in rel..rel + count as usize {
                if inner.frames[i].refcount == 0 {
                    inner.bitmap.set(i, false);
                }
            }
            inner.free_count += newly_free;
            inner.busy_count -= newly_free;
        }
    }

    pub fn reference_add(&self, pfn: u64, count: u64) -> KernelResult<()> {
        let mut inner = self.inner.lock();
        let rel = (pfn - inner.base_pfn) as usize;
        for i in rel..rel + count as usize {
            if inner.frames[i].refcount == 0 {
                return Err(KernelError::InvalidAddress {
                    addr: ((inner.base_pfn + i as u64) as usize),
                });
            }
        }
        for i in rel..rel + count as usize {
            inner.frames[i].refcount += 1;
        }
        Ok(())
    }

    /// Permanently remove frames from circulation (firmware carve-outs,
    /// bookkeeping storage for this very zone). Refuses per-frame if the
    /// frame is already busy, leaving it untouched. A non-`AVAILABLE`
    /// zone has no frame storage and is already unavailable by
    /// definition, so this is a no-op there. Returns the number of
    /// frames actually newly withdrawn.
    pub fn mark_unavailable(&self, pfn: u64, count: u64) -> u64 {
        let mut inner = self.inner.lock();
        if !inner.flags.contains(ZoneFlags::AVAILABLE) {
            return 0;
        }
        let rel = (pfn - inner.base_pfn) as usize;
        let mut withdrawn = 0u64;
        for i in rel..rel + count as usize {
            if inner.frames[i].refcount > 0 {
                continue;
            }
            inner.frames[i].refcount = u32::MAX;
            inner.bitmap.set(i, true);
            withdrawn += 1;
        }
        inner.free_count -= withdrawn;
        inner.busy_count += withdrawn;
        withdrawn
    }

    pub fn set_parent(&self, pfn: u64, parent: ParentHandle) -> KernelResult<()> {
        let mut inner = self.inner.lock();
        let rel = (pfn - inner.base_pfn) as usize;
        if inner.frames[rel].refcount == 0 {
            return Err(KernelError::InvalidAddress {
                addr: pfn as usize,
            });
        }
        inner.frames[rel].parent = parent;
        Ok(())
    }

    pub fn get_parent(&self, pfn: u64) -> KernelResult<ParentHandle> {
        let inner = self.inner.lock();
        let rel = (pfn - inner.base_pfn) as usize;
        if inner.frames[rel].refcount == 0 {
            return Err(KernelError::InvalidAddress {
                addr: pfn as usize,
            });
        }
        Ok(inner.frames[rel].parent)
    }

    /// Consume `self` and `other` (which must be adjacent) into a single
    /// zone covering both ranges. `other` must be the higher-addressed
    /// half. Used only by [`super::zone_table::ZoneTable::zone_merge`],
    /// which already holds the table lock so no new zone can appear
    /// mid-merge.
    pub(super) fn merge_with(self, other: Zone) -> KernelResult<Zone> {
        let a = self.inner.into_inner();
        let b = other.inner.into_inner();
        if a.base_pfn + a.frame_count != b.base_pfn {
            return Err(KernelError::InvalidArgument {
                name: "zone_merge",
                value: "zones are not adjacent",
            });
        }
        if a.flags != b.flags {
            return Err(KernelError::InvalidArgument {
                name: "zone_merge",
                value: "zones have different flags",
            });
        }
        if !a.flags.contains(ZoneFlags::AVAILABLE) {
            return Err(KernelError::InvalidArgument {
                name: "zone_merge",
                value: "only AVAILABLE zones carry bitmap/frame storage to merge",
            });
        }
        let frame_count = a.frame_count + b.frame_count;
        let mut bitmap = Bitmap::new(frame_count as usize);
        let mut frames = Vec::with_capacity(frame_count as usize);
        for i in 0..a.frame_count as usize {
            bitmap.set(i, a.bitmap.get(i));
            frames.push(a.frames[i]);
        }
        for i in 0..b.frame_count as usize {
            bitmap.set(a.frame_count as usize + i, b.bitmap.get(i));
            frames.push(b.frames[i]);
        }
        Ok(Zone {
            inner: Mutex::new(ZoneInner {
                base_pfn: a.base_pfn,
                frame_count,
                flags: a.flags,
                bitmap,
                frames,
                free_count: a.free_count + b.free_count,
                busy_count: a.busy_count + b.busy_count,
            }),
        })
    }
}
