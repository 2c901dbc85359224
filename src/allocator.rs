//! Allocator root: aggregates the registry, epoch ring, label table, and
//! one [`SizeClassAllocator`] per size class; exposes the public API.
//!
//! There is no `GlobalAlloc` surface — allocation is always handle-based —
//! so `Allocator` is an ordinary owned struct; construction and teardown
//! follow Rust's normal ownership/`Drop` discipline.

use crate::class_allocator::{AllocError, SizeClassAllocator};
use crate::config::{EPOCH_RING_SIZE, LABEL_MAX_LEN, NUM_SIZE_CLASSES};
use crate::epoch::{EpochRing, LabelTable};
use crate::handle::{self, Handle};
use crate::registry::Registry;
use crate::size_class;
use crate::stats::{self, ClassSnapshot, EpochSnapshot, GlobalSnapshot, GlobalStats};
use core::ptr::NonNull;
use core::sync::atomic::Ordering;

/// Typed failure reasons for the calls where a caller benefits from
/// knowing *why*. `free` keeps a plain `bool` return — it never needs a
/// typed reason, since every failure mode means the same thing: nothing
/// was freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TslabError {
    SizeTooLarge,
    SizeZero,
    InvalidEpoch,
    EpochClosing,
    OutOfMemory,
    LabelTableFull,
}

impl From<AllocError> for TslabError {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::InvalidEpoch => TslabError::InvalidEpoch,
            AllocError::EpochClosing => TslabError::EpochClosing,
            AllocError::OutOfMemory => TslabError::OutOfMemory,
        }
    }
}

#[cfg(feature = "std")]
fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(not(feature = "std"))]
fn now_ns() -> u64 {
    0
}

/// The allocator root. Owns the registry, epoch ring, label table, and the
/// eight size-class allocators.
pub struct Allocator {
    registry: Registry,
    epochs: EpochRing,
    labels: LabelTable,
    // Index 0 is the sentinel (no size class 0); classes are 1..=8.
    classes: [SizeClassAllocator; NUM_SIZE_CLASSES],
    stats: GlobalStats,
}

impl Allocator {
    pub fn new() -> Self {
        Allocator {
            registry: Registry::new(),
            epochs: EpochRing::new(now_ns()),
            labels: LabelTable::new(),
            classes: core::array::from_fn(SizeClassAllocator::new),
            stats: GlobalStats::new(),
        }
    }

    /// Map a byte count to its size class, or fail for zero/oversized
    /// requests.
    fn class_for(size: usize) -> Result<usize, TslabError> {
        if size == 0 {
            return Err(TslabError::SizeZero);
        }
        size_class::size_to_class(size).ok_or(TslabError::SizeTooLarge)
    }

    /// Allocate `size` bytes into `epoch`. Returns the object pointer and
    /// its handle.
    pub fn allocate(&self, size: usize, epoch: u32) -> Result<(NonNull<u8>, Handle), TslabError> {
        let class = Self::class_for(size)?;
        let (ptr, h) = self.classes[class].allocate(&self.epochs, epoch, &self.registry)?;
        let non_null = NonNull::new(ptr).ok_or(TslabError::OutOfMemory)?;
        Ok((non_null, h))
    }

    /// Validate and free `h`. Returns `false` on any invalid, stale, or
    /// already-freed handle; never panics, never touches memory on
    /// failure.
    pub fn free(&self, h: Handle) -> bool {
        let decoded = match handle::decode(h) {
            Some(d) => d,
            None => return false,
        };
        if decoded.version != handle::CURRENT_VERSION {
            return false;
        }
        if !size_class::is_valid_class(decoded.size_class as usize) {
            return false;
        }
        self.classes[decoded.size_class as usize].free(
            &self.registry,
            decoded.size_class,
            decoded.slot,
            decoded.generation,
            decoded.slab_id,
        )
    }

    /// Ring index of the current active epoch.
    pub fn epoch_current(&self) -> u32 {
        self.epochs.current_index()
    }

    /// Rotate the ring: mark the previous epoch `CLOSING`, activate the
    /// next, and null every class's `current_partial` for the retired
    /// epoch so fast-path threads fall through to the slow-path gate.
    pub fn epoch_advance(&self) -> u32 {
        let old = self.epochs.current_index();
        let new_index = self.epochs.advance(now_ns());
        for class in &self.classes[1..] {
            class.retire_current_partial(old);
        }
        new_index
    }

    /// Explicit reclamation trigger: mark `epoch` `CLOSING` and
    /// aggressively recycle every slab it left empty, across every size
    /// class, outside the per-class lock.
    pub fn epoch_close(&self, epoch: u32) -> Result<(), TslabError> {
        if epoch as usize >= EPOCH_RING_SIZE {
            return Err(TslabError::InvalidEpoch);
        }
        let e = self.epochs.get(epoch).ok_or(TslabError::InvalidEpoch)?;
        e.set_rss_before(stats::current_rss_bytes());
        self.epochs.close(epoch);
        let started_ns = now_ns();

        let mut scanned: u64 = 0;
        let mut recycled: u64 = 0;
        for class in &self.classes[1..] {
            let empties = class.collect_empties_for_close(epoch);
            scanned += empties.len() as u64;
            for slab_ptr in empties {
                let (_, hint_outcome) = class.cache_push_empty(slab_ptr, true);
                if let Some(succeeded) = hint_outcome {
                    self.stats.madvise_calls.fetch_add(1, Ordering::Relaxed);
                    if !succeeded {
                        self.stats.madvise_failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
                recycled += 1;
            }
        }
        self.stats.epoch_close_scanned_slabs.fetch_add(scanned, Ordering::Relaxed);
        self.stats.epoch_close_recycled_slabs.fetch_add(recycled, Ordering::Relaxed);
        self.stats
            .epoch_close_total_ns
            .fetch_add(now_ns().saturating_sub(started_ns), Ordering::Relaxed);
        e.set_rss_after(stats::current_rss_bytes());
        Ok(())
    }

    /// Intern and attach a label (truncated to 31 bytes) to `epoch`.
    pub fn set_label(&self, epoch: u32, label: &str) -> Result<(), TslabError> {
        let e = self.epochs.get(epoch).ok_or(TslabError::InvalidEpoch)?;
        let id = self.labels.intern(label);
        if id == 0 && !label.is_empty() {
            return Err(TslabError::LabelTableFull);
        }
        e.set_label_id(id);
        Ok(())
    }

    pub fn inc_refcount(&self, epoch: u32) -> Option<u32> {
        self.epochs.get(epoch).map(|e| e.inc_refcount())
    }

    pub fn dec_refcount(&self, epoch: u32) -> Option<u32> {
        self.epochs.get(epoch).map(|e| e.dec_refcount())
    }

    pub fn get_refcount(&self, epoch: u32) -> Option<u32> {
        self.epochs.get(epoch).map(|e| e.refcount())
    }

    /// Process-wide counters, merged with page-size/epoch-ring derived
    /// fields and summed per-class cumulative counters. No lock is held
    /// across the call.
    pub fn snapshot_stats_global(&self) -> GlobalSnapshot {
        let mut active = 0u32;
        let mut closing = 0u32;
        for i in 0..EPOCH_RING_SIZE as u32 {
            match self.epochs.get(i) {
                Some(e) if e.is_active() => active += 1,
                Some(_) => closing += 1,
                None => {}
            }
        }

        let mut total_allocated: u64 = 0;
        let mut total_recycled: u64 = 0;
        for class in &self.classes[1..] {
            let snap = stats::snapshot_class(&class.stats);
            total_allocated += snap.new_slab_count;
            total_recycled += snap.empty_slab_recycled + snap.empty_slab_overflowed;
        }
        let counters = stats::snapshot_global(&self.stats);

        GlobalSnapshot {
            schema_version: stats::SCHEMA_VERSION,
            timestamp_ns: now_ns(),
            pid: 0,
            page_size: crate::config::PAGE_SIZE,
            epoch_count: EPOCH_RING_SIZE,
            current_epoch: self.epochs.current_index(),
            active_epoch_count: active,
            closing_epoch_count: closing,
            total_slabs_allocated: total_allocated,
            total_slabs_recycled: total_recycled,
            net_slabs: total_allocated as i64 - total_recycled as i64,
            rss_bytes_current: stats::current_rss_bytes(),
            estimated_slab_rss_bytes: total_allocated.saturating_sub(total_recycled)
                * crate::config::PAGE_SIZE as u64,
            madvise_calls: counters.madvise_calls,
            madvise_failures: counters.madvise_failures,
        }
    }

    pub fn snapshot_stats_class(&self, class: usize) -> Option<ClassSnapshot> {
        if !size_class::is_valid_class(class) {
            return None;
        }
        let mut snap = stats::snapshot_class(&self.classes[class].stats);
        snap.size_class = class;
        snap.object_size = self.classes[class].object_size();
        Some(snap)
    }

    pub fn snapshot_stats_epoch(&self, epoch: u32) -> Option<EpochSnapshot> {
        let e = self.epochs.get(epoch)?;
        let (before, after) = e.rss_snapshots();
        let mut label = [0u8; LABEL_MAX_LEN];
        let label_len = self.labels.get(e.label_id(), &mut label);
        Some(EpochSnapshot {
            epoch_index: epoch,
            is_active: e.is_active(),
            era: e.era(),
            opened_at_ns: e.opened_at_ns(),
            refcount: e.refcount(),
            label_len,
            label,
            rss_before: before,
            rss_after: after,
        })
    }

    /// Compile-time page size; always a power of two.
    pub const fn page_size() -> usize {
        crate::config::PAGE_SIZE
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for Allocator {}
unsafe impl Sync for Allocator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_write_free_round_trip() {
        let a = Allocator::new();
        let epoch = a.epoch_current();
        let (ptr, h) = a.allocate(128, epoch).unwrap();
        unsafe { *ptr.as_ptr() = 0xA5 };
        assert!(a.free(h));
        assert!(!a.free(h));
    }

    #[test]
    fn zero_and_oversized_requests_fail() {
        let a = Allocator::new();
        let epoch = a.epoch_current();
        assert_eq!(a.allocate(0, epoch).unwrap_err(), TslabError::SizeZero);
        assert_eq!(a.allocate(769, epoch).unwrap_err(), TslabError::SizeTooLarge);
    }

    #[test]
    fn epoch_advance_rotates_and_closing_rejects_allocation() {
        let a = Allocator::new();
        let e0 = a.epoch_current();
        let h1 = a.allocate(64, e0).unwrap();
        let e1 = a.epoch_advance();
        assert_ne!(e0, e1);
        assert_eq!(a.allocate(64, e0).unwrap_err(), TslabError::EpochClosing);
        assert!(a.free(h1.1));
    }

    #[test]
    fn epoch_close_reclaims_empty_slabs() {
        let a = Allocator::new();
        let epoch = a.epoch_current();
        let mut handles = alloc::vec::Vec::new();
        for _ in 0..200 {
            handles.push(a.allocate(128, epoch).unwrap().1);
        }
        for h in handles {
            assert!(a.free(h));
        }
        a.epoch_close(epoch).unwrap();
        let snap = a.snapshot_stats_global();
        assert!(snap.total_slabs_recycled > 0);
    }

    #[test]
    fn labels_intern_and_are_readable() {
        let a = Allocator::new();
        let epoch = a.epoch_current();
        a.set_label(epoch, "checkout-request").unwrap();
        let snap = a.snapshot_stats_epoch(epoch).unwrap();
        assert_eq!(&snap.label[..snap.label_len], b"checkout-request");
    }

    #[test]
    fn invalid_handle_and_double_free_are_rejected_not_fatal() {
        let a = Allocator::new();
        assert!(!a.free(0));
        assert!(!a.free(0xDEAD_BEEF_DEAD_BEEFu64));
    }
}
