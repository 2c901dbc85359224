//! Epoch ring and label table.
//!
//! The `Active`/`Closing` state transition uses the same `SpinMutex` +
//! atomic-pointer publish/null idiom as the `current_partial` fast path
//! in `class_allocator.rs`; the refcount and RSS snapshot counters use
//! the same plain `Relaxed`-atomic style as `stats.rs`.

use crate::config::{EPOCH_RING_SIZE, LABEL_MAX_LEN, LABEL_TABLE_CAP};
use crate::sync::SpinMutex;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Lifecycle state of a ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EpochState {
    Active = 0,
    Closing = 1,
}

/// One slot of the 16-entry epoch ring.
pub struct Epoch {
    state: AtomicU8,
    era: AtomicU64,
    opened_at_ns: AtomicU64,
    label_id: AtomicU32,
    refcount: AtomicU32,
    rss_before: AtomicU64,
    rss_after: AtomicU64,
}

impl Epoch {
    const fn new() -> Self {
        Epoch {
            state: AtomicU8::new(EpochState::Active as u8),
            era: AtomicU64::new(0),
            opened_at_ns: AtomicU64::new(0),
            label_id: AtomicU32::new(0),
            refcount: AtomicU32::new(0),
            rss_before: AtomicU64::new(0),
            rss_after: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn state(&self) -> EpochState {
        if self.state.load(Ordering::Acquire) == EpochState::Closing as u8 {
            EpochState::Closing
        } else {
            EpochState::Active
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state() == EpochState::Active
    }

    #[inline]
    fn set_state(&self, state: EpochState, ordering: Ordering) {
        self.state.store(state as u8, ordering);
    }

    #[inline]
    pub fn era(&self) -> u64 {
        self.era.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn label_id(&self) -> u32 {
        self.label_id.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_label_id(&self, id: u32) {
        self.label_id.store(id, Ordering::Relaxed);
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn inc_refcount(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn dec_refcount(&self) -> u32 {
        self.refcount.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    #[inline]
    pub fn opened_at_ns(&self) -> u64 {
        self.opened_at_ns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn rss_snapshots(&self) -> (u64, u64) {
        (
            self.rss_before.load(Ordering::Relaxed),
            self.rss_after.load(Ordering::Relaxed),
        )
    }

    #[inline]
    pub fn set_rss_before(&self, v: u64) {
        self.rss_before.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_rss_after(&self, v: u64) {
        self.rss_after.store(v, Ordering::Relaxed);
    }
}

/// The 16-slot cyclic buffer of epoch states plus the global index/era
/// counters.
pub struct EpochRing {
    slots: [Epoch; EPOCH_RING_SIZE],
    current_index: AtomicU32,
    global_era: AtomicU64,
}

impl EpochRing {
    pub fn new(now_ns: u64) -> Self {
        let ring = EpochRing {
            slots: core::array::from_fn(|_| Epoch::new()),
            current_index: AtomicU32::new(0),
            global_era: AtomicU64::new(0),
        };
        ring.slots[0].opened_at_ns.store(now_ns, Ordering::Relaxed);
        ring
    }

    #[inline]
    pub fn current_index(&self) -> u32 {
        self.current_index.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<&Epoch> {
        self.slots.get(index as usize)
    }

    /// Advance the ring: mark the old current epoch `CLOSING`, select the
    /// next slot (mod 16), stamp a fresh era, and reset its metadata.
    pub fn advance(&self, now_ns: u64) -> u32 {
        let old_index = self.current_index.load(Ordering::Relaxed);
        self.slots[old_index as usize].set_state(EpochState::Closing, Ordering::Relaxed);

        let new_index = (old_index + 1) % EPOCH_RING_SIZE as u32;
        let new_era = self.global_era.fetch_add(1, Ordering::Relaxed) + 1;

        let new_slot = &self.slots[new_index as usize];
        new_slot.set_state(EpochState::Active, Ordering::Relaxed);
        new_slot.era.store(new_era, Ordering::Release);
        new_slot.opened_at_ns.store(now_ns, Ordering::Relaxed);
        new_slot.refcount.store(0, Ordering::Relaxed);
        new_slot.label_id.store(0, Ordering::Relaxed);
        new_slot.rss_before.store(0, Ordering::Relaxed);
        new_slot.rss_after.store(0, Ordering::Relaxed);

        self.current_index.store(new_index, Ordering::Relaxed);
        new_index
    }

    /// Explicit close: mark `index` CLOSING with release ordering, pairing
    /// with the acquire load on the allocation fast-path gate.
    pub fn close(&self, index: u32) {
        self.slots[index as usize].set_state(EpochState::Closing, Ordering::Release);
    }
}

unsafe impl Send for EpochRing {}
unsafe impl Sync for EpochRing {}

/// A fixed-capacity interned string table. Id 0 is reserved for
/// "unlabeled"; once full, further distinct labels bucket to id 0.
pub struct LabelTable {
    inner: SpinMutex<LabelInner>,
}

struct LabelInner {
    // Entry 0 is always "unlabeled" (empty string, len 0).
    bufs: [[u8; LABEL_MAX_LEN]; LABEL_TABLE_CAP],
    lens: [u8; LABEL_TABLE_CAP],
    count: usize,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable {
            inner: SpinMutex::new(LabelInner {
                bufs: [[0u8; LABEL_MAX_LEN]; LABEL_TABLE_CAP],
                lens: [0u8; LABEL_TABLE_CAP],
                count: 1,
            }),
        }
    }

    /// Intern `label`, truncated to `LABEL_MAX_LEN` bytes. Returns the
    /// same id for repeated identical strings; buckets to 0 once full.
    pub fn intern(&self, label: &str) -> u32 {
        let bytes = label.as_bytes();
        let len = bytes.len().min(LABEL_MAX_LEN);
        let trimmed = &bytes[..len];
        if len == 0 {
            return 0;
        }

        let mut inner = self.inner.lock();
        for id in 1..inner.count {
            let existing_len = inner.lens[id] as usize;
            if existing_len == len && &inner.bufs[id][..existing_len] == trimmed {
                return id as u32;
            }
        }
        if inner.count >= LABEL_TABLE_CAP {
            return 0;
        }
        let id = inner.count;
        inner.bufs[id][..len].copy_from_slice(trimmed);
        inner.lens[id] = len as u8;
        inner.count += 1;
        id as u32
    }

    /// Copy the label string for `id` into `out`, returning the byte
    /// length written. Returns 0 for the reserved "unlabeled" id or an
    /// out-of-range id.
    pub fn get(&self, id: u32, out: &mut [u8; LABEL_MAX_LEN]) -> usize {
        let inner = self.inner.lock();
        if id == 0 || id as usize >= inner.count {
            return 0;
        }
        let len = inner.lens[id as usize] as usize;
        out[..len].copy_from_slice(&inner.bufs[id as usize][..len]);
        len
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_marks_old_closing_and_new_active_with_fresh_era() {
        let ring = EpochRing::new(0);
        let e0_era = ring.get(0).unwrap().era();
        let new_idx = ring.advance(1);
        assert_eq!(new_idx, 1);
        assert_eq!(ring.get(0).unwrap().state(), EpochState::Closing);
        assert_eq!(ring.get(1).unwrap().state(), EpochState::Active);
        assert!(ring.get(1).unwrap().era() > e0_era);
    }

    #[test]
    fn wraps_after_sixteen_advances_with_new_era() {
        let ring = EpochRing::new(0);
        let e0_era_initial = ring.get(0).unwrap().era();
        for i in 0..EPOCH_RING_SIZE as u64 {
            ring.advance(i + 1);
        }
        assert_eq!(ring.current_index(), 0);
        assert_eq!(ring.get(0).unwrap().state(), EpochState::Active);
        assert!(ring.get(0).unwrap().era() > e0_era_initial);
    }

    #[test]
    fn close_marks_closing() {
        let ring = EpochRing::new(0);
        ring.close(0);
        assert_eq!(ring.get(0).unwrap().state(), EpochState::Closing);
    }

    #[test]
    fn label_interning_reuses_ids_and_buckets_overflow_to_zero() {
        let table = LabelTable::new();
        let a = table.intern("requests");
        let b = table.intern("requests");
        assert_eq!(a, b);
        assert_ne!(a, 0);

        for i in 0..(LABEL_TABLE_CAP * 2) {
            table.intern(&alloc::format!("label-{i}"));
        }
        // Table capacity is fixed; a fresh unique label after it's full
        // must bucket to 0.
        let overflow = table.intern("definitely-new-unique-label");
        assert_eq!(overflow, 0);
    }

    #[test]
    fn empty_label_is_unlabeled() {
        let table = LabelTable::new();
        assert_eq!(table.intern(""), 0);
    }
}
