//! Per-size-class empty-slab recycling cache.
//!
//! Two tiers guarded by one mutex: a fixed-capacity LIFO array and an
//! unbounded spillover list. Entries are `(pointer, id, was_published)`
//! triples held off-page rather than inside the slab itself, since a
//! cached slab's header may be zeroed by a discard hint at any point
//! after it enters the cache.

use crate::config::SLAB_CACHE_ARRAY_CAP;
use crate::slab::Slab;
use crate::sync::SpinMutex;
use alloc::collections::VecDeque;

/// A cached slab's off-page metadata, captured at `cache_push` time so it
/// survives a `hint_not_needed` zeroing the header itself.
#[derive(Clone, Copy)]
pub struct CacheEntry {
    pub ptr: *mut Slab,
    pub slab_id: u32,
    pub was_published: bool,
}

unsafe impl Send for CacheEntry {}

struct Inner {
    array: [Option<CacheEntry>; SLAB_CACHE_ARRAY_CAP],
    array_len: usize,
    spillover: VecDeque<CacheEntry>,
}

/// Per-size-class cache. One instance lives inside each size class
/// allocator; it does not itself know which size class it serves.
pub struct SlabCache {
    inner: SpinMutex<Inner>,
}

impl SlabCache {
    pub fn new() -> Self {
        SlabCache {
            inner: SpinMutex::new(Inner {
                array: [None; SLAB_CACHE_ARRAY_CAP],
                array_len: 0,
                spillover: VecDeque::new(),
            }),
        }
    }

    /// Insert a retired, already off-list slab entry. Returns whether it
    /// landed in the fixed array (`true`) or the spillover list (`false`)
    /// — callers use this to bump `empty_slab_recycled` vs
    /// `empty_slab_overflowed`.
    pub fn push(&self, entry: CacheEntry) -> bool {
        let mut inner = self.inner.lock();
        if inner.array_len < SLAB_CACHE_ARRAY_CAP {
            let idx = inner.array_len;
            inner.array[idx] = Some(entry);
            inner.array_len += 1;
            true
        } else {
            inner.spillover.push_back(entry);
            false
        }
    }

    /// Pop the most recently cached entry, array tier first.
    pub fn pop(&self) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        if inner.array_len > 0 {
            inner.array_len -= 1;
            let idx = inner.array_len;
            inner.array[idx].take()
        } else {
            inner.spillover.pop_back()
        }
    }
}

impl Default for SlabCache {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for SlabCache {}
unsafe impl Sync for SlabCache {}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32) -> CacheEntry {
        CacheEntry {
            ptr: core::ptr::null_mut(),
            slab_id: id,
            was_published: id % 2 == 0,
        }
    }

    #[test]
    fn lifo_within_array_tier() {
        let cache = SlabCache::new();
        cache.push(entry(1));
        cache.push(entry(2));
        assert_eq!(cache.pop().unwrap().slab_id, 2);
        assert_eq!(cache.pop().unwrap().slab_id, 1);
        assert!(cache.pop().is_none());
    }

    #[test]
    fn overflows_into_spillover_past_array_cap() {
        let cache = SlabCache::new();
        for i in 0..(SLAB_CACHE_ARRAY_CAP as u32 + 5) {
            let landed_in_array = cache.push(entry(i));
            assert_eq!(landed_in_array, i < SLAB_CACHE_ARRAY_CAP as u32);
        }
        let mut popped = 0;
        while cache.pop().is_some() {
            popped += 1;
        }
        assert_eq!(popped, SLAB_CACHE_ARRAY_CAP + 5);
    }
}
