//! Slab registry: the sole source of truth for handle validity.
//!
//! A flat array keyed by slab id, read lock-free (`AtomicPtr` published
//! with release, read with acquire) and grown under a mutex. Keyed by id
//! rather than address, since handles already carry `slab_id` directly
//! and need no address lookup.
//!
//! Growing the registry allocates a new, larger backing array and copies
//! every existing entry into it, then publishes the new array and leaks
//! the old one (`Box::leak`) rather than freeing it: a reader may have
//! already loaded the old segment pointer and must keep observing valid
//! memory there for the remainder of the process, mirroring the "slabs
//! are never unmapped" guarantee that the same consumers rely on for slab
//! headers themselves.

use crate::config::REGISTRY_INITIAL_CAPACITY;
use crate::handle::next_generation;
use crate::slab::Slab;
use crate::sync::SpinMutex;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

struct Entry {
    ptr: AtomicPtr<Slab>,
    generation: AtomicU32,
}

impl Entry {
    const fn empty() -> Self {
        Entry {
            ptr: AtomicPtr::new(core::ptr::null_mut()),
            generation: AtomicU32::new(0),
        }
    }
}

struct Segment {
    entries: alloc::boxed::Box<[Entry]>,
}

/// Growable, lock-free-read slab registry.
pub struct Registry {
    current: AtomicPtr<Segment>,
    grow_lock: SpinMutex<()>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        let entries: alloc::boxed::Box<[Entry]> = (0..REGISTRY_INITIAL_CAPACITY)
            .map(|_| Entry::empty())
            .collect();
        let seg = alloc::boxed::Box::leak(alloc::boxed::Box::new(Segment { entries }));
        Registry {
            current: AtomicPtr::new(seg as *mut Segment),
            grow_lock: SpinMutex::new(()),
            next_id: AtomicU64::new(0),
        }
    }

    #[inline]
    fn segment(&self) -> &Segment {
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    /// Reserve the next slab id, growing the backing array if needed.
    /// Returns `None` only if the crate's hard id-space ceiling (bounded
    /// by the handle's 22-bit slab_id field) would be exceeded.
    pub fn allocate_id(&self) -> Option<u32> {
        let _guard = self.grow_lock.lock();
        let id = self.next_id.load(Ordering::Relaxed);
        if id > crate::handle::SLAB_ID_MASK as u64 {
            return None;
        }
        let seg = self.segment();
        if id as usize >= seg.entries.len() {
            self.grow(seg.entries.len() * 2);
        }
        self.next_id.store(id + 1, Ordering::Relaxed);
        Some(id as u32)
    }

    /// Precondition: caller holds `grow_lock` (via `allocate_id`).
    fn grow(&self, new_capacity: usize) {
        let old = self.segment();
        let mut entries: alloc::vec::Vec<Entry> = alloc::vec::Vec::with_capacity(new_capacity);
        for e in old.entries.iter() {
            entries.push(Entry {
                ptr: AtomicPtr::new(e.ptr.load(Ordering::Relaxed)),
                generation: AtomicU32::new(e.generation.load(Ordering::Relaxed)),
            });
        }
        for _ in old.entries.len()..new_capacity {
            entries.push(Entry::empty());
        }
        let new_seg = alloc::boxed::Box::leak(alloc::boxed::Box::new(Segment {
            entries: entries.into_boxed_slice(),
        }));
        self.current.store(new_seg as *mut Segment, Ordering::Release);
        // Old segment is intentionally leaked; see module doc comment.
    }

    /// Publish a slab's pointer at `id` with release ordering.
    pub fn publish(&self, id: u32, ptr: *mut Slab) {
        self.segment().entries[id as usize]
            .ptr
            .store(ptr, Ordering::Release);
    }

    /// Bump `id`'s generation (wrap skips zero). Returns the new value.
    /// Callers must serialize this externally (the owning class mutex);
    /// it is not itself a CAS loop.
    pub fn bump_generation(&self, id: u32) -> u32 {
        let entry = &self.segment().entries[id as usize];
        let prev = entry.generation.load(Ordering::Relaxed);
        let next = next_generation(prev);
        entry.generation.store(next, Ordering::Release);
        next
    }

    /// Current generation for `id`, for forming a freshly-published handle.
    pub fn current_generation(&self, id: u32) -> u32 {
        self.segment().entries[id as usize]
            .generation
            .load(Ordering::Acquire)
    }

    /// Three-step validation handshake: pointer (acquire), null check,
    /// generation (acquire), match check.
    pub fn lookup_and_validate(&self, id: u32, generation: u32) -> Option<*mut Slab> {
        let seg = self.segment();
        let entry = seg.entries.get(id as usize)?;
        let ptr = entry.ptr.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        let cur_gen = entry.generation.load(Ordering::Acquire);
        if cur_gen != generation {
            return None;
        }
        Some(ptr)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for Registry {}
unsafe impl Sync for Registry {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn allocate_publish_lookup_round_trip() {
        let reg = Registry::new();
        let id = reg.allocate_id().unwrap();
        let r#gen = reg.bump_generation(id);
        let mut page = vec![0u8; 4096];
        let ptr = page.as_mut_ptr() as *mut Slab;
        reg.publish(id, ptr);
        assert_eq!(reg.lookup_and_validate(id, r#gen), Some(ptr));
        assert_eq!(reg.lookup_and_validate(id, r#gen + 1), None);
    }

    #[test]
    fn growth_preserves_existing_entries() {
        let reg = Registry::new();
        let mut ids = alloc::vec::Vec::new();
        // Force at least one growth cycle.
        for _ in 0..(REGISTRY_INITIAL_CAPACITY + 10) {
            let id = reg.allocate_id().unwrap();
            let r#gen = reg.bump_generation(id);
            let mut page = vec![0u8; 4096];
            reg.publish(id, page.as_mut_ptr() as *mut Slab);
            core::mem::forget(page);
            ids.push((id, r#gen));
        }
        for (id, r#gen) in ids {
            assert!(reg.lookup_and_validate(id, r#gen).is_some());
        }
    }

    #[test]
    fn generation_wrap_skips_zero_through_bump() {
        let reg = Registry::new();
        let id = reg.allocate_id().unwrap();
        reg.segment().entries[id as usize]
            .generation
            .store(crate::handle::GENERATION_MASK, Ordering::Relaxed);
        assert_eq!(reg.bump_generation(id), 1);
    }
}
