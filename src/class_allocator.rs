//! Size-class allocator: owns the per-epoch partial/full lists, the
//! recycling cache, and the adaptive bitmap-scan controller for one size
//! class.
//!
//! A central mutex guards the per-epoch partial/full lists; a lock-free
//! `current_partial` pointer per epoch serves the fast path. The
//! CAS-protected bitmap scan and the zombie-partial repair build on the
//! bitmap idiom in `bitmap.rs`.

use crate::cache::{CacheEntry, SlabCache};
use crate::config::{
    ADAPTIVE_SCAN_CHECK_PERIOD, ADAPTIVE_SCAN_DWELL, ADAPTIVE_SCAN_ENTER_RATE,
    ADAPTIVE_SCAN_EXIT_RATE, ADAPTIVE_SCAN_WINDOW, EPOCH_RING_SIZE,
};
use crate::epoch::EpochRing;
use crate::handle::encode;
use crate::list::SlabList;
use crate::platform;
use crate::registry::Registry;
use crate::size_class::class_to_size;
use crate::slab::{ListId, Slab};
use crate::stats::ClassStats;
use crate::sync::SpinMutex;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};

/// Why `allocate` failed, mirroring the disposition table: these are all
/// non-fatal, returned conditions — never panics, never aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    InvalidEpoch,
    EpochClosing,
    OutOfMemory,
}

#[derive(Default)]
struct EpochLists {
    partial: SlabList,
    full: SlabList,
}

/// Per-thread hashed scan-start offset cache, populated lazily.
fn thread_scan_hash() -> usize {
    // A cheap, allocation-free per-thread identity: the address of a
    // thread-local byte. Stable for the thread's lifetime, varies across
    // threads, which is all the randomized scan-start needs.
    thread_local_marker() as usize
}

fn thread_local_marker() -> *const u8 {
    #[cfg(feature = "std")]
    {
        std::thread_local! {
            static MARKER: u8 = 0;
        }
        MARKER.with(|m| m as *const u8)
    }
    #[cfg(not(feature = "std"))]
    {
        static MARKER: u8 = 0;
        &MARKER as *const u8
    }
}

pub struct SizeClassAllocator {
    class: usize,
    object_size: usize,
    lists: SpinMutex<[EpochLists; EPOCH_RING_SIZE]>,
    current_partial: [AtomicPtr<Slab>; EPOCH_RING_SIZE],
    empty_partial_count: [AtomicU32; EPOCH_RING_SIZE],
    cache: SlabCache,
    pub stats: ClassStats,

    // Adaptive scan controller: single-writer, CAS-guarded.
    scan_controller_busy: AtomicBool,
    randomized_mode: AtomicBool,
    dwell: AtomicU32,
    last_sample_attempts: AtomicU64,
    last_sample_retries: AtomicU64,
    acquisitions_since_check: AtomicU64,
}

impl SizeClassAllocator {
    pub fn new(class: usize) -> Self {
        SizeClassAllocator {
            class,
            object_size: class_to_size(class),
            lists: SpinMutex::new(core::array::from_fn(|_| EpochLists::default())),
            current_partial: core::array::from_fn(|_| AtomicPtr::new(core::ptr::null_mut())),
            empty_partial_count: core::array::from_fn(|_| AtomicU32::new(0)),
            cache: SlabCache::new(),
            stats: ClassStats::new(),
            scan_controller_busy: AtomicBool::new(false),
            randomized_mode: AtomicBool::new(false),
            dwell: AtomicU32::new(0),
            last_sample_attempts: AtomicU64::new(0),
            last_sample_retries: AtomicU64::new(0),
            acquisitions_since_check: AtomicU64::new(0),
        }
    }

    #[inline]
    fn scan_start_word(&self) -> usize {
        if self.randomized_mode.load(Ordering::Relaxed) {
            thread_scan_hash()
        } else {
            0
        }
    }

    /// The lock-free fast path plus the slow path fallback.
    pub fn allocate(
        &self,
        epochs: &EpochRing,
        epoch_idx: u32,
        registry: &Registry,
    ) -> Result<(*mut u8, u64), AllocError> {
        let epoch = epochs.get(epoch_idx).ok_or(AllocError::InvalidEpoch)?;
        if !epoch.is_active() {
            self.stats.slow_path_epoch_closed.fetch_add(1, Ordering::Relaxed);
            return Err(AllocError::EpochClosing);
        }

        if let Some(result) = self.try_fast_path(epoch_idx, registry) {
            self.on_successful_acquisition();
            return Ok(result);
        }

        self.allocate_slow(epochs, epoch_idx, registry)
    }

    fn try_fast_path(&self, epoch_idx: u32, registry: &Registry) -> Option<(*mut u8, u64)> {
        let ptr = self.current_partial[epoch_idx as usize].load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        let slab = unsafe { &*ptr };
        if !slab.is_valid_magic() {
            return None;
        }

        let start_word = self.scan_start_word();
        let (slot, retries) = slab.acquire_slot(start_word);
        self.stats.bitmap_alloc_attempts.fetch_add(1, Ordering::Relaxed);
        self.stats.bitmap_alloc_cas_retries.fetch_add(retries, Ordering::Relaxed);

        match slot {
            Some(slot) => {
                let prev_free = slab.free_count_sub(1);
                if prev_free as usize == slab.object_count() {
                    self.empty_partial_count[epoch_idx as usize].fetch_sub(1, Ordering::Relaxed);
                }
                if prev_free == 1 {
                    self.handle_became_full(ptr, epoch_idx);
                }
                let generation = registry.current_generation(slab.slab_id());
                let handle = encode(self.class as u32, slot, generation, slab.slab_id());
                Some((slab.slot_ptr(slot), handle))
            }
            None => {
                // Observed full: retire from the fast path and attempt repair.
                if self.current_partial[epoch_idx as usize]
                    .compare_exchange(
                        ptr,
                        core::ptr::null_mut(),
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_err()
                {
                    self.stats.current_partial_cas_failures.fetch_add(1, Ordering::Relaxed);
                }
                self.repair_if_stably_full(ptr, epoch_idx);
                None
            }
        }
    }

    fn handle_became_full(&self, ptr: *mut Slab, epoch_idx: u32) {
        let mut lists = self.lists.lock();
        let slab = unsafe { &*ptr };
        if slab.list_id() == ListId::Partial {
            lists[epoch_idx as usize].partial.remove(ptr);
            lists[epoch_idx as usize].full.push_front(ptr);
            slab.set_list_id(ListId::Full);
        }
        let successor = lists[epoch_idx as usize].partial.head();
        if !successor.is_null() {
            unsafe { (*successor).set_published() };
        }
        self.current_partial[epoch_idx as usize].store(successor, Ordering::Release);
    }

    fn repair_if_stably_full(&self, ptr: *mut Slab, epoch_idx: u32) {
        let slab = unsafe { &*ptr };
        if !slab.is_stably_full() {
            return;
        }
        let mut lists = self.lists.lock();
        if slab.list_id() == ListId::Partial {
            lists[epoch_idx as usize].partial.remove(ptr);
            lists[epoch_idx as usize].full.push_front(ptr);
            slab.set_list_id(ListId::Full);
            self.stats.repair_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn allocate_slow(
        &self,
        epochs: &EpochRing,
        epoch_idx: u32,
        registry: &Registry,
    ) -> Result<(*mut u8, u64), AllocError> {
        let mut tripwire: u64 = 0;
        loop {
            let epoch = epochs.get(epoch_idx).ok_or(AllocError::InvalidEpoch)?;
            if !epoch.is_active() {
                self.stats.slow_path_epoch_closed.fetch_add(1, Ordering::Relaxed);
                return Err(AllocError::EpochClosing);
            }

            let candidate = {
                let mut lists = self.lists.lock();
                let epoch_lists = &mut lists[epoch_idx as usize];
                let mut found: Option<*mut Slab> = None;
                let stale: alloc::vec::Vec<*mut Slab> = epoch_lists
                    .partial
                    .iter()
                    .filter(|&p| {
                        let s = unsafe { &*p };
                        s.free_count() <= 1 && s.is_stably_full()
                    })
                    .collect();
                for p in stale {
                    epoch_lists.partial.remove(p);
                    epoch_lists.full.push_front(p);
                    unsafe { (*p).set_list_id(ListId::Full) };
                    self.stats.repair_events.fetch_add(1, Ordering::Relaxed);
                }
                let head = epoch_lists.partial.head();
                if !head.is_null() {
                    found = Some(head);
                }
                found
            };

            let slab_ptr = match candidate {
                Some(p) => p,
                None => {
                    let fresh = self.obtain_slab(epoch_idx, epochs, registry)?;
                    let mut lists = self.lists.lock();
                    lists[epoch_idx as usize].partial.push_front(fresh);
                    unsafe { (*fresh).set_list_id(ListId::Partial) };
                    unsafe { (*fresh).set_published() };
                    self.current_partial[epoch_idx as usize].store(fresh, Ordering::Release);
                    fresh
                }
            };

            let slab = unsafe { &*slab_ptr };
            if slab.list_id() != ListId::Partial {
                // Lost the race to another thread; retry.
            } else {
                slab.set_published();
                self.current_partial[epoch_idx as usize].store(slab_ptr, Ordering::Release);
            }

            let (slot, retries) = slab.acquire_slot(self.scan_start_word());
            self.stats.bitmap_alloc_attempts.fetch_add(1, Ordering::Relaxed);
            self.stats.bitmap_alloc_cas_retries.fetch_add(retries, Ordering::Relaxed);

            if let Some(slot) = slot {
                let prev_free = slab.free_count_sub(1);
                if prev_free as usize == slab.object_count() {
                    self.empty_partial_count[epoch_idx as usize].fetch_sub(1, Ordering::Relaxed);
                }
                if prev_free == 1 {
                    self.handle_became_full(slab_ptr, epoch_idx);
                }
                self.on_successful_acquisition();
                let generation = registry.current_generation(slab.slab_id());
                let handle = encode(self.class as u32, slot, generation, slab.slab_id());
                return Ok((slab.slot_ptr(slot), handle));
            }

            tripwire += 1;
            if tripwire > crate::config::BITMAP_RETRY_TRIPWIRE {
                crate::diagnostic_abort!("slow-path allocation loop tripwire exceeded");
            }
        }
    }

    /// Pop a recycled slab from the cache, or map a fresh page.
    fn obtain_slab(
        &self,
        epoch_idx: u32,
        epochs: &EpochRing,
        registry: &Registry,
    ) -> Result<*mut Slab, AllocError> {
        let era = epochs.get(epoch_idx).map(|e| e.era()).unwrap_or(0);

        if let Some(CacheEntry {
            ptr,
            slab_id,
            was_published,
        }) = self.cache.pop()
        {
            registry.bump_generation(slab_id);
            let slab = unsafe {
                Slab::init_at(
                    ptr as *mut u8,
                    self.object_size,
                    epoch_idx as u8,
                    era,
                    slab_id,
                    was_published,
                )
            };
            registry.publish(slab_id, slab as *const Slab as *mut Slab);
            return Ok(slab as *const Slab as *mut Slab);
        }

        let page = platform::map_page();
        if page.is_null() {
            return Err(AllocError::OutOfMemory);
        }
        let slab_id = registry.allocate_id().ok_or(AllocError::OutOfMemory)?;
        registry.bump_generation(slab_id);
        let slab = unsafe { Slab::init_at(page, self.object_size, epoch_idx as u8, era, slab_id, false) };
        registry.publish(slab_id, slab as *const Slab as *mut Slab);
        self.stats.new_slab_count.fetch_add(1, Ordering::Relaxed);
        Ok(slab as *const Slab as *mut Slab)
    }

    /// Validate and free a handle already routed to this class.
    pub fn free(&self, registry: &Registry, size_class: u32, slot: u32, generation: u32, slab_id: u32) -> bool {
        if size_class as usize != self.class {
            return false;
        }
        let ptr = match registry.lookup_and_validate(slab_id, generation) {
            Some(p) => p,
            None => return false,
        };
        let slab = unsafe { &*ptr };
        if !slab.is_valid_magic() {
            return false;
        }
        if slot as usize >= slab.object_count() {
            return false;
        }

        let epoch_idx = slab.epoch_id() as u32;
        if !slab.release_slot(slot) {
            return false;
        }
        let prev_free = slab.free_count_add(1);

        if prev_free as usize + 1 == slab.object_count() {
            let mut lists = self.lists.lock();
            match slab.list_id() {
                ListId::Full => {
                    lists[epoch_idx as usize].full.remove(ptr);
                    lists[epoch_idx as usize].partial.push_front(ptr);
                    slab.set_list_id(ListId::Partial);
                }
                ListId::Partial => {}
                ListId::None => {}
            }
            self.empty_partial_count[epoch_idx as usize].fetch_add(1, Ordering::Relaxed);
        } else if prev_free == 0 {
            {
                let mut lists = self.lists.lock();
                if slab.list_id() == ListId::Full {
                    lists[epoch_idx as usize].full.remove(ptr);
                    lists[epoch_idx as usize].partial.push_front(ptr);
                    slab.set_list_id(ListId::Partial);
                }
            }
            if self.current_partial[epoch_idx as usize]
                .compare_exchange(
                    core::ptr::null_mut(),
                    ptr,
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                slab.set_published();
            }
        }

        true
    }

    fn on_successful_acquisition(&self) {
        let n = self.acquisitions_since_check.fetch_add(1, Ordering::Relaxed) + 1;
        if n % ADAPTIVE_SCAN_CHECK_PERIOD == 0 {
            self.maybe_run_adaptive_scan();
        }
    }

    /// Single-writer, CAS-guarded periodic sampler.
    fn maybe_run_adaptive_scan(&self) {
        if self
            .scan_controller_busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let attempts = self.stats.bitmap_alloc_attempts.load(Ordering::Relaxed);
        let retries = self.stats.bitmap_alloc_cas_retries.load(Ordering::Relaxed);
        let last_attempts = self.last_sample_attempts.swap(attempts, Ordering::Relaxed);
        let last_retries = self.last_sample_retries.swap(retries, Ordering::Relaxed);

        let window_attempts = attempts.saturating_sub(last_attempts);
        let window_retries = retries.saturating_sub(last_retries);

        if window_attempts >= ADAPTIVE_SCAN_WINDOW {
            let rate = window_retries as f64 / window_attempts as f64;
            let currently_randomized = self.randomized_mode.load(Ordering::Relaxed);
            let should_enter = !currently_randomized && rate > ADAPTIVE_SCAN_ENTER_RATE;
            let should_exit = currently_randomized && rate < ADAPTIVE_SCAN_EXIT_RATE;

            if should_enter || should_exit {
                let dwell = self.dwell.fetch_add(1, Ordering::Relaxed) + 1;
                if dwell >= ADAPTIVE_SCAN_DWELL {
                    self.randomized_mode.store(!currently_randomized, Ordering::Relaxed);
                    self.dwell.store(0, Ordering::Relaxed);
                }
            } else {
                self.dwell.store(0, Ordering::Relaxed);
            }
        }

        self.scan_controller_busy.store(false, Ordering::Release);
    }

    /// Scan both lists of `epoch_idx`, collect empties, and return them
    /// for the caller to `cache_push` outside the lock.
    pub fn collect_empties_for_close(&self, epoch_idx: u32) -> alloc::vec::Vec<*mut Slab> {
        self.current_partial[epoch_idx as usize].store(core::ptr::null_mut(), Ordering::Release);

        let mut lists = self.lists.lock();
        let epoch_lists = &mut lists[epoch_idx as usize];
        let mut empties = alloc::vec::Vec::new();

        let partial_empties: alloc::vec::Vec<*mut Slab> = epoch_lists
            .partial
            .iter()
            .filter(|&p| unsafe { (*p).free_count() as usize == (*p).object_count() })
            .collect();
        for p in &partial_empties {
            epoch_lists.partial.remove(*p);
            unsafe { (**p).set_list_id(ListId::None) };
        }

        let full_empties: alloc::vec::Vec<*mut Slab> = epoch_lists
            .full
            .iter()
            .filter(|&p| unsafe { (*p).free_count() as usize == (*p).object_count() })
            .collect();
        for p in &full_empties {
            epoch_lists.full.remove(*p);
            unsafe { (**p).set_list_id(ListId::None) };
        }

        empties.extend(partial_empties);
        empties.extend(full_empties);
        empties
    }

    /// `cache_push`, performed outside the class mutex by the caller
    /// (epoch close) or directly after a free-path decision elsewhere.
    /// Returns `(landed_in_array, hint_outcome)`; `hint_outcome` is `None`
    /// when no hint was attempted (the slab was ever published, so its
    /// page must stay resident), else `Some(success)` from the OS call.
    pub fn cache_push_empty(&self, slab_ptr: *mut Slab, hint_pages: bool) -> (bool, Option<bool>) {
        let slab = unsafe { &*slab_ptr };
        let slab_id = slab.slab_id();
        let was_published = slab.was_published();

        let hint_outcome = if !was_published && hint_pages {
            Some(unsafe { platform::hint_not_needed(slab.page_base()) })
        } else {
            None
        };

        let landed_in_array = self.cache.push(CacheEntry {
            ptr: slab_ptr,
            slab_id,
            was_published,
        });
        if landed_in_array {
            self.stats.empty_slab_recycled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.empty_slab_overflowed.fetch_add(1, Ordering::Relaxed);
        }
        (landed_in_array, hint_outcome)
    }

    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Null `current_partial` for `epoch_idx` (release), forcing fast-path
    /// threads through the slow-path epoch-state gate. Called from
    /// `epoch_advance`, ahead of the full empty-slab scan `epoch_close`
    /// performs.
    pub fn retire_current_partial(&self, epoch_idx: u32) {
        self.current_partial[epoch_idx as usize].store(core::ptr::null_mut(), Ordering::Release);
    }
}

unsafe impl Send for SizeClassAllocator {}
unsafe impl Sync for SizeClassAllocator {}
