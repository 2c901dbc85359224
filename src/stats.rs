//! Observational counters at global, per-class, and per-epoch granularity.
//!
//! Plain `Relaxed` atomics filled into a snapshot struct with no global
//! consistency guarantee across fields: each field is individually
//! atomic, so the aggregate is observational, not a point-in-time
//! transaction. Always compiled in, since `snapshot_stats_*` is part of
//! the public contract rather than optional diagnostics.

use core::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters (spans every size class and epoch).
#[derive(Default)]
pub struct GlobalStats {
    pub madvise_calls: AtomicU64,
    pub madvise_failures: AtomicU64,
    pub epoch_close_scanned_slabs: AtomicU64,
    pub epoch_close_recycled_slabs: AtomicU64,
    pub epoch_close_total_ns: AtomicU64,
}

impl GlobalStats {
    pub const fn new() -> Self {
        GlobalStats {
            madvise_calls: AtomicU64::new(0),
            madvise_failures: AtomicU64::new(0),
            epoch_close_scanned_slabs: AtomicU64::new(0),
            epoch_close_recycled_slabs: AtomicU64::new(0),
            epoch_close_total_ns: AtomicU64::new(0),
        }
    }
}

/// Counters scoped to a single size class.
#[derive(Default)]
pub struct ClassStats {
    pub new_slab_count: AtomicU64,
    pub empty_slab_recycled: AtomicU64,
    pub empty_slab_overflowed: AtomicU64,
    pub repair_events: AtomicU64,
    pub current_partial_cas_failures: AtomicU64,
    pub bitmap_alloc_attempts: AtomicU64,
    pub bitmap_alloc_cas_retries: AtomicU64,
    pub slow_path_epoch_closed: AtomicU64,
}

impl ClassStats {
    pub const fn new() -> Self {
        ClassStats {
            new_slab_count: AtomicU64::new(0),
            empty_slab_recycled: AtomicU64::new(0),
            empty_slab_overflowed: AtomicU64::new(0),
            repair_events: AtomicU64::new(0),
            current_partial_cas_failures: AtomicU64::new(0),
            bitmap_alloc_attempts: AtomicU64::new(0),
            bitmap_alloc_cas_retries: AtomicU64::new(0),
            slow_path_epoch_closed: AtomicU64::new(0),
        }
    }
}

/// The public, versioned snapshot record. Field names match the contract
/// a downstream JSON encoder maps 1:1 (that encoder lives outside this
/// crate; see `src/lib.rs` module docs).
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalSnapshot {
    pub schema_version: u32,
    pub timestamp_ns: u64,
    pub pid: u32,
    pub page_size: usize,
    pub epoch_count: usize,
    pub current_epoch: u32,
    pub active_epoch_count: u32,
    pub closing_epoch_count: u32,
    pub total_slabs_allocated: u64,
    pub total_slabs_recycled: u64,
    pub net_slabs: i64,
    pub rss_bytes_current: u64,
    pub estimated_slab_rss_bytes: u64,
    pub madvise_calls: u64,
    pub madvise_failures: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClassSnapshot {
    pub size_class: usize,
    pub object_size: usize,
    pub new_slab_count: u64,
    pub empty_slab_recycled: u64,
    pub empty_slab_overflowed: u64,
    pub repair_events: u64,
    pub current_partial_cas_failures: u64,
    pub bitmap_alloc_attempts: u64,
    pub bitmap_alloc_cas_retries: u64,
    pub slow_path_epoch_closed: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EpochSnapshot {
    pub epoch_index: u32,
    pub is_active: bool,
    pub era: u64,
    pub opened_at_ns: u64,
    pub refcount: u32,
    pub label_len: usize,
    pub label: [u8; crate::config::LABEL_MAX_LEN],
    pub rss_before: u64,
    pub rss_after: u64,
}

/// Schema version stamped into every `GlobalSnapshot`.
pub const SCHEMA_VERSION: u32 = 1;

/// Raw counter values read out of [`GlobalStats`]; the allocator root
/// merges these with page-size/epoch-ring fields to build the public
/// [`GlobalSnapshot`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalSnapshotCounters {
    pub madvise_calls: u64,
    pub madvise_failures: u64,
    pub epoch_close_scanned_slabs: u64,
    pub epoch_close_recycled_slabs: u64,
    pub epoch_close_total_ns: u64,
}

pub fn snapshot_global(stats: &GlobalStats) -> GlobalSnapshotCounters {
    GlobalSnapshotCounters {
        madvise_calls: stats.madvise_calls.load(Ordering::Relaxed),
        madvise_failures: stats.madvise_failures.load(Ordering::Relaxed),
        epoch_close_scanned_slabs: stats.epoch_close_scanned_slabs.load(Ordering::Relaxed),
        epoch_close_recycled_slabs: stats.epoch_close_recycled_slabs.load(Ordering::Relaxed),
        epoch_close_total_ns: stats.epoch_close_total_ns.load(Ordering::Relaxed),
    }
}

pub fn snapshot_class(stats: &ClassStats) -> ClassSnapshot {
    ClassSnapshot {
        size_class: 0,
        object_size: 0,
        new_slab_count: stats.new_slab_count.load(Ordering::Relaxed),
        empty_slab_recycled: stats.empty_slab_recycled.load(Ordering::Relaxed),
        empty_slab_overflowed: stats.empty_slab_overflowed.load(Ordering::Relaxed),
        repair_events: stats.repair_events.load(Ordering::Relaxed),
        current_partial_cas_failures: stats.current_partial_cas_failures.load(Ordering::Relaxed),
        bitmap_alloc_attempts: stats.bitmap_alloc_attempts.load(Ordering::Relaxed),
        bitmap_alloc_cas_retries: stats.bitmap_alloc_cas_retries.load(Ordering::Relaxed),
        slow_path_epoch_closed: stats.slow_path_epoch_closed.load(Ordering::Relaxed),
    }
}

/// Best-effort current resident-set size in bytes. Reads
/// `/proc/self/statm` on Linux under `std`; returns 0 elsewhere.
#[cfg(all(feature = "std", target_os = "linux"))]
pub fn current_rss_bytes() -> u64 {
    match std::fs::read_to_string("/proc/self/statm") {
        Ok(contents) => {
            let resident_pages = contents
                .split_whitespace()
                .nth(1)
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            resident_pages * 4096
        }
        Err(_) => 0,
    }
}

#[cfg(not(all(feature = "std", target_os = "linux")))]
pub fn current_rss_bytes() -> u64 {
    0
}
