//! Fixed tunables for the allocator.
//!
//! Unlike the size-class table in a general-purpose allocator, every value
//! here is a closed calculation fixed by the data model, not a build-time
//! knob — so there is no `build.rs`/TOML layer generating this file. See
//! `DESIGN.md` for the rationale.

/// Page size used for every slab. Must be a power of two.
pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Number of declared size classes, plus the sentinel at index 0.
pub const NUM_SIZE_CLASSES: usize = 9;

/// Largest allocation size served by a size class.
pub const MAX_OBJECT_SIZE: usize = 768;

/// Upper bound on objects a single slab may hold (handle `slot` field is 8 bits).
pub const MAX_SLAB_OBJECTS: usize = 255;

/// Epoch ring width.
pub const EPOCH_RING_SIZE: usize = 16;

/// Label table capacity, including the reserved "unlabeled" id 0.
pub const LABEL_TABLE_CAP: usize = 16;

/// Maximum bytes in a label string (excluding any terminator).
pub const LABEL_MAX_LEN: usize = 31;

/// Initial registry capacity; doubled on each growth.
pub const REGISTRY_INITIAL_CAPACITY: usize = 1024;

/// Fixed-capacity tier of the per-class slab cache.
pub const SLAB_CACHE_ARRAY_CAP: usize = 32;

/// Deep-retry tripwire for bitmap CAS loops; treated as corruption.
pub const BITMAP_RETRY_TRIPWIRE: u64 = 10_000_000;

/// Adaptive-scan sampling window (minimum attempts before deriving a rate).
pub const ADAPTIVE_SCAN_WINDOW: u64 = 100_000;
/// Enter randomized scan mode above this retry rate.
pub const ADAPTIVE_SCAN_ENTER_RATE: f64 = 0.30;
/// Leave randomized scan mode below this retry rate.
pub const ADAPTIVE_SCAN_EXIT_RATE: f64 = 0.10;
/// Consecutive checks required before flipping scan mode again.
pub const ADAPTIVE_SCAN_DWELL: u32 = 50;
/// Re-run the adaptive-scan check every this many successful acquisitions.
pub const ADAPTIVE_SCAN_CHECK_PERIOD: u64 = 1 << 18;

/// Watchdog deadline for a single mutex acquisition; a longer wait is
/// treated as an invariant violation (lock-rank deadlock or corruption).
pub const LOCK_WATCHDOG_SECS: u64 = 5;

/// The fixed set of object sizes, in bytes, smallest to largest.
pub const SIZE_CLASS_BYTES: [usize; NUM_SIZE_CLASSES] = [0, 64, 96, 128, 192, 256, 384, 512, 768];
