//! End-to-end lifecycle tests: allocate/free identity, epoch reclaim, stale
//! handle rejection, and size-class boundary placement.

use tslab::{handle, Allocator};

#[test]
fn alloc_free_identity() {
    let a = Allocator::new();
    let epoch = a.epoch_current();
    let (ptr, h) = a.allocate(128, epoch).unwrap();
    unsafe { *ptr.as_ptr() = 0xA5 };
    assert!(a.free(h));
    assert!(!a.free(h));

    let snap = a.snapshot_stats_class(3).unwrap();
    assert_eq!(snap.new_slab_count, 1);
    assert_eq!(snap.empty_slab_recycled, 0);
}

#[test]
fn size_class_boundaries_route_to_expected_class() {
    let a = Allocator::new();
    let epoch = a.epoch_current();

    // Each (requested size, expected object_size) pair exercises a class
    // boundary: the smallest size that still fits the class below, and the
    // largest size that still fits the class itself.
    let cases: &[(usize, usize)] = &[
        (1, 64),
        (64, 64),
        (65, 96),
        (96, 96),
        (97, 128),
        (192, 192),
        (193, 256),
        (384, 384),
        (385, 512),
        (512, 512),
        (513, 768),
        (768, 768),
    ];

    for &(size, expected_object_size) in cases {
        let (_, h) = a.allocate(size, epoch).unwrap();
        let decoded = handle::decode(h).unwrap();
        let snap = a.snapshot_stats_class(decoded.size_class as usize).unwrap();
        assert_eq!(
            snap.object_size, expected_object_size,
            "size {size} routed to wrong class"
        );
        assert!(a.free(h), "free failed for size {size}");
    }
}

#[test]
fn epoch_reclaim_recycles_empty_slabs() {
    let a = Allocator::new();
    let epoch = a.epoch_current();

    let mut handles = Vec::with_capacity(50_000);
    for _ in 0..50_000 {
        handles.push(a.allocate(128, epoch).unwrap().1);
    }
    for h in handles {
        assert!(a.free(h));
    }

    let before = a.snapshot_stats_global();
    a.epoch_close(epoch).unwrap();
    let after = a.snapshot_stats_global();
    assert!(after.total_slabs_recycled > before.total_slabs_recycled);
}

#[test]
fn stale_handle_rejected_after_epoch_wraps_around_ring() {
    let a = Allocator::new();
    let epoch0 = a.epoch_current();
    let (_, stale) = a.allocate(64, epoch0).unwrap();
    a.epoch_close(epoch0).unwrap();

    // Sixteen-slot ring: rotate far enough that epoch0's slot is reused.
    let mut current = epoch0;
    for _ in 0..16 {
        current = a.epoch_advance();
    }

    for _ in 0..100 {
        let (_, h) = a.allocate(64, current).unwrap();
        assert!(a.free(h));
    }

    assert!(!a.free(stale));
}

#[test]
fn closing_epoch_rejects_new_allocations() {
    let a = Allocator::new();
    let epoch0 = a.epoch_current();
    let (_, h1) = a.allocate(64, epoch0).unwrap();

    a.epoch_advance();
    assert!(a.allocate(64, epoch0).is_err());

    let before = a.snapshot_stats_class(1).unwrap();
    let _ = a.allocate(64, epoch0);
    let after = a.snapshot_stats_class(1).unwrap();
    assert!(after.slow_path_epoch_closed > before.slow_path_epoch_closed);

    assert!(a.free(h1));
}

#[test]
fn labels_round_trip_through_snapshot() {
    let a = Allocator::new();
    let epoch = a.epoch_current();
    a.set_label(epoch, "checkout-request").unwrap();
    let snap = a.snapshot_stats_epoch(epoch).unwrap();
    assert_eq!(&snap.label[..snap.label_len], b"checkout-request");
}

#[test]
fn refcount_tracks_increments_and_decrements() {
    let a = Allocator::new();
    let epoch = a.epoch_current();
    assert_eq!(a.get_refcount(epoch), Some(0));
    assert_eq!(a.inc_refcount(epoch), Some(1));
    assert_eq!(a.inc_refcount(epoch), Some(2));
    assert_eq!(a.dec_refcount(epoch), Some(1));
}
