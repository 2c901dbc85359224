use std::time::Instant;
use tslab::Allocator;

fn main() {
    println!("tslab demo");
    println!("==========\n");

    let alloc = Allocator::new();

    // A request arrives, gets its own epoch, and allocates scratch objects
    // tagged with a human-readable label.
    let epoch = alloc.epoch_current();
    alloc.set_label(epoch, "checkout-request").unwrap();

    let mut handles = Vec::new();
    for i in 0..1000u32 {
        let (ptr, h) = alloc.allocate(128, epoch).unwrap();
        unsafe { *ptr.as_ptr() = i as u8 };
        handles.push(h);
    }
    println!("allocated {} objects into epoch {epoch}", handles.len());

    for h in handles {
        assert!(alloc.free(h));
    }

    // Closing the epoch reclaims every slab it left empty.
    alloc.epoch_close(epoch).unwrap();
    let snap = alloc.snapshot_stats_global();
    println!(
        "epoch {epoch} closed: {} slabs recycled, rss = {} bytes",
        snap.total_slabs_recycled, snap.rss_bytes_current
    );

    // A stale handle into the closed epoch is rejected, not undefined
    // behavior.
    let next_epoch = alloc.epoch_advance();
    let (_, stale) = alloc.allocate(64, next_epoch).unwrap();
    assert!(alloc.free(stale));
    assert!(!alloc.free(stale), "double-free must be rejected");

    println!("\nMulti-threaded benchmark (8 threads, 100k alloc/free pairs each):");
    let shared = std::sync::Arc::new(alloc);
    let worker_epoch = shared.epoch_current();
    let start = Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let a = std::sync::Arc::clone(&shared);
            std::thread::spawn(move || {
                let mut count = 0usize;
                for _ in 0..100_000u32 {
                    let (_, h) = a.allocate(64, worker_epoch).unwrap();
                    assert!(a.free(h));
                    count += 1;
                }
                count
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let elapsed = start.elapsed();
    println!("  completed {total} alloc/free pairs in {elapsed:?}");

    println!("\nDone.");
}
