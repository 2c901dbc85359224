//! Stress tests with fill-pattern corruption detection.
//!
//! Allocate memory, fill with a pattern derived from the handle, pass
//! between threads, and verify the pattern before freeing. Any corruption
//! (use-after-free, double-free, slot overlap) shows up as a pattern
//! mismatch rather than a silent wrong answer.

use std::sync::Arc;
use tslab::Allocator;

fn fill_pattern(ptr: *mut u8, size: usize, seed: usize) {
    for i in 0..size {
        unsafe {
            *ptr.add(i) = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        }
    }
}

fn check_pattern(ptr: *mut u8, size: usize, seed: usize) -> bool {
    for i in 0..size {
        let expected = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        if unsafe { *ptr.add(i) } != expected {
            return false;
        }
    }
    true
}

#[test]
fn fill_pattern_survives_churn_single_thread() {
    let a = Allocator::new();
    let epoch = a.epoch_current();
    let sizes: &[usize] = &[64, 96, 128, 192, 256, 384, 512, 768];
    let rounds = 50;

    let mut live: Vec<(*mut u8, usize, u64, usize)> = Vec::new();

    for round in 0..rounds {
        for &size in sizes {
            let (ptr, h) = a.allocate(size, epoch).unwrap();
            let seed = ptr.as_ptr() as usize ^ size;
            fill_pattern(ptr.as_ptr(), size, seed);
            live.push((ptr.as_ptr(), size, h, seed));
        }

        for &(ptr, size, _, seed) in &live {
            assert!(
                check_pattern(ptr, size, seed),
                "corruption detected at round {round}, size {size}"
            );
        }

        let drain_count = live.len() / 2;
        for _ in 0..drain_count {
            let idx = (round * 7 + 3) % live.len();
            let (ptr, size, h, seed) = live.swap_remove(idx);
            assert!(check_pattern(ptr, size, seed), "corruption before free at round {round}");
            assert!(a.free(h));
        }
    }

    for (ptr, size, h, seed) in live {
        assert!(check_pattern(ptr, size, seed));
        assert!(a.free(h));
    }
}

#[test]
fn fill_pattern_survives_cross_thread_handoff() {
    use std::sync::mpsc;

    let a = Arc::new(Allocator::new());
    let epoch = a.epoch_current();
    let npairs = 4;
    let ops = 500;
    let sizes: &[usize] = &[64, 128, 256, 768];

    let mut producers = Vec::new();
    let mut consumers = Vec::new();

    for pair_id in 0..npairs {
        let (tx, rx) = mpsc::channel::<(usize, usize, u64, usize)>();
        let a_producer = Arc::clone(&a);

        producers.push(std::thread::spawn(move || {
            for i in 0..ops {
                let size = sizes[(pair_id + i) % sizes.len()];
                let (ptr, h) = a_producer.allocate(size, epoch).unwrap();
                let seed = ptr.as_ptr() as usize ^ size ^ i;
                fill_pattern(ptr.as_ptr(), size, seed);
                tx.send((ptr.as_ptr() as usize, size, h, seed)).unwrap();
            }
        }));

        let a_consumer = Arc::clone(&a);
        consumers.push(std::thread::spawn(move || {
            let mut count = 0usize;
            for (addr, size, h, seed) in rx {
                let ptr = addr as *mut u8;
                assert!(
                    check_pattern(ptr, size, seed),
                    "cross-thread corruption at pair {pair_id}, item {count}"
                );
                assert!(a_consumer.free(h));
                count += 1;
            }
            count
        }));
    }

    for h in producers {
        h.join().unwrap();
    }
    let total: usize = consumers.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, npairs * ops);
}

#[test]
fn many_threads_concurrent_allocate_free() {
    let a = Arc::new(Allocator::new());
    let epoch = a.epoch_current();
    let nthreads = 8;
    let ops_per_thread = 500_000 / 8;

    let handles: Vec<_> = (0..nthreads)
        .map(|tid| {
            let alloc = Arc::clone(&a);
            std::thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let (ptr, h) = alloc.allocate(128, epoch).unwrap();
                    unsafe { *ptr.as_ptr() = (tid ^ i) as u8 };
                    assert!(alloc.free(h));
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let snap = a.snapshot_stats_class(3).unwrap();
    if snap.bitmap_alloc_attempts > 0 {
        let retry_rate = snap.bitmap_alloc_cas_retries as f64 / snap.bitmap_alloc_attempts as f64;
        assert!(retry_rate < 0.05, "retry rate too high: {retry_rate}");
    }
}

#[test]
fn churn_without_close_keeps_new_slab_count_stable_after_warmup() {
    let a = Allocator::new();
    let epoch = a.epoch_current();

    let mut live = Vec::with_capacity(10_000);
    for _ in 0..10_000 {
        live.push(a.allocate(128, epoch).unwrap().1);
    }

    let after_warmup = a.snapshot_stats_class(3).unwrap().new_slab_count;

    for cycle in 0..100 {
        for _ in 0..1_000 {
            let h = live.pop().unwrap();
            assert!(a.free(h));
        }
        for _ in 0..1_000 {
            live.push(a.allocate(128, epoch).unwrap().1);
        }
        let _ = cycle;
    }

    let after_churn = a.snapshot_stats_class(3).unwrap().new_slab_count;
    assert_eq!(after_warmup, after_churn, "unexpected new mappings during steady-state churn");

    for h in live {
        assert!(a.free(h));
    }
}
