/// Increment a `Relaxed` stats counter by 1. Always compiled in: these
/// counters are part of the public `snapshot_stats_*` contract rather than
/// gated behind an optional feature.
#[macro_export]
macro_rules! stat_inc {
    ($target:expr, $counter:ident) => {
        $target
            .$counter
            .fetch_add(1, ::core::sync::atomic::Ordering::Relaxed)
    };
}

/// Add a value to a `Relaxed` stats counter.
#[macro_export]
macro_rules! stat_add {
    ($target:expr, $counter:ident, $val:expr) => {
        $target
            .$counter
            .fetch_add($val as u64, ::core::sync::atomic::Ordering::Relaxed)
    };
}

/// Print a trace line under `--features debug,std`; compiles to nothing
/// otherwise.
#[macro_export]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        #[cfg(all(feature = "debug", feature = "std"))]
        {
            std::println!($($arg)*);
        }
    };
}

/// Report an unrecoverable invariant violation: CAS spin tripwires,
/// slow-path loop tripwires, and lock-watchdog timeouts. Never used for the
/// recoverable, returned-not-aborted cases (invalid handle, stale
/// generation, double-free).
///
/// Panics under `cfg(test)` so `#[should_panic]` tests can observe it
/// without tearing down the whole test binary; aborts the process
/// otherwise, since by the time this fires the allocator's internal state
/// is no longer trustworthy enough to unwind through.
#[macro_export]
macro_rules! diagnostic_abort {
    ($($arg:tt)*) => {{
        #[cfg(test)]
        {
            ::core::panic!("tslab: fatal invariant violation: {}", ::core::format_args!($($arg)*));
        }
        #[cfg(all(not(test), feature = "std"))]
        {
            std::eprintln!("tslab: fatal invariant violation: {}", ::core::format_args!($($arg)*));
            std::process::abort();
        }
        #[cfg(all(not(test), not(feature = "std")))]
        {
            let _ = ::core::format_args!($($arg)*);
            ::core::panic!("tslab: fatal invariant violation");
        }
    }};
}
