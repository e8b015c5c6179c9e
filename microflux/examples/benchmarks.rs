//! microflux Example Benchmarks
//!
//! This example demonstrates microflux features and serves as a template for
//! creating your own benchmark suite.
//!
//! Run with:
//!   cargo run --example benchmarks                        # Run all benchmarks (forked)
//!   cargo run --example benchmarks -- -f 0                # Run in-process
//!   cargo run --example benchmarks -- --help              # Show all options
//!   cargo run --example benchmarks -- list                # List benchmarks
//!   cargo run --example benchmarks -- '^collections\.'    # Run only collections

use microflux::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Short iterations so the whole suite finishes in about a minute
const QUICK: Overrides<'static> = Overrides {
    warmup_iterations: Some(2),
    warmup_time_ns: Some(200_000_000),
    measurement_iterations: Some(3),
    measurement_time_ns: Some(500_000_000),
    forks: Some(1),
    ..Overrides::NONE
};

// ============================================================================
// Basic Benchmarks
// ============================================================================

microflux::benchmark!(@class QUICK, "basics", "addition", payload_fn(|| {
    let x = std::hint::black_box(42u64);
    let y = std::hint::black_box(17u64);
    x + y
}));

// Same work, reported as time per operation
microflux::benchmark!(@class QUICK, "basics", "addition_avgt", payload_fn(|| {
    std::hint::black_box(42u64).wrapping_mul(17)
}); mode = Mode::AverageTime, time_unit = TimeUnit::Nanoseconds);

// 16 additions per call; the score is per addition
microflux::benchmark!(@class QUICK, "basics", "unrolled", payload_with(|ctx| {
    let mut acc = std::hint::black_box(1u64);
    for i in 0..16u64 {
        acc = acc.wrapping_add(i);
    }
    ctx.blackhole().consume(acc);
    Ok(())
}); ops_per_invocation = 16);

// Consumption through `std::hint::black_box` only
microflux::benchmark!(@class QUICK, "basics", "compiler_blackhole", payload_fn(|| {
    std::hint::black_box(7u64) << 3
}); blackhole = BlackholeMode::Compiler);

// ============================================================================
// Collections
// ============================================================================

microflux::benchmark!(@class QUICK, "collections", "vector_sum", {
    let data: Vec<i64> = (0..1000).collect();
    payload_fn(move || data.iter().sum::<i64>())
});

// Latency distribution of a small sort
microflux::benchmark!(@class QUICK, "collections", "sort_small", {
    let data: Vec<u32> = (0..256u32).map(|i| i.wrapping_mul(2_654_435_761)).collect();
    payload_fn(move || {
        let mut v = data.clone();
        v.sort_unstable();
        v
    })
}; mode = Mode::SampleTime, time_unit = TimeUnit::Microseconds);

// Cold cost of building a large vector
microflux::benchmark!(@class QUICK, "collections", "cold_build", payload_fn(|| {
    (0..100_000u64).collect::<Vec<_>>()
}); mode = Mode::SingleShotTime, measurement_iterations = 10, measurement_batch_size = 4,
    time_unit = TimeUnit::Milliseconds);

// ============================================================================
// Secondary Counters
// ============================================================================

// Parse throughput with bytes processed as a secondary result
microflux::benchmark!(@class QUICK, "text", "parse_numbers", {
    let input: String = (0..200).map(|i| format!("{i} ")).collect();
    payload_with(move |ctx| {
        let mut total = 0u64;
        for token in input.split_whitespace() {
            total += token.parse::<u64>()?;
        }
        ctx.counter("bytes", input.len() as f64);
        ctx.blackhole().consume(total);
        Ok(())
    })
});

// ============================================================================
// Fixtures
// ============================================================================

// Shared counter reset before every iteration
microflux::benchmark!(@class QUICK, "fixtures", "atomic_increment", {
    let counter = Arc::new(AtomicU64::new(0));
    let reset = Arc::clone(&counter);
    payload_with(move |ctx| {
        ctx.blackhole()
            .consume(counter.fetch_add(1, Ordering::Relaxed));
        Ok(())
    })
    .with_fixture(
        Fixture::new("reset", Level::Iteration, Scope::Benchmark).setup(move |_| {
            reset.store(0, Ordering::Relaxed);
            Ok(())
        }),
    )
}; threads = 2);

// ============================================================================
// Asymmetric Benchmarks
// ============================================================================

// One producer against three consumers on a locked queue
microflux::benchmark!(@class QUICK, "queue", "producer_consumers", {
    let queue = Arc::new(Mutex::new(VecDeque::<u64>::new()));
    payload_with(move |ctx| {
        let mut q = queue.lock().map_err(|_| BenchError::msg("queue poisoned"))?;
        if ctx.thread().subgroup_index == 0 {
            q.push_back(1);
            if q.len() > 4096 {
                q.clear();
            }
        } else {
            let item = q.pop_front();
            drop(q);
            ctx.blackhole().consume_opaque(item);
        }
        Ok(())
    })
}; thread_groups = &[1, 3], mode = Mode::AverageTime, time_unit = TimeUnit::Nanoseconds);

fn main() -> anyhow::Result<()> {
    microflux::run()
}
