#![warn(missing_docs)]
//! # microflux
//!
//! Microbenchmark harness for Rust with forked isolation and defensible scores.
//!
//! microflux runs a registered payload through warmup and measurement
//! iterations and reports a score with a 99.9% confidence interval:
//! - **Benchmark Modes**: throughput, average time, sampled latency distribution, single shot
//! - **Process Isolation**: every fork is a fresh child process; crashes and hangs fail one benchmark, not the suite
//! - **Zero-Copy IPC**: supervisor-worker communication using rkyv serialization
//! - **Thread Groups**: asymmetric benchmarks with synchronized measurement windows
//! - **Blackhole**: consumed values stay observable so the optimizer cannot delete the work
//! - **Secondary Counters**: auxiliary per-iteration metrics reported next to the primary score
//!
//! ## Quick Start
//!
//! ```ignore
//! use microflux::prelude::*;
//!
//! microflux::benchmark!("math", "sum", payload_fn(|| (0..1024u64).sum::<u64>()));
//!
//! fn main() -> anyhow::Result<()> {
//!     microflux::run()
//! }
//! ```
//!
//! ## Declared Options
//!
//! Options after `;` become the method-level tier; the command line and
//! `microflux.toml` still override them.
//!
//! ```ignore
//! microflux::benchmark!("queue", "push_pop", payload_with(push_pop);
//!     mode = Mode::AverageTime,
//!     thread_groups = &[1, 3],
//!     forks = 2,
//! );
//! ```

// Re-export core types
pub use microflux_core::{
    BenchError, BenchmarkDef, BenchmarkRunner, Blackhole, Consume, Control, Fixture,
    InvocationContext, Level, OutputSink, Overrides, Payload, RecordingSink, RunError, Scope,
    SinkEvent, ThreadAssignment, benchmarks, distribute, find_benchmark, payload_fn,
    payload_with,
};

// Re-export IPC descriptor types
pub use microflux_ipc::{BenchmarkDescriptor, BlackholeMode, FailureKind, IterationSpec};

// Re-export results
pub use microflux_results::{
    AggregationPolicy, BenchmarkResult, IterationParams, IterationResult, IterationType,
    Measurement, Mode, RunResult, TimeUnit,
};

// Re-export stats
pub use microflux_stats::{ListStatistics, SummaryStatistics};

/// Internal re-exports for macro use
#[doc(hidden)]
pub mod internal {
    pub use inventory;
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AggregationPolicy, BenchError, Blackhole, BlackholeMode, Fixture, InvocationContext,
        Level, Mode, Overrides, Payload, Scope, TimeUnit, payload_fn, payload_with,
    };
}

/// Register a benchmark.
///
/// `benchmark!(class, name, payload)` where `payload` is any expression
/// producing a [`Payload`]. It is evaluated once per run. Options after `;`
/// set the method-level [`Overrides`]. A leading `@class OPTIONS,` sets the
/// class-level tier from a `const Overrides<'static>`.
#[macro_export]
macro_rules! benchmark {
    (@class $class_options:expr, $class:literal, $name:literal, $payload:expr
        $(; $($field:ident = $value:expr),* $(,)?)?) => {
        $crate::internal::inventory::submit! {
            $crate::BenchmarkDef {
                name: $name,
                class: $class,
                class_options: $class_options,
                options: $crate::Overrides {
                    $($($field: ::core::option::Option::Some($value),)*)?
                    ..$crate::Overrides::NONE
                },
                payload: {
                    fn payload() -> ::std::boxed::Box<dyn $crate::Payload> {
                        ::std::boxed::Box::new($payload)
                    }
                    payload
                },
            }
        }
    };
    ($class:literal, $name:literal, $payload:expr $(; $($field:ident = $value:expr),* $(,)?)?) => {
        $crate::benchmark!(@class $crate::Overrides::NONE, $class, $name, $payload
            $(; $($field = $value),*)?);
    };
}

/// Run the microflux CLI harness.
///
/// Call this from your benchmark binary's `main()`:
/// ```ignore
/// fn main() {
///     microflux::run().unwrap();
/// }
/// ```
pub use microflux_cli::run;
pub use microflux_cli::{Cli, run_with_cli};
