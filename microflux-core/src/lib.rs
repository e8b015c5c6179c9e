#![warn(missing_docs)]
//! microflux Core - Measurement Runtime
//!
//! This crate provides the execution environment for benchmarks:
//! - Thread/group distribution for symmetric and asymmetric benchmarks
//! - The per-thread [`Blackhole`] value sink
//! - The iteration scheduler and its worker pool
//! - Payload, fixture and output-sink interfaces
//! - The benchmark registry and the fork child entry point

mod blackhole;
mod control;
mod distribution;
mod payload;
mod registry;
mod scheduler;
mod sink;
mod worker;

pub use blackhole::{Blackhole, BlackholeError, Consume};
pub use control::{Control, WaitOutcome};
pub use distribution::{Distribution, DistributionError, ThreadAssignment, distribute};
pub use payload::{
    BenchError, Fixture, FnPayload, InvocationContext, Level, Payload, Scope, payload_fn,
    payload_with,
};
pub use registry::{
    BenchmarkDef, DEFAULT_FORKS, DEFAULT_ITERATION_NS, DEFAULT_ITERATIONS, DEFAULT_TIMEOUT_NS,
    Overrides, benchmarks, default_descriptor, find_benchmark, resolve_descriptor,
};
pub use scheduler::{BenchmarkRunner, RunError, RunFailure, RunnerState, panic_message};
pub use sink::{OutputSink, RecordingSink, SinkEvent, TracingSink};
pub use worker::{ChannelSink, WorkerMain, shutdown_requested};

/// Anchor to prevent LTO from stripping inventory entries
#[used]
#[doc(hidden)]
pub static REGISTRY_ANCHOR: fn() = || for _ in inventory::iter::<BenchmarkDef> {};
