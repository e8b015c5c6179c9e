#![warn(missing_docs)]
//! microflux Result Hierarchy
//!
//! Raw per-thread results roll up into iteration results, iteration results
//! into per-fork benchmark results, and forks into a run result. Every level
//! is serializable with rkyv for IPC and with serde for reports.

mod benchmark;
mod iteration;
mod measurement;
mod mode;

pub use benchmark::{BenchmarkResult, RunResult};
pub use iteration::{IterationParams, IterationResult, IterationType};
pub use measurement::{AggregationAxis, Measurement, MeasurementData, RawResult};
pub use mode::{AggregationPolicy, Mode, ResultRole, TimeUnit};

use microflux_stats::HistogramError;
use thiserror::Error;

/// Errors raised while merging results
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregationError {
    #[error("Nothing to aggregate")]
    Empty,

    #[error("Cannot merge result '{found}' into '{expected}'")]
    LabelMismatch { expected: String, found: String },

    #[error("Result '{label}' mixes different result kinds")]
    KindMismatch { label: String },

    #[error("Result '{label}' mixes different time units")]
    UnitMismatch { label: String },

    #[error("Latency populations could not be merged: {0}")]
    Histogram(#[from] HistogramError),

    #[error("Iteration result is sealed")]
    Sealed,

    #[error("Iteration result is not sealed")]
    Unsealed,

    #[error("Warmup iterations do not contribute to benchmark results")]
    WarmupIteration,
}
