//! Benchmark Descriptors
//!
//! The immutable description of one benchmark run, shipped to fork children
//! as part of [`SupervisorCommand::Run`](crate::SupervisorCommand).

use microflux_results::{IterationParams, IterationType, Mode, TimeUnit};
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid descriptor values, rejected before any run begins
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("{phase} iteration count must be positive")]
    ZeroIterations { phase: &'static str },

    #[error("{phase} iteration time must be positive")]
    ZeroTime { phase: &'static str },

    #[error("Batch size must be positive")]
    ZeroBatchSize,

    #[error("Thread count must be positive")]
    ZeroThreads,

    #[error("Thread group vector must contain a positive entry, got {0:?}")]
    InvalidGroups(Vec<u32>),

    #[error("Operations per invocation must be positive")]
    ZeroOpsPerInvocation,

    #[error("Timeout ({timeout_ns}ns) is shorter than one iteration ({iteration_ns}ns)")]
    TimeoutTooShort { timeout_ns: u64, iteration_ns: u64 },

    #[error("Benchmark name must not be empty")]
    EmptyName,
}

/// How values are consumed by the blackhole
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum BlackholeMode {
    /// Randomized tombstone comparison plus sampled object escape
    #[default]
    Full,
    /// Route every consumption through `std::hint::black_box`
    Compiler,
}

/// Count and length of one phase of iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct IterationSpec {
    /// Number of iterations
    pub iterations: u32,
    /// Duration of each iteration in nanoseconds
    pub time_ns: u64,
    /// Calls per batch (single-shot mode)
    pub batch_size: u32,
}

/// Everything a runner needs to execute one benchmark
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct BenchmarkDescriptor {
    /// Fully qualified benchmark name
    pub name: String,
    /// Measurement mode
    pub mode: Mode,
    /// Reporting unit
    pub time_unit: TimeUnit,
    /// Warmup phase
    pub warmup: IterationSpec,
    /// Measurement phase
    pub measurement: IterationSpec,
    /// Requested thread count, rounded up to a multiple of the group sum
    pub threads: u32,
    /// Group-size ratio vector
    pub thread_groups: Vec<u32>,
    /// Ramp and barrier-synchronize measured windows
    pub sync_iterations: bool,
    /// Measured forks; 0 runs in-process
    pub forks: u32,
    /// Forks whose results are discarded
    pub warmup_forks: u32,
    /// Per-iteration timeout
    pub timeout_ns: u64,
    /// Operations performed by one payload call
    pub ops_per_invocation: u64,
    /// Consumption strategy
    pub blackhole: BlackholeMode,
}

impl BenchmarkDescriptor {
    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        if self.measurement.iterations == 0 {
            return Err(DescriptorError::ZeroIterations {
                phase: "Measurement",
            });
        }
        for (phase, spec) in [("Warmup", &self.warmup), ("Measurement", &self.measurement)] {
            if spec.batch_size == 0 {
                return Err(DescriptorError::ZeroBatchSize);
            }
            if self.mode.is_time_bounded() && spec.iterations > 0 && spec.time_ns == 0 {
                return Err(DescriptorError::ZeroTime { phase });
            }
        }
        if self.threads == 0 {
            return Err(DescriptorError::ZeroThreads);
        }
        if !self.thread_groups.iter().any(|&g| g > 0) {
            return Err(DescriptorError::InvalidGroups(self.thread_groups.clone()));
        }
        if self.ops_per_invocation == 0 {
            return Err(DescriptorError::ZeroOpsPerInvocation);
        }
        if self.mode.is_time_bounded() {
            let iteration_ns = self.warmup.time_ns.max(self.measurement.time_ns);
            if self.timeout_ns < iteration_ns {
                return Err(DescriptorError::TimeoutTooShort {
                    timeout_ns: self.timeout_ns,
                    iteration_ns,
                });
            }
        }
        Ok(())
    }

    /// Parameters of the warmup phase
    pub fn warmup_params(&self) -> IterationParams {
        IterationParams {
            kind: IterationType::Warmup,
            count: self.warmup.iterations,
            time_ns: self.warmup.time_ns,
            batch_size: self.warmup.batch_size,
        }
    }

    /// Parameters of the measurement phase
    pub fn measurement_params(&self) -> IterationParams {
        IterationParams {
            kind: IterationType::Measurement,
            count: self.measurement.iterations,
            time_ns: self.measurement.time_ns,
            batch_size: self.measurement.batch_size,
        }
    }

    /// Upper bound on the wall time of one fork, used by the supervisor
    pub fn fork_timeout_ns(&self) -> u64 {
        let iterations = u64::from(self.warmup.iterations) + u64::from(self.measurement.iterations);
        self.timeout_ns
            .saturating_mul(iterations.max(1))
            .saturating_add(30_000_000_000)
    }
}
