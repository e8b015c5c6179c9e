//! IPC Message Types
//!
//! The versioned, tagged lifecycle schema exchanged between supervisor and
//! fork child. All messages are serialized with rkyv and validated on read.

use crate::BenchmarkDescriptor;
use microflux_results::{IterationParams, IterationResult};
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u16,
    /// Child process id
    pub pid: u32,
    /// Number of logical CPUs available
    pub cpu_count: u32,
    /// CPU model string (for reports)
    pub cpu_model: String,
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            cpu_count: num_cpus(),
            cpu_model: cpu_model_string(),
        }
    }
}

/// Position of one fork within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct ForkSpec {
    /// Index among forks of the same kind, starting at 1
    pub index: u32,
    /// Number of forks of the same kind
    pub count: u32,
    /// Results of this fork are discarded
    pub warmup: bool,
}

/// Messages sent from Worker to Supervisor, in lifecycle order
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities
    Hello(WorkerCapabilities),

    /// Runner accepted the descriptor
    BenchmarkStart {
        /// Descriptor as resolved in the child
        descriptor: BenchmarkDescriptor,
    },

    /// An iteration is about to run
    IterationStart {
        /// Phase parameters
        params: IterationParams,
        /// Index within the phase, starting at 1
        index: u32,
    },

    /// A sealed iteration; warmup results are tagged through `params.kind`
    IterationResult {
        /// Phase parameters
        params: IterationParams,
        /// Index within the phase, starting at 1
        index: u32,
        /// Thread results of the iteration
        result: IterationResult,
    },

    /// Benchmark failed; no further results follow
    Exception {
        /// Error category
        kind: FailureKind,
        /// Human-readable error message
        message: String,
        /// Optional backtrace
        backtrace: Option<String>,
    },

    /// Benchmark finished; the child may exit afterwards
    BenchmarkEnd {
        /// Every iteration completed
        completed: bool,
    },

    /// Free-form diagnostic text
    Log {
        /// Message text
        message: String,
    },
}

/// Categories of benchmark failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// Invalid descriptor or thread distribution
    Configuration,
    /// Setup or teardown fixture failed
    Fixture,
    /// Payload returned an error
    Payload,
    /// Rust panic (caught)
    Panic,
    /// Iteration timeout exceeded
    Timeout,
    /// Blackhole self-check failed
    Blackhole,
    /// Unknown benchmark or protocol violation
    Unknown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Fixture => "fixture",
            FailureKind::Payload => "payload",
            FailureKind::Panic => "panic",
            FailureKind::Timeout => "timeout",
            FailureKind::Blackhole => "blackhole",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Run one fork of a benchmark
    Run {
        /// Fully resolved descriptor
        descriptor: BenchmarkDescriptor,
        /// Fork position
        fork: ForkSpec,
    },

    /// Request graceful shutdown
    Shutdown,

    /// Ping for health check
    Ping,
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|p| p.get() as u32)
        .unwrap_or(1)
}

fn cpu_model_string() -> String {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|line| line.starts_with("model name"))
                    .and_then(|line| line.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
            .unwrap_or_else(|| "Unknown CPU".to_string())
    }

    #[cfg(not(target_os = "linux"))]
    {
        "Unknown CPU".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_capabilities_default() {
        let caps = WorkerCapabilities::default();
        assert_eq!(caps.protocol_version, crate::PROTOCOL_VERSION);
        assert_eq!(caps.pid, std::process::id());
        assert!(caps.cpu_count >= 1);
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::Fixture.to_string(), "fixture");
        assert_eq!(FailureKind::Timeout.to_string(), "timeout");
    }
}
