//! Benchmark Execution
//!
//! Runs planned benchmarks and collects their results, either in the current
//! process or one fresh child process per fork.
//!
//! ## Execution Modes
//!
//! - **In-process (`Executor`)**: used when a benchmark's fork count is 0.
//!   Fast, but the benchmark shares the harness's process state. Best for
//!   development and tests.
//!
//! - **Isolated (`IsolatedExecutor`)**: spawns one child per fork via the
//!   supervisor. Warmup forks run the full protocol and are discarded;
//!   measured forks are merged into one [`RunResult`].
//!
//! ## Data Flow
//!
//! ```text
//! ExecutionPlan (resolved descriptors)
//!        │
//!        ▼
//! ┌──────────────────┐
//! │  Executor/       │  Warmup → Measurement, per fork
//! │  IsolatedExecutor│  lifecycle events → OutputSink
//! └────────┬─────────┘
//!          │
//!          ▼
//!  BenchmarkOutcome (RunResult or failure)
//! ```

use crate::planner::ExecutionPlan;
use crate::supervisor::{Supervisor, SupervisorError};
use indicatif::{ProgressBar, ProgressStyle};
use microflux_core::{BenchmarkDef, BenchmarkRunner, OutputSink, Payload, panic_message};
use microflux_ipc::{BenchmarkDescriptor, FailureKind, ForkSpec};
use microflux_results::RunResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for benchmark execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionConfig {
    /// Stop after the first failed benchmark
    pub fail_fast: bool,
    /// Spawn this binary for forks instead of the current executable
    pub worker_binary: Option<std::path::PathBuf>,
    /// Handshake limit for fork children, 30 s when unset
    pub hello_timeout: Option<Duration>,
    /// Fixed wall-time limit per fork, derived from each descriptor when unset
    pub fork_timeout: Option<Duration>,
}

impl ExecutionConfig {
    /// Supervisor for isolated forks under this configuration
    pub fn supervisor(&self) -> Supervisor {
        let mut supervisor = match &self.worker_binary {
            Some(binary) => Supervisor::with_binary(binary),
            None => Supervisor::new(),
        };
        if let Some(timeout) = self.hello_timeout {
            supervisor = supervisor.with_hello_timeout(timeout);
        }
        if let Some(timeout) = self.fork_timeout {
            supervisor = supervisor.with_fork_timeout(timeout);
        }
        supervisor
    }
}

/// Final state of one benchmark
#[derive(Debug, Clone, PartialEq)]
pub enum BenchmarkOutcome {
    /// Every measured fork completed
    Completed(RunResult),
    /// The benchmark failed; partial data was discarded
    Failed {
        /// Qualified benchmark name
        benchmark: String,
        /// Failure category
        kind: FailureKind,
        /// Human-readable reason
        message: String,
    },
}

impl BenchmarkOutcome {
    /// Benchmark this outcome belongs to
    pub fn benchmark(&self) -> &str {
        match self {
            BenchmarkOutcome::Completed(run) => &run.benchmark,
            BenchmarkOutcome::Failed { benchmark, .. } => benchmark,
        }
    }

    /// Whether the benchmark completed
    pub fn is_completed(&self) -> bool {
        matches!(self, BenchmarkOutcome::Completed(_))
    }

    /// The run result of a completed benchmark
    pub fn result(&self) -> Option<&RunResult> {
        match self {
            BenchmarkOutcome::Completed(run) => Some(run),
            BenchmarkOutcome::Failed { .. } => None,
        }
    }

    fn failed(benchmark: &str, kind: FailureKind, message: impl Into<String>) -> Self {
        BenchmarkOutcome::Failed {
            benchmark: benchmark.to_string(),
            kind,
            message: message.into(),
        }
    }
}

/// Runs benchmarks in the current process
#[derive(Debug, Default)]
pub struct Executor;

impl Executor {
    /// Create an in-process executor
    pub fn new() -> Self {
        Self
    }

    /// Run `descriptor` once in-process; the result holds a single fork (index 0)
    pub fn run_benchmark(
        &self,
        def: &BenchmarkDef,
        descriptor: &BenchmarkDescriptor,
        sink: &mut dyn OutputSink,
    ) -> BenchmarkOutcome {
        let name = descriptor.name.as_str();
        debug!(benchmark = name, "running in-process");

        let built = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (def.payload)()));
        let payload = match built {
            Ok(payload) => Arc::<dyn Payload>::from(payload),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                sink.exception(name, FailureKind::Panic, &message);
                return BenchmarkOutcome::failed(name, FailureKind::Panic, message);
            }
        };

        let mut runner = match BenchmarkRunner::new(descriptor.clone(), payload) {
            Ok(runner) => runner,
            Err(e) => {
                sink.exception(name, e.kind(), &e.to_string());
                return BenchmarkOutcome::failed(name, e.kind(), e.to_string());
            }
        };

        match runner.run(sink) {
            Ok(result) => {
                let mut run = RunResult::new(name);
                run.push(result);
                BenchmarkOutcome::Completed(run)
            }
            Err(failure) => {
                debug!(
                    benchmark = name,
                    discarded = failure.partial.iterations().len(),
                    "discarding partial result"
                );
                BenchmarkOutcome::failed(name, failure.error.kind(), failure.error.to_string())
            }
        }
    }
}

/// Executor that runs every fork in its own child process
///
/// A crashing or hanging fork fails its benchmark without taking down the
/// supervisor process.
#[derive(Debug, Clone, Default)]
pub struct IsolatedExecutor {
    supervisor: Supervisor,
}

impl IsolatedExecutor {
    /// Create a new isolated executor
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }

    /// Run the warmup forks, then the measured forks, of `descriptor`
    pub fn run_benchmark(
        &self,
        descriptor: &BenchmarkDescriptor,
        sink: &mut dyn OutputSink,
    ) -> BenchmarkOutcome {
        let name = descriptor.name.as_str();
        let fail = |e: SupervisorError| BenchmarkOutcome::failed(name, e.kind(), e.to_string());

        for index in 1..=descriptor.warmup_forks {
            let fork = ForkSpec {
                index,
                count: descriptor.warmup_forks,
                warmup: true,
            };
            if let Err(e) = self.supervisor.run_fork(descriptor, fork, sink) {
                return fail(e);
            }
            debug!(benchmark = name, fork = index, "warmup fork discarded");
        }

        let mut run = RunResult::new(name);
        for index in 1..=descriptor.forks {
            let fork = ForkSpec {
                index,
                count: descriptor.forks,
                warmup: false,
            };
            match self.supervisor.run_fork(descriptor, fork, sink) {
                Ok(result) => run.push(result),
                Err(e) => return fail(e),
            }
        }
        BenchmarkOutcome::Completed(run)
    }
}

/// Progress bar over `len` benchmarks, hidden when `enabled` is false
pub fn progress_bar(len: usize, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Run every benchmark of `plan`, in order
///
/// Benchmarks with a fork count of 0 run in-process; the rest run isolated.
/// With `fail_fast`, execution stops after the first failure.
pub fn execute_plan(
    plan: &ExecutionPlan,
    config: &ExecutionConfig,
    sink: &mut dyn OutputSink,
    progress: &ProgressBar,
) -> Vec<BenchmarkOutcome> {
    let executor = Executor::new();
    let isolated = IsolatedExecutor::new(config.supervisor());

    let mut outcomes = Vec::with_capacity(plan.len());
    for planned in &plan.benchmarks {
        let descriptor = &planned.descriptor;
        progress.set_message(descriptor.name.clone());
        info!(
            benchmark = %descriptor.name,
            forks = descriptor.forks,
            warmup_forks = descriptor.warmup_forks,
            "benchmark scheduled"
        );

        let outcome = if descriptor.forks == 0 {
            executor.run_benchmark(planned.def, descriptor, sink)
        } else {
            isolated.run_benchmark(descriptor, sink)
        };
        progress.inc(1);

        let failed = !outcome.is_completed();
        outcomes.push(outcome);
        if failed && config.fail_fast {
            warn!(benchmark = %descriptor.name, "stopping at first failure");
            break;
        }
    }

    progress.finish_and_clear();
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::build_plan;
    use microflux_core::{BenchError, Overrides, RecordingSink, payload_fn, payload_with};
    use microflux_results::IterationType;

    fn counting() -> Box<dyn Payload> {
        Box::new(payload_fn(|| (0..64u64).sum::<u64>()))
    }

    fn failing() -> Box<dyn Payload> {
        Box::new(payload_with(|_ctx| Err(BenchError::msg("no luck"))))
    }

    fn unbuildable() -> Box<dyn Payload> {
        panic!("payload constructor panicked")
    }

    fn unbuildable_formatted() -> Box<dyn Payload> {
        let stage = "constructor";
        panic!("payload {stage} panicked with formatted message")
    }

    const QUICK: Overrides<'static> = Overrides {
        warmup_iterations: Some(1),
        warmup_time_ns: Some(5_000_000),
        measurement_iterations: Some(2),
        measurement_time_ns: Some(5_000_000),
        forks: Some(0),
        timeout_ns: Some(10_000_000_000),
        ..Overrides::NONE
    };

    static COUNTING: BenchmarkDef = BenchmarkDef {
        name: "counting",
        class: "exec",
        class_options: QUICK,
        options: Overrides::NONE,
        payload: counting,
    };

    static FAILING: BenchmarkDef = BenchmarkDef {
        name: "failing",
        class: "exec",
        class_options: QUICK,
        options: Overrides::NONE,
        payload: failing,
    };

    static UNBUILDABLE: BenchmarkDef = BenchmarkDef {
        name: "unbuildable",
        class: "exec",
        class_options: QUICK,
        options: Overrides::NONE,
        payload: unbuildable,
    };

    #[test]
    fn test_in_process_run_completes() {
        let mut sink = RecordingSink::default();
        let descriptor = COUNTING.descriptor(&[]);
        let outcome = Executor::new().run_benchmark(&COUNTING, &descriptor, &mut sink);

        let run = outcome.result().expect("completed");
        assert_eq!(run.forks.len(), 1);
        assert_eq!(run.forks[0].fork, 0);
        assert_eq!(run.iterations().count(), 2);
        assert!(run.primary().unwrap().score() > 0.0);
        assert_eq!(sink.iterations(IterationType::Warmup).count(), 1);
    }

    #[test]
    fn test_payload_failure_fails_benchmark() {
        let mut sink = RecordingSink::default();
        let descriptor = FAILING.descriptor(&[]);
        let outcome = Executor::new().run_benchmark(&FAILING, &descriptor, &mut sink);

        match outcome {
            BenchmarkOutcome::Failed { kind, message, .. } => {
                assert_eq!(kind, FailureKind::Payload);
                assert!(message.contains("no luck"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(sink.has_exception());
    }

    #[test]
    fn test_constructor_panic_is_caught() {
        let mut sink = RecordingSink::default();
        let descriptor = UNBUILDABLE.descriptor(&[]);
        let outcome = Executor::new().run_benchmark(&UNBUILDABLE, &descriptor, &mut sink);
        assert_eq!(
            outcome,
            BenchmarkOutcome::Failed {
                benchmark: "exec.unbuildable".to_string(),
                kind: FailureKind::Panic,
                message: "payload constructor panicked".to_string(),
            }
        );
    }

    static UNBUILDABLE_FORMATTED: BenchmarkDef = BenchmarkDef {
        name: "unbuildable_formatted",
        class: "exec",
        class_options: QUICK,
        options: Overrides::NONE,
        payload: unbuildable_formatted,
    };

    #[test]
    fn test_constructor_panic_with_owned_message() {
        let mut sink = RecordingSink::default();
        let descriptor = UNBUILDABLE_FORMATTED.descriptor(&[]);
        let outcome =
            Executor::new().run_benchmark(&UNBUILDABLE_FORMATTED, &descriptor, &mut sink);
        match outcome {
            BenchmarkOutcome::Failed { kind, message, .. } => {
                assert_eq!(kind, FailureKind::Panic);
                assert_eq!(message, "payload constructor panicked with formatted message");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(sink.has_exception());
    }

    #[test]
    fn test_plan_continues_past_failures() {
        let plan = build_plan(vec![&COUNTING, &FAILING, &UNBUILDABLE], None, &[]);
        let mut sink = RecordingSink::default();
        let outcomes = execute_plan(
            &plan,
            &ExecutionConfig::default(),
            &mut sink,
            &progress_bar(plan.len(), false),
        );

        let names: Vec<_> = outcomes.iter().map(BenchmarkOutcome::benchmark).collect();
        assert_eq!(names, vec!["exec.counting", "exec.failing", "exec.unbuildable"]);
        assert_eq!(outcomes.iter().filter(|o| o.is_completed()).count(), 1);
    }

    #[test]
    fn test_config_builds_supervisor_timeouts() {
        let config = ExecutionConfig {
            fork_timeout: Some(Duration::from_secs(3)),
            ..ExecutionConfig::default()
        };
        let descriptor = COUNTING.descriptor(&[]);
        assert_eq!(
            config.supervisor().fork_timeout(&descriptor),
            Duration::from_secs(3)
        );
        assert_eq!(
            ExecutionConfig::default().supervisor().fork_timeout(&descriptor),
            Duration::from_nanos(descriptor.fork_timeout_ns())
        );
    }

    #[test]
    fn test_plan_fail_fast_stops_early() {
        let plan = build_plan(vec![&COUNTING, &FAILING, &UNBUILDABLE], None, &[]);
        let config = ExecutionConfig {
            fail_fast: true,
            ..ExecutionConfig::default()
        };
        let mut sink = RecordingSink::default();
        let outcomes = execute_plan(&plan, &config, &mut sink, &progress_bar(plan.len(), false));

        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[1].is_completed());
    }
}
