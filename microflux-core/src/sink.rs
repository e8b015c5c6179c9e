//! Output Sinks
//!
//! Lifecycle callbacks, in chronological order, for every benchmark run.
//! The fork child forwards them over IPC; the supervisor renders them.

use microflux_ipc::{BenchmarkDescriptor, FailureKind};
use microflux_results::{IterationParams, IterationResult, IterationType, RunResult};
use tracing::{debug, info, warn};

/// Receiver of run lifecycle events
pub trait OutputSink {
    /// A benchmark is about to start
    fn benchmark_start(&mut self, descriptor: &BenchmarkDescriptor);

    /// An iteration is about to start
    fn iteration_start(&mut self, params: &IterationParams, index: u32);

    /// An iteration finished; warmup iterations are tagged by `params.kind`
    fn iteration_result(&mut self, params: &IterationParams, index: u32, result: &IterationResult);

    /// The benchmark failed
    fn exception(&mut self, benchmark: &str, kind: FailureKind, message: &str);

    /// The benchmark ended, successfully or not
    fn benchmark_end(&mut self, benchmark: &str, completed: bool);

    /// Every benchmark of the run ended
    fn run_end(&mut self, results: &[RunResult]);
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn benchmark_start(&mut self, descriptor: &BenchmarkDescriptor) {
        (**self).benchmark_start(descriptor)
    }

    fn iteration_start(&mut self, params: &IterationParams, index: u32) {
        (**self).iteration_start(params, index)
    }

    fn iteration_result(&mut self, params: &IterationParams, index: u32, result: &IterationResult) {
        (**self).iteration_result(params, index, result)
    }

    fn exception(&mut self, benchmark: &str, kind: FailureKind, message: &str) {
        (**self).exception(benchmark, kind, message)
    }

    fn benchmark_end(&mut self, benchmark: &str, completed: bool) {
        (**self).benchmark_end(benchmark, completed)
    }

    fn run_end(&mut self, results: &[RunResult]) {
        (**self).run_end(results)
    }
}

/// Sink that only logs through `tracing`
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn benchmark_start(&mut self, descriptor: &BenchmarkDescriptor) {
        info!(
            benchmark = %descriptor.name,
            mode = %descriptor.mode,
            threads = descriptor.threads,
            "benchmark start"
        );
    }

    fn iteration_start(&mut self, params: &IterationParams, index: u32) {
        debug!(kind = ?params.kind, index, "iteration start");
    }

    fn iteration_result(&mut self, params: &IterationParams, index: u32, result: &IterationResult) {
        match result.primary() {
            Ok(primary) => debug!(
                kind = ?params.kind,
                index,
                score = primary.score(),
                unit = %primary.score_unit(),
                "iteration result"
            ),
            Err(e) => warn!(kind = ?params.kind, index, "iteration without primary result: {e}"),
        }
    }

    fn exception(&mut self, benchmark: &str, kind: FailureKind, message: &str) {
        warn!(benchmark, %kind, "benchmark failed: {message}");
    }

    fn benchmark_end(&mut self, benchmark: &str, completed: bool) {
        info!(benchmark, completed, "benchmark end");
    }

    fn run_end(&mut self, results: &[RunResult]) {
        info!(benchmarks = results.len(), "run end");
    }
}

/// One recorded lifecycle callback
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// `benchmark_start`
    BenchmarkStart(String),
    /// `iteration_start`
    IterationStart(IterationType, u32),
    /// `iteration_result`
    IterationResult(IterationType, u32, IterationResult),
    /// `exception`
    Exception(FailureKind, String),
    /// `benchmark_end`
    BenchmarkEnd(String, bool),
    /// `run_end`
    RunEnd(usize),
}

/// Sink that keeps every event, for tests and tooling
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Events in arrival order
    pub events: Vec<SinkEvent>,
}

impl RecordingSink {
    /// Recorded iteration results of `kind`
    pub fn iterations(&self, kind: IterationType) -> impl Iterator<Item = &IterationResult> {
        self.events.iter().filter_map(move |e| match e {
            SinkEvent::IterationResult(k, _, r) if *k == kind => Some(r),
            _ => None,
        })
    }

    /// Whether an exception was recorded
    pub fn has_exception(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, SinkEvent::Exception(..)))
    }
}

impl OutputSink for RecordingSink {
    fn benchmark_start(&mut self, descriptor: &BenchmarkDescriptor) {
        self.events
            .push(SinkEvent::BenchmarkStart(descriptor.name.clone()));
    }

    fn iteration_start(&mut self, params: &IterationParams, index: u32) {
        self.events.push(SinkEvent::IterationStart(params.kind, index));
    }

    fn iteration_result(&mut self, params: &IterationParams, index: u32, result: &IterationResult) {
        self.events
            .push(SinkEvent::IterationResult(params.kind, index, result.clone()));
    }

    fn exception(&mut self, _benchmark: &str, kind: FailureKind, message: &str) {
        self.events
            .push(SinkEvent::Exception(kind, message.to_string()));
    }

    fn benchmark_end(&mut self, benchmark: &str, completed: bool) {
        self.events
            .push(SinkEvent::BenchmarkEnd(benchmark.to_string(), completed));
    }

    fn run_end(&mut self, results: &[RunResult]) {
        self.events.push(SinkEvent::RunEnd(results.len()));
    }
}
