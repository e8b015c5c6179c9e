//! Iteration Scheduler
//!
//! Drives one benchmark through `Init -> Warmup -> Measurement -> Done`
//! (or `Error`) on a worker pool that lives for the whole run. Every
//! iteration gets a fresh [`Control`]; the scheduler opens the measured
//! window once every thread is ready and closes it when the iteration time
//! has elapsed.

use crate::blackhole::{Blackhole, BlackholeError, BlackholeFactory};
use crate::control::{Control, WaitOutcome};
use crate::distribution::{Distribution, DistributionError, ThreadAssignment, distribute};
use crate::payload::{Counters, Fixture, InvocationContext, Level, Payload};
use crate::sink::OutputSink;
use microflux_ipc::{BenchmarkDescriptor, DescriptorError, FailureKind};
use microflux_results::{
    AggregationError, BenchmarkResult, IterationParams, IterationResult, IterationType,
    Measurement, Mode, ResultRole, TimeUnit,
};
use microflux_stats::{HistogramError, HistogramStatistics};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a benchmark run failed
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Invalid thread distribution: {0}")]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Blackhole(#[from] BlackholeError),

    #[error("Fixture '{name}' failed: {message}")]
    Fixture { name: String, message: String },

    #[error("Payload failed: {0}")]
    Payload(String),

    #[error("Panic: {0}")]
    Panic(String),

    #[error("{kind:?} iteration {index} timed out after {timeout:?}")]
    Timeout {
        kind: IterationType,
        index: u32,
        timeout: Duration,
    },

    #[error("Aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Latency histogram failed: {0}")]
    Histogram(#[from] HistogramError),

    #[error("Failed to start worker thread: {0}")]
    Spawn(String),

    #[error("Worker thread exited unexpectedly")]
    WorkerLost,

    #[error("Aborted after a sibling thread failed")]
    Aborted,
}

impl RunError {
    /// Failure category reported across the fork boundary
    pub fn kind(&self) -> FailureKind {
        match self {
            RunError::Descriptor(_) | RunError::Distribution(_) => FailureKind::Configuration,
            RunError::Blackhole(_) => FailureKind::Blackhole,
            RunError::Fixture { .. } => FailureKind::Fixture,
            RunError::Payload(_) => FailureKind::Payload,
            RunError::Panic(_) => FailureKind::Panic,
            RunError::Timeout { .. } => FailureKind::Timeout,
            RunError::Aggregation(_)
            | RunError::Histogram(_)
            | RunError::Spawn(_)
            | RunError::WorkerLost
            | RunError::Aborted => FailureKind::Unknown,
        }
    }
}

/// A failed run together with the measurement iterations completed before
/// the failure. The partial result must not be reported as a score.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    /// What went wrong
    pub error: RunError,
    /// Iterations sealed before the failure
    pub partial: BenchmarkResult,
}

/// Runner state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Constructed, nothing ran
    Init,
    /// Running warmup iterations
    Warmup,
    /// Running measurement iterations
    Measurement,
    /// Every iteration completed
    Done,
    /// The run failed
    Error,
}

/// Per-run settings shared by the worker threads
#[derive(Debug)]
struct WorkerSettings {
    name: String,
    mode: Mode,
    unit: TimeUnit,
    ops_per_invocation: u64,
    sync: bool,
}

#[derive(Clone)]
struct Job {
    control: Arc<Control>,
    params: IterationParams,
    trial_start: bool,
    trial_end: bool,
}

struct Report {
    thread: u32,
    outcome: Result<Vec<Measurement>, RunError>,
}

/// Executes one benchmark descriptor in this process
pub struct BenchmarkRunner {
    descriptor: BenchmarkDescriptor,
    distribution: Distribution,
    payload: Arc<dyn Payload>,
    fork: u32,
    factory: BlackholeFactory,
    state: RunnerState,
}

impl BenchmarkRunner {
    /// Validate `descriptor` and plan the thread layout
    pub fn new(descriptor: BenchmarkDescriptor, payload: Arc<dyn Payload>) -> Result<Self, RunError> {
        descriptor.validate()?;
        let distribution = distribute(descriptor.threads, &descriptor.thread_groups)?;
        if distribution.was_rounded(descriptor.threads) {
            info!(
                benchmark = %descriptor.name,
                requested = descriptor.threads,
                effective = distribution.effective_threads,
                "thread count rounded up to a multiple of the group size"
            );
        }
        Ok(Self {
            descriptor,
            distribution,
            payload,
            fork: 0,
            factory: BlackholeFactory::new(),
            state: RunnerState::Init,
        })
    }

    /// Tag results with a fork index
    pub fn with_fork(mut self, fork: u32) -> Self {
        self.fork = fork;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_factory(mut self, factory: BlackholeFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Current state
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Planned thread layout
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// Descriptor being run
    pub fn descriptor(&self) -> &BenchmarkDescriptor {
        &self.descriptor
    }

    /// Run every warmup and measurement iteration, reporting to `sink`
    pub fn run(&mut self, sink: &mut dyn OutputSink) -> Result<BenchmarkResult, RunFailure> {
        let mut result = BenchmarkResult::new(&self.descriptor.name, self.fork);
        sink.benchmark_start(&self.descriptor);

        let mut pool = None;
        let outcome = self.run_phases(sink, &mut result, &mut pool);
        match outcome {
            Ok(()) => {
                if let Some(pool) = pool {
                    pool.shutdown();
                }
                self.state = RunnerState::Done;
                sink.benchmark_end(&self.descriptor.name, true);
                Ok(result)
            }
            Err(error) => {
                if let Some(pool) = pool {
                    if matches!(error, RunError::Timeout { .. }) {
                        pool.abandon();
                    } else {
                        pool.shutdown();
                    }
                }
                self.state = RunnerState::Error;
                warn!(benchmark = %self.descriptor.name, "run failed: {error}");
                sink.exception(&self.descriptor.name, error.kind(), &error.to_string());
                sink.benchmark_end(&self.descriptor.name, false);
                Err(RunFailure {
                    error,
                    partial: result,
                })
            }
        }
    }

    fn run_phases(
        &mut self,
        sink: &mut dyn OutputSink,
        result: &mut BenchmarkResult,
        pool_slot: &mut Option<WorkerPool>,
    ) -> Result<(), RunError> {
        let blackholes = self
            .distribution
            .assignments
            .iter()
            .map(|_| self.factory.create(self.descriptor.blackhole))
            .collect::<Result<Vec<_>, _>>()?;

        let settings = Arc::new(WorkerSettings {
            name: self.descriptor.name.clone(),
            mode: self.descriptor.mode,
            unit: self.descriptor.time_unit,
            ops_per_invocation: self.descriptor.ops_per_invocation,
            sync: self.descriptor.sync_iterations,
        });
        let fixtures: Arc<[Fixture]> = self.payload.fixtures().into();
        let pool = pool_slot.insert(WorkerPool::spawn(
            &self.distribution.assignments,
            blackholes,
            &self.payload,
            &fixtures,
            &settings,
        )?);

        let warmup = self.descriptor.warmup_params();
        let measurement = self.descriptor.measurement_params();
        let total = warmup.count + measurement.count;
        let mut ordinal = 0;

        self.state = RunnerState::Warmup;
        debug!(benchmark = %self.descriptor.name, "state -> warmup");
        for index in 1..=warmup.count {
            ordinal += 1;
            let iteration = self.run_iteration(pool, sink, warmup, index, ordinal, total)?;
            sink.iteration_result(&warmup, index, &iteration);
        }

        self.state = RunnerState::Measurement;
        debug!(benchmark = %self.descriptor.name, "state -> measurement");
        for index in 1..=measurement.count {
            ordinal += 1;
            let iteration = self.run_iteration(pool, sink, measurement, index, ordinal, total)?;
            sink.iteration_result(&measurement, index, &iteration);
            result.push(iteration)?;
        }
        Ok(())
    }

    fn run_iteration(
        &self,
        pool: &WorkerPool,
        sink: &mut dyn OutputSink,
        params: IterationParams,
        index: u32,
        ordinal: u32,
        total: u32,
    ) -> Result<IterationResult, RunError> {
        sink.iteration_start(&params, index);
        let threads = self.distribution.effective_threads;
        let control = Arc::new(Control::new(threads));
        pool.dispatch(&Job {
            control: Arc::clone(&control),
            params,
            trial_start: ordinal == 1,
            trial_end: ordinal == total,
        })?;

        let timeout = Duration::from_nanos(self.descriptor.timeout_ns);
        let timed_out = || RunError::Timeout {
            kind: params.kind,
            index,
            timeout,
        };
        let time_bounded = self.descriptor.mode.is_time_bounded();
        let window = if time_bounded {
            Duration::from_nanos(params.time_ns)
        } else {
            Duration::ZERO
        };
        let deadline = Instant::now() + window + timeout;

        match control.wait_ready(deadline) {
            WaitOutcome::Reached => {
                let opened = Instant::now();
                control.start();
                if time_bounded {
                    control.sleep_until(opened + window);
                    control.stop();
                }
            }
            WaitOutcome::Aborted => {}
            WaitOutcome::TimedOut => {
                control.abort();
                return Err(timed_out());
            }
        }

        let mut reports = Vec::with_capacity(threads as usize);
        while reports.len() < threads as usize {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match pool.reports.recv_timeout(remaining) {
                Ok(report) => reports.push(report),
                Err(RecvTimeoutError::Timeout) => {
                    control.abort();
                    return Err(timed_out());
                }
                Err(RecvTimeoutError::Disconnected) => return Err(RunError::WorkerLost),
            }
        }
        control.stop();

        reports.sort_by_key(|r| r.thread);
        let mut failure = None;
        let mut iteration = IterationResult::new(&self.descriptor.name, params, index);
        for report in reports {
            match report.outcome {
                Ok(raw) => iteration.extend(raw)?,
                Err(RunError::Aborted) => {}
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if control.is_aborted() {
            return Err(RunError::Aborted);
        }
        iteration.seal();
        Ok(iteration)
    }
}

struct WorkerPool {
    jobs: Vec<Sender<Job>>,
    reports: Receiver<Report>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(
        assignments: &[ThreadAssignment],
        blackholes: Vec<Blackhole>,
        payload: &Arc<dyn Payload>,
        fixtures: &Arc<[Fixture]>,
        settings: &Arc<WorkerSettings>,
    ) -> Result<Self, RunError> {
        let (report_tx, reports) = mpsc::channel();
        let mut jobs = Vec::with_capacity(assignments.len());
        let mut handles = Vec::with_capacity(assignments.len());

        for (thread, blackhole) in assignments.iter().zip(blackholes) {
            let (job_tx, job_rx) = mpsc::channel();
            let worker = Worker {
                thread: *thread,
                blackhole,
                payload: Arc::clone(payload),
                fixtures: Arc::clone(fixtures),
                settings: Arc::clone(settings),
            };
            let report_tx = report_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("microflux-worker-{}", thread.thread_index))
                .spawn(move || worker.serve(job_rx, report_tx))
                .map_err(|e| RunError::Spawn(e.to_string()))?;
            jobs.push(job_tx);
            handles.push(handle);
        }

        Ok(Self {
            jobs,
            reports,
            handles,
        })
    }

    fn dispatch(&self, job: &Job) -> Result<(), RunError> {
        for tx in &self.jobs {
            tx.send(job.clone()).map_err(|_| RunError::WorkerLost)?;
        }
        Ok(())
    }

    fn shutdown(self) {
        drop(self.jobs);
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("worker thread panicked outside a job");
            }
        }
    }

    /// Detach threads that may be stuck inside the payload
    fn abandon(self) {
        warn!(threads = self.handles.len(), "abandoning unresponsive worker threads");
        drop(self.jobs);
    }
}

struct Worker {
    thread: ThreadAssignment,
    blackhole: Blackhole,
    payload: Arc<dyn Payload>,
    fixtures: Arc<[Fixture]>,
    settings: Arc<WorkerSettings>,
}

impl Worker {
    fn serve(mut self, jobs: Receiver<Job>, reports: Sender<Report>) {
        while let Ok(job) = jobs.recv() {
            let outcome = match catch_unwind(AssertUnwindSafe(|| self.execute(&job))) {
                Ok(outcome) => outcome,
                Err(panic) => Err(RunError::Panic(panic_message(panic.as_ref()))),
            };
            if outcome.is_err() {
                job.control.abort();
            }
            let report = Report {
                thread: self.thread.thread_index,
                outcome,
            };
            if reports.send(report).is_err() {
                break;
            }
        }
    }

    fn execute(&mut self, job: &Job) -> Result<Vec<Measurement>, RunError> {
        let control = &*job.control;
        let fixtures = Arc::clone(&self.fixtures);
        let owned: Vec<&Fixture> = fixtures
            .iter()
            .filter(|f| f.is_owned_by(&self.thread))
            .collect();

        for fixture in owned.iter().filter(|f| runs_at(f, job.trial_start)) {
            fixture.run_setup(&self.thread).map_err(|e| fixture_error(fixture, e))?;
        }
        if !control.rendezvous_setup() {
            return Err(RunError::Aborted);
        }

        let invoker = Invoker {
            payload: self.payload.as_ref(),
            per_invocation: owned
                .iter()
                .copied()
                .filter(|f| f.level == Level::Invocation)
                .collect(),
            thread: self.thread,
        };
        let mut counters = Counters::default();
        let mut ctx =
            InvocationContext::new(&self.thread, &mut self.blackhole, control, &mut counters);

        let primary = match self.settings.mode {
            Mode::SingleShotTime => single_shot(&invoker, &mut ctx, control, &self.settings, &job.params)?,
            mode => timed(&invoker, &mut ctx, control, &self.settings, mode)?,
        };
        ctx.blackhole().evaporate();
        drop(ctx);

        if !control.rendezvous_teardown() {
            return Err(RunError::Aborted);
        }
        for fixture in owned.iter().filter(|f| runs_at(f, job.trial_end)) {
            fixture
                .run_teardown(&self.thread)
                .map_err(|e| fixture_error(fixture, e))?;
        }

        let mut raw = vec![primary];
        raw.extend(counters.drain());
        Ok(raw)
    }
}

fn runs_at(fixture: &Fixture, trial_edge: bool) -> bool {
    match fixture.level {
        Level::Trial => trial_edge,
        Level::Iteration => true,
        Level::Invocation => false,
    }
}

fn fixture_error(fixture: &Fixture, e: crate::BenchError) -> RunError {
    RunError::Fixture {
        name: fixture.name.clone(),
        message: e.to_string(),
    }
}

struct Invoker<'a> {
    payload: &'a dyn Payload,
    per_invocation: Vec<&'a Fixture>,
    thread: ThreadAssignment,
}

impl Invoker<'_> {
    #[inline]
    fn call(&self, ctx: &mut InvocationContext<'_>) -> Result<(), RunError> {
        self.payload
            .invoke(ctx)
            .map_err(|e| RunError::Payload(e.to_string()))
    }

    /// One call with its invocation fixtures, timing only the call itself
    #[inline]
    fn call_timed(&self, ctx: &mut InvocationContext<'_>) -> Result<Duration, RunError> {
        for f in &self.per_invocation {
            f.run_setup(&self.thread).map_err(|e| fixture_error(f, e))?;
        }
        let started = Instant::now();
        self.call(ctx)?;
        let elapsed = started.elapsed();
        for f in &self.per_invocation {
            f.run_teardown(&self.thread).map_err(|e| fixture_error(f, e))?;
        }
        Ok(elapsed)
    }

    fn unmeasured(&self, ctx: &mut InvocationContext<'_>) -> Result<(), RunError> {
        if self.per_invocation.is_empty() {
            self.call(ctx)
        } else {
            self.call_timed(ctx).map(|_| ())
        }
    }
}

fn timed(
    invoker: &Invoker<'_>,
    ctx: &mut InvocationContext<'_>,
    control: &Control,
    settings: &WorkerSettings,
    mode: Mode,
) -> Result<Measurement, RunError> {
    control.announce_ready();
    if settings.sync {
        while !control.is_started() {
            if control.is_aborted() {
                return Err(RunError::Aborted);
            }
            invoker.unmeasured(ctx)?;
        }
    } else if !control.wait_started() {
        return Err(RunError::Aborted);
    }

    ctx.set_measuring(true);
    let opi = settings.ops_per_invocation;
    let mut calls = 0u64;
    let mut histogram = HistogramStatistics::new();
    let started = Instant::now();
    let mut busy = Duration::ZERO;
    while !control.is_stopped() {
        if mode == Mode::SampleTime {
            let elapsed = invoker.call_timed(ctx)?;
            histogram.record(elapsed.as_nanos() as u64 / opi, opi)?;
        } else if invoker.per_invocation.is_empty() {
            invoker.call(ctx)?;
        } else {
            busy += invoker.call_timed(ctx)?;
        }
        calls += 1;
    }
    let window = started.elapsed();
    ctx.set_measuring(false);
    control.announce_done();

    if settings.sync {
        while !control.all_done() {
            if control.is_aborted() {
                return Err(RunError::Aborted);
            }
            invoker.unmeasured(ctx)?;
        }
    }

    let duration = if invoker.per_invocation.is_empty() {
        window
    } else {
        busy
    };
    let duration_ns = duration.as_nanos() as u64;
    let ops = calls * opi;
    let name = settings.name.as_str();
    Ok(match mode {
        Mode::AverageTime => {
            Measurement::average_time(ResultRole::Primary, name, ops, duration_ns, settings.unit)
        }
        Mode::SampleTime => {
            Measurement::sample_time(ResultRole::Primary, name, histogram, settings.unit)
        }
        _ => Measurement::throughput(ResultRole::Primary, name, ops, duration_ns, settings.unit),
    })
}

fn single_shot(
    invoker: &Invoker<'_>,
    ctx: &mut InvocationContext<'_>,
    control: &Control,
    settings: &WorkerSettings,
    params: &IterationParams,
) -> Result<Measurement, RunError> {
    control.announce_ready();
    if !control.wait_started() {
        return Err(RunError::Aborted);
    }
    ctx.set_measuring(true);
    let mut elapsed = Duration::ZERO;
    for _ in 0..params.batch_size {
        elapsed += invoker.call_timed(ctx)?;
    }
    ctx.set_measuring(false);
    control.announce_done();

    let ns = elapsed.as_nanos() as u64 / settings.ops_per_invocation;
    Ok(Measurement::single_shot(
        ResultRole::Primary,
        settings.name.as_str(),
        ns,
        settings.unit,
    ))
}

/// Message carried by a caught panic
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
