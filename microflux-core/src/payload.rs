//! Payloads and Fixtures
//!
//! A [`Payload`] is the measured unit of work. The runner calls
//! [`Payload::invoke`] once per operation from every worker thread, so
//! payloads are shared (`Send + Sync`) and keep per-thread state behind
//! their own synchronization or in thread-scoped fixtures.

use crate::{Blackhole, Control, ThreadAssignment};
use microflux_results::{AggregationPolicy, Measurement};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Failure reported by a payload or fixture
#[derive(Debug, Clone, PartialEq)]
pub struct BenchError {
    message: String,
}

impl BenchError {
    /// Error carrying `message`
    pub fn msg(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    /// Error text
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: std::error::Error> From<E> for BenchError {
    fn from(e: E) -> Self {
        Self::msg(e)
    }
}

/// When a fixture runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Before the first and after the last iteration of the run
    Trial,
    /// Around every iteration
    Iteration,
    /// Around every payload call, outside the timed region
    Invocation,
}

/// Which threads run a fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Thread 0 only
    Benchmark,
    /// The first thread of every group
    Group,
    /// Every thread
    Thread,
}

type FixtureFn = Arc<dyn Fn(&ThreadAssignment) -> Result<(), BenchError> + Send + Sync>;

/// Setup and teardown hooks around payload calls
#[derive(Clone)]
pub struct Fixture {
    /// Name used in failure reports
    pub name: String,
    /// When it runs
    pub level: Level,
    /// Who runs it
    pub scope: Scope,
    setup: Option<FixtureFn>,
    teardown: Option<FixtureFn>,
}

impl Fixture {
    /// Fixture without hooks
    pub fn new(name: impl Into<String>, level: Level, scope: Scope) -> Self {
        Self {
            name: name.into(),
            level,
            scope,
            setup: None,
            teardown: None,
        }
    }

    /// Set the setup hook
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&ThreadAssignment) -> Result<(), BenchError> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }

    /// Set the teardown hook
    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&ThreadAssignment) -> Result<(), BenchError> + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(f));
        self
    }

    /// Whether `thread` executes this fixture
    pub fn is_owned_by(&self, thread: &ThreadAssignment) -> bool {
        match self.scope {
            Scope::Benchmark => thread.thread_index == 0,
            Scope::Group => thread.group_thread_index == 0,
            Scope::Thread => true,
        }
    }

    pub(crate) fn run_setup(&self, thread: &ThreadAssignment) -> Result<(), BenchError> {
        match &self.setup {
            Some(f) => f(thread),
            None => Ok(()),
        }
    }

    pub(crate) fn run_teardown(&self, thread: &ThreadAssignment) -> Result<(), BenchError> {
        match &self.teardown {
            Some(f) => f(thread),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixture")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("scope", &self.scope)
            .finish()
    }
}

/// The measured unit of work
pub trait Payload: Send + Sync {
    /// Perform one operation
    fn invoke(&self, ctx: &mut InvocationContext<'_>) -> Result<(), BenchError>;

    /// Fixtures run around iterations and invocations
    fn fixtures(&self) -> Vec<Fixture> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
struct Counter {
    policy: AggregationPolicy,
    unit: String,
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
}

impl Counter {
    fn value(&self) -> f64 {
        match self.policy {
            AggregationPolicy::Sum => self.sum,
            AggregationPolicy::Average => self.sum / self.count as f64,
            AggregationPolicy::Max => self.max,
            AggregationPolicy::Min => self.min,
        }
    }
}

/// Auxiliary counters of one thread for one iteration
#[derive(Debug, Default)]
pub(crate) struct Counters {
    cells: BTreeMap<String, Counter>,
}

impl Counters {
    fn record(&mut self, label: &str, value: f64, policy: AggregationPolicy, unit: &str) {
        let cell = self
            .cells
            .entry(label.to_string())
            .or_insert_with(|| Counter {
                policy,
                unit: unit.to_string(),
                sum: 0.0,
                count: 0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            });
        cell.sum += value;
        cell.count += 1;
        cell.min = cell.min.min(value);
        cell.max = cell.max.max(value);
    }

    /// Drain into secondary results
    pub(crate) fn drain(&mut self) -> Vec<Measurement> {
        std::mem::take(&mut self.cells)
            .into_iter()
            .map(|(label, c)| Measurement::scalar(label, c.value(), c.policy, c.unit))
            .collect()
    }
}

/// Everything a payload call can reach
pub struct InvocationContext<'a> {
    thread: &'a ThreadAssignment,
    blackhole: &'a mut Blackhole,
    control: &'a Control,
    counters: &'a mut Counters,
    measuring: bool,
}

impl<'a> InvocationContext<'a> {
    pub(crate) fn new(
        thread: &'a ThreadAssignment,
        blackhole: &'a mut Blackhole,
        control: &'a Control,
        counters: &'a mut Counters,
    ) -> Self {
        Self {
            thread,
            blackhole,
            control,
            counters,
            measuring: false,
        }
    }

    pub(crate) fn set_measuring(&mut self, measuring: bool) {
        self.measuring = measuring;
    }

    /// Position of the calling thread
    pub fn thread(&self) -> &ThreadAssignment {
        self.thread
    }

    /// Value sink of the calling thread
    pub fn blackhole(&mut self) -> &mut Blackhole {
        self.blackhole
    }

    /// Control signal of the current iteration
    pub fn control(&self) -> &Control {
        self.control
    }

    /// Whether this call falls inside the measured window
    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// Add `delta` to a summed secondary counter
    pub fn counter(&mut self, label: &str, delta: f64) {
        self.counter_with(label, delta, AggregationPolicy::Sum, "#");
    }

    /// Record `value` into a secondary counter with an explicit policy.
    ///
    /// Calls outside the measured window are ignored.
    pub fn counter_with(&mut self, label: &str, value: f64, policy: AggregationPolicy, unit: &str) {
        if self.measuring {
            self.counters.record(label, value, policy, unit);
        }
    }
}

/// [`Payload`] built from a closure
pub struct FnPayload<F> {
    f: F,
    fixtures: Vec<Fixture>,
}

impl<F> FnPayload<F> {
    /// Attach a fixture
    pub fn with_fixture(mut self, fixture: Fixture) -> Self {
        self.fixtures.push(fixture);
        self
    }
}

/// Payload from a closure whose return value is consumed by the context's
/// blackhole, so it honors the descriptor's [`BlackholeMode`]
///
/// [`BlackholeMode`]: microflux_ipc::BlackholeMode
pub fn payload_fn<F, T>(f: F) -> FnPayload<impl Fn(&mut InvocationContext<'_>) -> Result<(), BenchError> + Send + Sync>
where
    F: Fn() -> T + Send + Sync,
{
    payload_with(move |ctx: &mut InvocationContext<'_>| {
        let value = f();
        ctx.blackhole().consume_opaque(value);
        Ok(())
    })
}

/// Payload from a closure that drives the invocation context itself
pub fn payload_with<F>(f: F) -> FnPayload<F>
where
    F: Fn(&mut InvocationContext<'_>) -> Result<(), BenchError> + Send + Sync,
{
    FnPayload {
        f,
        fixtures: Vec::new(),
    }
}

impl<F> Payload for FnPayload<F>
where
    F: Fn(&mut InvocationContext<'_>) -> Result<(), BenchError> + Send + Sync,
{
    fn invoke(&self, ctx: &mut InvocationContext<'_>) -> Result<(), BenchError> {
        (self.f)(ctx)
    }

    fn fixtures(&self) -> Vec<Fixture> {
        self.fixtures.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackhole::BlackholeFactory;
    use crate::distribute;
    use microflux_ipc::BlackholeMode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fixture_ownership() {
        let d = distribute(4, &[1, 1]).unwrap();
        let benchmark = Fixture::new("b", Level::Trial, Scope::Benchmark);
        let group = Fixture::new("g", Level::Trial, Scope::Group);
        let thread = Fixture::new("t", Level::Trial, Scope::Thread);
        let owners = |f: &Fixture| d.assignments.iter().filter(|a| f.is_owned_by(a)).count();
        assert_eq!(owners(&benchmark), 1);
        assert_eq!(owners(&group), 2);
        assert_eq!(owners(&thread), 4);
    }

    #[test]
    fn test_payload_fn_and_counters() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let payload = payload_fn(move || seen.fetch_add(1, Ordering::Relaxed));
        let counting = payload_with(|ctx| {
            ctx.counter("items", 2.0);
            ctx.counter_with("peak", 5.0, AggregationPolicy::Max, "B");
            Ok(())
        });

        let d = distribute(1, &[1]).unwrap();
        let mut bh = BlackholeFactory::new().create(BlackholeMode::Full).unwrap();
        let control = Control::new(1);
        let mut counters = Counters::default();
        let mut ctx = InvocationContext::new(&d.assignments[0], &mut bh, &control, &mut counters);

        payload.invoke(&mut ctx).unwrap();
        counting.invoke(&mut ctx).unwrap();
        ctx.set_measuring(true);
        counting.invoke(&mut ctx).unwrap();
        counting.invoke(&mut ctx).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        let secondaries = counters.drain();
        assert_eq!(secondaries.len(), 2);
        assert_eq!(secondaries[0].label, "items");
        assert_eq!(secondaries[0].score(), 4.0);
        assert_eq!(secondaries[1].score(), 5.0);
        assert!(counters.drain().is_empty());
    }

    #[test]
    fn test_payload_fn_result_goes_through_context_blackhole() {
        let payload = payload_fn(|| vec![7u64; 8]);
        let d = distribute(1, &[1]).unwrap();
        let control = Control::new(1);
        let escaped = |mode| {
            let mut bh = BlackholeFactory::new().create(mode).unwrap();
            let mut counters = Counters::default();
            let mut ctx =
                InvocationContext::new(&d.assignments[0], &mut bh, &control, &mut counters);
            for _ in 0..64 {
                payload.invoke(&mut ctx).unwrap();
            }
            drop(ctx);
            bh.has_escaped()
        };
        assert!(escaped(BlackholeMode::Full));
        assert!(!escaped(BlackholeMode::Compiler));
    }

    #[test]
    fn test_bench_error_from_std_error() {
        let parsed: Result<u32, BenchError> = "x".parse::<u32>().map_err(BenchError::from);
        assert!(parsed.unwrap_err().message().contains("invalid digit"));
    }
}
