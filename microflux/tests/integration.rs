//! Integration tests for microflux
//!
//! These tests verify the end-to-end behavior of the benchmarking system:
//! benchmarks run in-process (fork count 0) and the fork coordinator's
//! session is driven from in-memory frame streams.

use microflux::prelude::*;
use microflux::{
    BenchmarkDescriptor, BenchmarkResult, BenchmarkRunner, FailureKind, IterationParams,
    IterationResult, IterationType, Measurement, RecordingSink, RunResult, SinkEvent,
};
use microflux_cli::{
    ExecutionConfig, ForkSession, SupervisorError, build_plan, execute_plan, progress_bar,
};
use microflux_core::{benchmarks, default_descriptor};
use microflux_ipc::{ForkSpec, FrameReader, FrameWriter, WorkerMessage};
use microflux_results::ResultRole;
use regex::Regex;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

const SECOND: u64 = 1_000_000_000;

/// Short in-process descriptor
fn quick(name: &str, iterations: u32, time_ms: u64) -> BenchmarkDescriptor {
    let mut d = default_descriptor(name);
    d.warmup.iterations = 0;
    d.measurement.iterations = iterations;
    d.measurement.time_ns = time_ms * 1_000_000;
    d.warmup.time_ns = d.measurement.time_ns;
    d.forks = 0;
    d
}

fn measurement_params(count: u32) -> IterationParams {
    IterationParams {
        kind: IterationType::Measurement,
        count,
        time_ns: SECOND,
        batch_size: 1,
    }
}

fn fixed_iteration(name: &str, index: u32, ops: u64, duration_ns: u64) -> IterationResult {
    let mut iteration = IterationResult::new(name, measurement_params(3), index);
    iteration
        .add(Measurement::throughput(
            ResultRole::Primary,
            name,
            ops,
            duration_ns,
            TimeUnit::Seconds,
        ))
        .unwrap();
    iteration.seal();
    iteration
}

/// Three measurement iterations of 1000 ops per second score 1000 ops/s
#[test]
fn test_fixed_throughput_scores_per_second() {
    let mut fork = BenchmarkResult::new("fixed.thrpt", 1);
    for index in 1..=3 {
        fork.push(fixed_iteration("fixed.thrpt", index, 1000, SECOND))
            .unwrap();
    }
    let mut run = RunResult::new("fixed.thrpt");
    run.push(fork);

    let primary = run.primary().unwrap();
    assert!((primary.score() - 1000.0).abs() < 1e-6);
    assert_eq!(primary.sample_count(), 3);
    assert_eq!(primary.score_unit(), "ops/s");
}

/// Forks are merged into one population
#[test]
fn test_forks_aggregate_into_one_score() {
    let mut run = RunResult::new("fixed.forks");
    for fork_index in 1..=2 {
        let mut fork = BenchmarkResult::new("fixed.forks", fork_index);
        fork.push(fixed_iteration("fixed.forks", 1, 500 * fork_index as u64, SECOND))
            .unwrap();
        run.push(fork);
    }

    let primary = run.primary().unwrap();
    assert!((primary.score() - 750.0).abs() < 1e-6);
    assert_eq!(primary.sample_count(), 2);
    assert_eq!(run.iterations().count(), 2);
}

/// Two synchronized threads with a 3x cost asymmetry share one measured window
#[test]
fn test_synchronized_group_with_asymmetric_cost() {
    let mut d = quick("sync.asymmetric", 2, 50);
    d.threads = 2;
    d.thread_groups = vec![2];
    d.sync_iterations = true;

    let windows: Arc<Mutex<Vec<Option<(Instant, Instant)>>>> =
        Arc::new(Mutex::new(vec![None, None]));
    let seen = Arc::clone(&windows);
    let payload = payload_with(move |ctx| {
        let rounds = if ctx.thread().thread_index == 0 { 3_000 } else { 1_000 };
        let mut acc = 0u64;
        for i in 0..rounds {
            acc = acc.wrapping_add(std::hint::black_box(i));
        }
        ctx.blackhole().consume(acc);

        if ctx.is_measuring() {
            let now = Instant::now();
            let mut w = seen.lock().map_err(|_| BenchError::msg("poisoned"))?;
            let slot = &mut w[ctx.thread().thread_index as usize];
            *slot = Some(match *slot {
                Some((first, _)) => (first, now),
                None => (now, now),
            });
        }
        Ok(())
    });

    let mut sink = RecordingSink::default();
    let mut runner = BenchmarkRunner::new(d, Arc::new(payload)).unwrap();
    let result = runner.run(&mut sink).unwrap();
    assert_eq!(result.iterations().len(), 2);

    let w = windows.lock().unwrap();
    let (first_a, last_a) = w[0].unwrap();
    let (first_b, last_b) = w[1].unwrap();
    // Measured windows overlap: neither thread finished before the other began
    assert!(first_a <= last_b);
    assert!(first_b <= last_a);

    for iteration in result.iterations() {
        let per_thread: Vec<f64> = iteration
            .by_label("sync.asymmetric")
            .map(|m| m.score())
            .collect();
        assert_eq!(per_thread.len(), 2);
        assert!(per_thread.iter().all(|s| *s > 0.0));

        let merged = iteration.primary().unwrap().score();
        let sum: f64 = per_thread.iter().sum();
        assert!((merged - sum).abs() <= sum * 1e-9);
    }
}

/// A fixture failing in iteration 2 of 5 fails the benchmark without a score
#[test]
fn test_fixture_failure_mid_run() {
    let d = quick("fixture.fails", 5, 20);
    let calls = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&calls);
    let payload = payload_fn(|| 1u64).with_fixture(
        Fixture::new("flaky", Level::Iteration, Scope::Benchmark).setup(move |_| {
            if counted.fetch_add(1, Ordering::SeqCst) == 1 {
                Err(BenchError::msg("setup exploded"))
            } else {
                Ok(())
            }
        }),
    );

    let mut sink = RecordingSink::default();
    let mut runner = BenchmarkRunner::new(d, Arc::new(payload)).unwrap();
    let failure = runner.run(&mut sink).unwrap_err();

    assert_eq!(failure.error.kind(), FailureKind::Fixture);
    assert_eq!(failure.partial.iterations().len(), 1);
    assert_eq!(sink.iterations(IterationType::Measurement).count(), 1);
    assert!(sink.has_exception());
    assert_eq!(
        sink.events.last(),
        Some(&SinkEvent::BenchmarkEnd("fixture.fails".to_string(), false))
    );
}

/// Payload counters come back as secondary results of the fork
#[test]
fn test_secondary_counter_reported_per_iteration() {
    let d = quick("counters.bytes", 3, 20);
    let payload = payload_with(|ctx| {
        ctx.counter("bytes", 64.0);
        ctx.blackhole().consume(1u64);
        Ok(())
    });

    let mut sink = RecordingSink::default();
    let mut runner = BenchmarkRunner::new(d, Arc::new(payload)).unwrap();
    let fork = runner.run(&mut sink).unwrap();

    let secondaries = fork.secondaries().unwrap();
    let bytes = secondaries.get("bytes").unwrap();
    assert!(bytes.score() > 0.0);
    assert_eq!(bytes.sample_count(), 3);
}

// ============================================================================
// Registration and planning
// ============================================================================

microflux::benchmark!("integration", "registered_sum", payload_fn(|| {
    (0..64u64).sum::<u64>()
}); forks = 0, warmup_iterations = 0, measurement_iterations = 2,
    measurement_time_ns = 20_000_000);

microflux::benchmark!("integration", "registered_failure", payload_with(|_| {
    Err(BenchError::msg("always fails"))
}); forks = 0, warmup_iterations = 0, measurement_iterations = 1,
    measurement_time_ns = 20_000_000);

#[test]
fn test_registered_benchmarks_run_in_process() {
    let filter = Regex::new(r"^integration\.").unwrap();
    let plan = build_plan(benchmarks(), Some(&filter), &[]);
    let names: Vec<_> = plan
        .benchmarks
        .iter()
        .map(|p| p.descriptor.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["integration.registered_failure", "integration.registered_sum"]
    );
    plan.validate().unwrap();

    let mut sink = RecordingSink::default();
    let outcomes = execute_plan(
        &plan,
        &ExecutionConfig::default(),
        &mut sink,
        &progress_bar(plan.len(), false),
    );

    assert_eq!(outcomes.len(), 2);
    assert!(!outcomes[0].is_completed());
    let run = outcomes[1].result().unwrap();
    assert_eq!(run.iterations().count(), 2);
    assert!(run.primary().unwrap().score() > 0.0);
}

// ============================================================================
// Fork session over in-memory frames
// ============================================================================

fn encode(messages: &[WorkerMessage]) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut writer = FrameWriter::new(&mut bytes);
        for message in messages {
            writer.write(message).unwrap();
        }
        writer.flush().unwrap();
    }
    bytes
}

/// Feed frames to a session until it finishes or the stream ends
fn replay(
    bytes: Vec<u8>,
    fork: ForkSpec,
    sink: &mut RecordingSink,
) -> Result<BenchmarkResult, SupervisorError> {
    let mut reader = FrameReader::new(Cursor::new(bytes));
    let mut session = ForkSession::new("frames.sum", fork, sink);
    while !session.is_finished() {
        match reader.read::<WorkerMessage>() {
            Ok(message) => {
                session.handle(message)?;
            }
            Err(_) => break,
        }
    }
    session.finish()
}

fn measured_fork() -> ForkSpec {
    ForkSpec {
        index: 1,
        count: 1,
        warmup: false,
    }
}

fn lifecycle(completed: bool) -> Vec<WorkerMessage> {
    let mut descriptor = default_descriptor("frames.sum");
    descriptor.measurement.iterations = 2;
    let params = measurement_params(2);
    let mut messages = vec![WorkerMessage::BenchmarkStart { descriptor }];
    for index in 1..=2 {
        messages.push(WorkerMessage::IterationStart { params, index });
        messages.push(WorkerMessage::IterationResult {
            params,
            index,
            result: fixed_iteration("frames.sum", index, 2000, SECOND),
        });
    }
    if completed {
        messages.push(WorkerMessage::BenchmarkEnd { completed: true });
    }
    messages
}

#[test]
fn test_session_collects_forwarded_iterations() {
    let mut sink = RecordingSink::default();
    let fork = replay(encode(&lifecycle(true)), measured_fork(), &mut sink).unwrap();

    assert_eq!(fork.iterations().len(), 2);
    assert!((fork.primary().unwrap().score() - 2000.0).abs() < 1e-6);
    assert_eq!(sink.iterations(IterationType::Measurement).count(), 2);
    assert!(!sink.has_exception());
}

#[test]
fn test_session_stream_end_is_a_crash() {
    let mut sink = RecordingSink::default();
    let err = replay(encode(&lifecycle(false)), measured_fork(), &mut sink).unwrap_err();
    assert!(matches!(err, SupervisorError::ForkCrashed(_)));
    assert_eq!(err.kind(), FailureKind::Unknown);
}

#[test]
fn test_session_reports_worker_exception() {
    let mut messages = lifecycle(false);
    messages.truncate(3);
    messages.push(WorkerMessage::Exception {
        kind: FailureKind::Payload,
        message: "boom".to_string(),
        backtrace: None,
    });
    messages.push(WorkerMessage::BenchmarkEnd { completed: false });

    let mut sink = RecordingSink::default();
    let err = replay(encode(&messages), measured_fork(), &mut sink).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Payload);
    assert!(sink.has_exception());
}
