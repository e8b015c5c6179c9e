//! Output Formatting
//!
//! Human-readable rendering of the run lifecycle.
//!
//! Generates terminal-friendly output with:
//! - A header per benchmark with its resolved settings
//! - One line per warmup and measurement iteration, secondary results indented below
//! - Failure notices
//! - Per-benchmark score summaries with confidence intervals
//! - A final score table

use indicatif::ProgressBar;
use microflux_core::OutputSink;
use microflux_ipc::{BenchmarkDescriptor, FailureKind};
use microflux_results::{
    IterationParams, IterationResult, IterationType, Measurement, Mode, RunResult,
};
use std::fmt::Write as _;
use std::io::Write;

/// Render nanoseconds with the largest unit that keeps the value at or above 1
pub fn format_duration(ns: u64) -> String {
    const UNITS: [(u64, &str); 4] = [
        (60_000_000_000, "min"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (1_000, "us"),
    ];
    for (scale, label) in UNITS {
        if ns >= scale {
            let value = ns as f64 / scale as f64;
            return if ns % scale == 0 {
                format!("{} {label}", ns / scale)
            } else {
                format!("{value:.2} {label}")
            };
        }
    }
    format!("{ns} ns")
}

fn format_score(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value != 0.0 && (value.abs() >= 1e9 || value.abs() < 1e-3) {
        format!("{value:.3e}")
    } else {
        format!("{value:.3}")
    }
}

fn iteration_line(params: &IterationParams, index: u32, result: &IterationResult) -> String {
    let mut line = match params.kind {
        IterationType::Warmup => format!("# Warmup Iteration {index:>3}: "),
        IterationType::Measurement => format!("Iteration {index:>3}: "),
    };
    let indent = " ".repeat(line.chars().count());
    match result.primary() {
        Ok(primary) => {
            let _ = write!(line, "{} {}", format_score(primary.score()), primary.score_unit());
        }
        Err(e) => {
            let _ = write!(line, "<no result: {e}>");
        }
    }
    line.push('\n');
    if let Ok(secondaries) = result.secondaries() {
        for (label, m) in secondaries {
            let _ = writeln!(
                line,
                "{indent}{label}: {} {}",
                format_score(m.score()),
                m.score_unit()
            );
        }
    }
    line
}

fn phase_line(label: &str, mode: Mode, iterations: u32, time_ns: u64, batch_size: u32) -> String {
    if iterations == 0 {
        return format!("# {label}: <none>\n");
    }
    match mode {
        Mode::SingleShotTime => {
            format!("# {label}: {iterations} iterations, batch size {batch_size}\n")
        }
        _ => format!(
            "# {label}: {iterations} iterations, {} each\n",
            format_duration(time_ns)
        ),
    }
}

/// Header printed when a benchmark starts
pub fn format_benchmark_header(d: &BenchmarkDescriptor) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Benchmark: {}", d.name);
    let _ = writeln!(out, "# Mode: {}, Time unit: {}", d.mode, d.time_unit);
    let _ = writeln!(
        out,
        "# Threads: {}, groups {:?}, {} iterations",
        d.threads,
        d.thread_groups,
        if d.sync_iterations { "synchronized" } else { "unsynchronized" }
    );
    out.push_str(&phase_line(
        "Warmup",
        d.mode,
        d.warmup.iterations,
        d.warmup.time_ns,
        d.warmup.batch_size,
    ));
    out.push_str(&phase_line(
        "Measurement",
        d.mode,
        d.measurement.iterations,
        d.measurement.time_ns,
        d.measurement.batch_size,
    ));
    let _ = writeln!(out, "# Timeout: {} per iteration", format_duration(d.timeout_ns));
    if d.ops_per_invocation > 1 {
        let _ = writeln!(out, "# Operations per invocation: {}", d.ops_per_invocation);
    }
    out
}

fn summary_block(label: &str, m: &Measurement) -> String {
    let stats = m.statistics();
    let unit = m.score_unit();
    let mut out = String::new();
    let _ = writeln!(out, "Result \"{label}\":");
    let _ = writeln!(
        out,
        "  {} ±(99.9%) {} {unit} [{}]",
        format_score(m.score()),
        format_score(m.score_error()),
        match m.mode() {
            Some(Mode::SampleTime) | Some(Mode::SingleShotTime) | None => "Sample",
            _ => "Average",
        }
    );
    let _ = writeln!(
        out,
        "  (min, avg, max) = ({}, {}, {}), stdev = {}",
        format_score(stats.min),
        format_score(stats.mean),
        format_score(stats.max),
        format_score(stats.std_dev)
    );
    let _ = writeln!(
        out,
        "  CI (99.9%): [{}, {}] (assumes normal distribution)",
        format_score(stats.ci_lower),
        format_score(stats.ci_upper)
    );
    if m.mode() == Some(Mode::SampleTime) {
        let p = &stats.percentiles;
        for (name, value) in [
            ("p0.00", p.p0),
            ("p0.50", p.p50),
            ("p0.90", p.p90),
            ("p0.95", p.p95),
            ("p0.99", p.p99),
            ("p0.999", p.p999),
            ("p0.9999", p.p9999),
            ("p1.00", p.p100),
        ] {
            let _ = writeln!(out, "  {label}:{name:<8} {} {unit}", format_score(value));
        }
    }
    out
}

/// Score summaries of every completed benchmark
pub fn format_results(results: &[RunResult]) -> String {
    let mut out = String::new();
    for run in results {
        match run.primary() {
            Ok(primary) => out.push_str(&summary_block(&run.benchmark, &primary)),
            Err(e) => {
                let _ = writeln!(out, "Result \"{}\": <unavailable: {e}>", run.benchmark);
            }
        }
        if let Ok(secondaries) = run.secondaries() {
            for (label, m) in secondaries {
                out.push_str(&summary_block(&format!("{}:{label}", run.benchmark), &m));
            }
        }
        out.push('\n');
    }
    out
}

/// Final score table, one row per primary and secondary result
pub fn format_summary_table(results: &[RunResult]) -> String {
    struct Row {
        name: String,
        mode: &'static str,
        count: String,
        score: String,
        error: String,
        unit: String,
    }

    let mut rows = Vec::new();
    for run in results {
        let Ok(primary) = run.primary() else {
            continue;
        };
        let mode = primary.mode().map(Mode::short_label).unwrap_or("");
        let mut push = |name: String, m: &Measurement| {
            let error = m.score_error();
            rows.push(Row {
                name,
                mode,
                count: m.sample_count().to_string(),
                score: format_score(m.score()),
                error: if error.is_nan() {
                    String::new()
                } else {
                    format!("± {}", format_score(error))
                },
                unit: m.score_unit(),
            });
        };
        push(run.benchmark.clone(), &primary);
        if let Ok(secondaries) = run.secondaries() {
            for (label, m) in secondaries {
                push(format!("{}:{label}", run.benchmark), &m);
            }
        }
    }

    let width = |f: fn(&Row) -> usize, header: &str| {
        rows.iter().map(f).max().unwrap_or(0).max(header.len())
    };
    let name_w = width(|r| r.name.chars().count(), "Benchmark");
    let mode_w = width(|r| r.mode.len(), "Mode");
    let cnt_w = width(|r| r.count.len(), "Cnt");
    let score_w = width(|r| r.score.chars().count(), "Score");
    let error_w = width(|r| r.error.chars().count(), "Error");

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<name_w$}  {:>mode_w$}  {:>cnt_w$}  {:>score_w$}  {:>error_w$}  Units",
        "Benchmark", "Mode", "Cnt", "Score", "Error"
    );
    for r in &rows {
        let _ = writeln!(
            out,
            "{:<name_w$}  {:>mode_w$}  {:>cnt_w$}  {:>score_w$}  {:>error_w$}  {}",
            r.name, r.mode, r.count, r.score, r.error, r.unit
        );
    }
    out
}

/// Sink that renders the lifecycle for a terminal
///
/// Lines are written above the progress bar when one is attached.
pub struct HumanSink<W: Write> {
    out: W,
    progress: Option<ProgressBar>,
}

impl<W: Write> HumanSink<W> {
    /// Sink writing to `out`
    pub fn new(out: W) -> Self {
        Self {
            out,
            progress: None,
        }
    }

    /// Suspend `progress` while writing
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: &str) {
        let out = &mut self.out;
        let mut write = || {
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        };
        match &self.progress {
            Some(pb) => pb.suspend(write),
            None => write(),
        }
    }
}

impl<W: Write> OutputSink for HumanSink<W> {
    fn benchmark_start(&mut self, descriptor: &BenchmarkDescriptor) {
        let header = format_benchmark_header(descriptor);
        self.emit(&header);
    }

    fn iteration_start(&mut self, _params: &IterationParams, _index: u32) {}

    fn iteration_result(&mut self, params: &IterationParams, index: u32, result: &IterationResult) {
        let line = iteration_line(params, index, result);
        self.emit(&line);
    }

    fn exception(&mut self, benchmark: &str, kind: FailureKind, message: &str) {
        self.emit(&format!("<failure: {benchmark} ({kind})>\n{message}\n"));
    }

    fn benchmark_end(&mut self, _benchmark: &str, _completed: bool) {
        self.emit("\n");
    }

    fn run_end(&mut self, results: &[RunResult]) {
        if results.is_empty() {
            return;
        }
        let mut text = format_results(results);
        text.push_str(&format_summary_table(results));
        self.emit(&text);
    }
}
