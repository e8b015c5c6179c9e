#![warn(missing_docs)]
//! microflux CLI Library
//!
//! This module provides the CLI infrastructure for benchmark binaries.
//! Use `microflux::run()` (or `microflux_cli::run()`) in your main function to get the full
//! microflux CLI experience with your registered benchmarks.
//!
//! The same binary doubles as the fork child: the supervisor re-spawns it
//! with the hidden `--microflux-worker` flag for every fork.
//!
//! # Example
//!
//! ```ignore
//! use microflux::prelude::*;
//!
//! fn sum() -> u64 {
//!     (0..1024u64).sum()
//! }
//!
//! microflux::benchmark!("demo", "sum", payload_fn(sum));
//!
//! fn main() -> anyhow::Result<()> {
//!     microflux_cli::run()
//! }
//! ```

mod config;
mod executor;
mod planner;
mod supervisor;

pub use config::*;
pub use executor::{
    BenchmarkOutcome, ExecutionConfig, Executor, HumanSink, IsolatedExecutor, execute_plan,
    format_benchmark_header, format_duration, format_results, format_summary_table, progress_bar,
};
pub use planner::{ExecutionPlan, PlanError, PlannedBenchmark, build_plan};
pub use supervisor::*;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use microflux_core::{OutputSink, Overrides, WorkerMain, benchmarks};
use microflux_results::{Mode, RunResult, TimeUnit};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// microflux CLI arguments
#[derive(Parser, Debug)]
#[command(name = "microflux")]
#[command(author, version, about = "microflux - microbenchmark harness for Rust")]
pub struct Cli {
    /// Optional subcommand (List, Run, Init); defaults to Run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Filter benchmarks by regex pattern on their qualified name
    #[arg(default_value = ".*")]
    pub filter: String,

    /// Warmup iterations per fork
    #[arg(long, visible_alias = "wi")]
    pub warmup_iterations: Option<u32>,

    /// Length of one warmup iteration (e.g., "1s", "500ms")
    #[arg(long)]
    pub warmup_time: Option<String>,

    /// Measurement iterations per fork
    #[arg(short = 'i', long)]
    pub iterations: Option<u32>,

    /// Length of one measurement iteration (e.g., "10s")
    #[arg(long)]
    pub time: Option<String>,

    /// Calls per single-shot iteration
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Measured forks; 0 runs in-process
    #[arg(short = 'f', long)]
    pub forks: Option<u32>,

    /// Discarded forks before the measured ones
    #[arg(long)]
    pub warmup_forks: Option<u32>,

    /// Worker threads per iteration
    #[arg(short = 't', long)]
    pub threads: Option<u32>,

    /// Thread group sizes, comma separated (e.g., "1,3")
    #[arg(long, value_delimiter = ',')]
    pub thread_groups: Option<Vec<u32>>,

    /// Synchronize measured windows across threads (true/false)
    #[arg(long, action = ArgAction::Set)]
    pub sync_iterations: Option<bool>,

    /// Per-iteration timeout (e.g., "10m")
    #[arg(long)]
    pub timeout: Option<String>,

    /// Benchmark mode: thrpt, avgt, sample or ss
    #[arg(long)]
    pub mode: Option<Mode>,

    /// Reporting unit: ns, us, ms, s or min
    #[arg(long)]
    pub time_unit: Option<TimeUnit>,

    /// Stop at the first failed benchmark and exit non-zero
    #[arg(long)]
    pub fail_on_error: bool,

    /// Write all results as JSON to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: Run as fork child (used by supervisor)
    #[arg(long, hide = true)]
    pub microflux_worker: bool,

    /// Internal: Absorb cargo bench's --bench flag
    #[arg(long, hide = true)]
    pub bench: bool,
}

impl Cli {
    /// Command-line settings as the highest-precedence override tier
    pub fn overrides(&self) -> anyhow::Result<Overrides<'_>> {
        let duration = |s: &Option<String>| {
            s.as_deref()
                .map(MicrofluxConfig::parse_duration)
                .transpose()
        };
        Ok(Overrides {
            mode: self.mode,
            time_unit: self.time_unit,
            warmup_iterations: self.warmup_iterations,
            warmup_time_ns: duration(&self.warmup_time)?,
            warmup_batch_size: self.batch_size,
            measurement_iterations: self.iterations,
            measurement_time_ns: duration(&self.time)?,
            measurement_batch_size: self.batch_size,
            threads: self.threads,
            thread_groups: self.thread_groups.as_deref(),
            sync_iterations: self.sync_iterations,
            forks: self.forks,
            warmup_forks: self.warmup_forks,
            timeout_ns: duration(&self.timeout)?,
            ..Overrides::default()
        })
    }
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all registered benchmarks with their resolved settings
    List,
    /// Run benchmarks (default)
    Run,
    /// Write a commented microflux.toml into the current directory
    Init,
}

/// Run the microflux CLI with the given arguments.
/// This is the main entry point for benchmark binaries.
///
/// # Returns
/// Returns `Ok(())` on success, or an error if something goes wrong.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the microflux CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    init_tracing(cli.verbose);

    // Fork children skip config discovery: the descriptor arrives resolved
    if cli.microflux_worker {
        return run_worker_mode();
    }

    let config = MicrofluxConfig::discover()?.unwrap_or_default();

    match &cli.command {
        Some(Commands::List) => list_benchmarks(&cli, &config),
        Some(Commands::Init) => init_config(),
        Some(Commands::Run) | None => run_benchmarks(&cli, &config),
    }
}

/// Logs go to stderr so stdout stays free for results and fd 3/4 for IPC.
fn init_tracing(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose))
        .with_writer(std::io::stderr)
        .try_init();
}

/// `RUST_LOG` when set, otherwise microflux at info (debug with `--verbose`)
fn log_filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        "microflux=debug"
    } else {
        "microflux=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Run as a fork child (IPC mode)
fn run_worker_mode() -> anyhow::Result<()> {
    let mut worker = WorkerMain::new();
    worker
        .run()
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

/// Select and resolve benchmarks: config file tier below the command line tier.
fn plan_benchmarks(cli: &Cli, config: &MicrofluxConfig) -> anyhow::Result<ExecutionPlan> {
    let filter =
        Regex::new(&cli.filter).with_context(|| format!("invalid filter {:?}", cli.filter))?;
    let tiers = [config.runner.overrides()?, cli.overrides()?];
    Ok(build_plan(benchmarks(), Some(&filter), &tiers))
}

fn list_benchmarks(cli: &Cli, config: &MicrofluxConfig) -> anyhow::Result<()> {
    println!("microflux plan:");

    let plan = plan_benchmarks(cli, config)?;

    let mut classes: BTreeMap<&str, Vec<&PlannedBenchmark>> = BTreeMap::new();
    for planned in &plan.benchmarks {
        classes.entry(planned.def.class).or_default().push(planned);
    }

    for (class, planned) in &classes {
        let class = if class.is_empty() { "(none)" } else { *class };
        println!("├── class: {}", class);
        for p in planned {
            let d = &p.descriptor;
            println!(
                "│   ├── {} ({}, {} fork(s), {} thread(s), groups {:?})",
                d.name, d.mode, d.forks, d.threads, d.thread_groups
            );
        }
    }

    println!("{} benchmarks found.", plan.len());
    Ok(())
}

fn init_config() -> anyhow::Result<()> {
    let path = Path::new(CONFIG_FILE);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    std::fs::write(path, MicrofluxConfig::default_toml())?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn run_benchmarks(cli: &Cli, config: &MicrofluxConfig) -> anyhow::Result<()> {
    let plan = plan_benchmarks(cli, config)?;
    if plan.is_empty() {
        println!("No benchmarks found.");
        return Ok(());
    }

    check_plan(&plan)?;

    let fail_fast = cli.fail_on_error || config.runner.fail_on_error;
    println!("Running {} benchmarks...\n", plan.len());

    let start_time = Instant::now();
    let progress = progress_bar(plan.len(), config.output.progress);
    let mut sink = HumanSink::new(std::io::stdout()).with_progress(progress.clone());
    let exec_config = ExecutionConfig {
        fail_fast,
        ..ExecutionConfig::default()
    };

    let outcomes = execute_plan(&plan, &exec_config, &mut sink, &progress);

    let results: Vec<RunResult> = outcomes
        .iter()
        .filter_map(|o| o.result().cloned())
        .collect();
    sink.run_end(&results);
    info!(
        benchmarks = outcomes.len(),
        elapsed = ?start_time.elapsed(),
        "run finished"
    );

    if let Some(path) = cli.output.as_ref().or(config.output.json.as_ref()) {
        write_json(path, &results)?;
        println!("Results written to: {}", path.display());
    }

    let failures: Vec<_> = outcomes.iter().filter(|o| !o.is_completed()).collect();
    if !failures.is_empty() {
        eprintln!("\n{} benchmark(s) failed:", failures.len());
        for failure in &failures {
            if let BenchmarkOutcome::Failed {
                benchmark,
                kind,
                message,
            } = failure
            {
                eprintln!("  {} ({}): {}", benchmark, kind, message);
            }
        }
        if fail_fast {
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Configuration errors are fatal before anything runs
fn check_plan(plan: &ExecutionPlan) -> anyhow::Result<()> {
    if let Err(e) = plan.validate() {
        error!(error = %e, "invalid benchmark configuration");
        return Err(e.into());
    }
    Ok(())
}

/// Write `results` as pretty JSON, creating parent directories
pub fn write_json(path: &Path, results: &[RunResult]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("microflux").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_become_overrides() {
        let cli = parse(&[
            "--wi",
            "2",
            "-i",
            "3",
            "--time",
            "100ms",
            "--thread-groups",
            "1,3",
            "--sync-iterations",
            "false",
            "--mode",
            "avgt",
            "--time-unit",
            "us",
            "-f",
            "0",
            "--batch-size",
            "4",
            "sum$",
        ]);
        assert_eq!(cli.filter, "sum$");

        let tier = cli.overrides().unwrap();
        assert_eq!(tier.warmup_iterations, Some(2));
        assert_eq!(tier.measurement_iterations, Some(3));
        assert_eq!(tier.measurement_time_ns, Some(100_000_000));
        assert_eq!(tier.thread_groups, Some(&[1, 3][..]));
        assert_eq!(tier.sync_iterations, Some(false));
        assert_eq!(tier.mode, Some(Mode::AverageTime));
        assert_eq!(tier.time_unit, Some(TimeUnit::Microseconds));
        assert_eq!(tier.forks, Some(0));
        assert_eq!(tier.warmup_batch_size, Some(4));
        assert_eq!(tier.measurement_batch_size, Some(4));
        assert_eq!(tier.threads, None);
    }

    #[test]
    fn test_defaults_leave_declarations_alone() {
        let cli = parse(&[]);
        assert_eq!(cli.filter, ".*");
        assert!(cli.command.is_none());
        assert!(!cli.fail_on_error);
        assert_eq!(cli.overrides().unwrap(), Overrides::NONE);
    }

    #[test]
    fn test_subcommands_and_hidden_flags() {
        assert!(matches!(parse(&["list"]).command, Some(Commands::List)));
        assert!(matches!(parse(&["init"]).command, Some(Commands::Init)));
        assert!(parse(&["--microflux-worker"]).microflux_worker);
        assert!(parse(&["--bench"]).bench);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Cli::try_parse_from(["microflux", "--mode", "fastest"]).is_err());
        assert!(Cli::try_parse_from(["microflux", "--thread-groups", "1,x"]).is_err());

        let cli = parse(&["--timeout", "soon"]);
        assert!(cli.overrides().is_err());
    }

    #[test]
    fn test_cli_tier_beats_config_tier() {
        let config: MicrofluxConfig =
            toml::from_str("[runner]\nforks = 3\niterations = 7\n").unwrap();
        let cli = parse(&["-f", "0"]);
        let tiers = [config.runner.overrides().unwrap(), cli.overrides().unwrap()];
        let d = microflux_core::resolve_descriptor("x", &tiers);
        assert_eq!(d.forks, 0);
        assert_eq!(d.measurement.iterations, 7);
    }

    #[test]
    fn test_log_filter_prefers_rust_log() {
        let saved = std::env::var_os("RUST_LOG");
        std::env::remove_var("RUST_LOG");
        assert_eq!(log_filter(false).to_string(), "microflux=info");
        assert_eq!(log_filter(true).to_string(), "microflux=debug");

        std::env::set_var("RUST_LOG", "warn");
        assert_eq!(log_filter(true).to_string(), "warn");

        match saved {
            Some(value) => std::env::set_var("RUST_LOG", value),
            None => std::env::remove_var("RUST_LOG"),
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn noop() -> Box<dyn microflux_core::Payload> {
        Box::new(microflux_core::payload_fn(|| 0u8))
    }

    static NOOP: microflux_core::BenchmarkDef = microflux_core::BenchmarkDef {
        name: "noop",
        class: "cli",
        class_options: Overrides::NONE,
        options: Overrides::NONE,
        payload: noop,
    };

    #[test]
    fn test_invalid_plan_logs_error() {
        let zero_iterations = Overrides {
            measurement_iterations: Some(0),
            ..Overrides::NONE
        };
        let plan = build_plan(vec![&NOOP], None, &[zero_iterations]);

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, || check_plan(&plan));

        assert!(result.is_err());
        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("ERROR"), "{text}");
        assert!(text.contains("invalid benchmark configuration"), "{text}");
        assert!(text.contains("cli.noop"), "{text}");

        let valid = build_plan(vec![&NOOP], None, &[]);
        assert!(check_plan(&valid).is_ok());
    }

    #[test]
    fn test_write_json() {
        let dir = std::env::temp_dir().join(format!("microflux-json-{}", std::process::id()));
        let path = dir.join("nested").join("results.json");
        let results = vec![RunResult::new("demo.sum")];
        write_json(&path, &results).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<RunResult> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, results);
        let _ = std::fs::remove_dir_all(dir);
    }
}
