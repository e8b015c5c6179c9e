//! Benchmark Registry
//!
//! Benchmarks register a [`BenchmarkDef`] with `inventory`. Declared options
//! are layered into a [`BenchmarkDescriptor`] with [`resolve_descriptor`].

use crate::Payload;
use microflux_ipc::{BenchmarkDescriptor, BlackholeMode, IterationSpec};
use microflux_results::{Mode, TimeUnit};

/// Default warmup and measurement iteration count
pub const DEFAULT_ITERATIONS: u32 = 5;

/// Default iteration length (10 s)
pub const DEFAULT_ITERATION_NS: u64 = 10_000_000_000;

/// Default measured fork count
pub const DEFAULT_FORKS: u32 = 5;

/// Default per-iteration timeout (10 min)
pub const DEFAULT_TIMEOUT_NS: u64 = 600_000_000_000;

/// One tier of optional benchmark settings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Overrides<'a> {
    /// Measurement mode
    pub mode: Option<Mode>,
    /// Reporting unit
    pub time_unit: Option<TimeUnit>,
    /// Warmup iteration count
    pub warmup_iterations: Option<u32>,
    /// Warmup iteration length
    pub warmup_time_ns: Option<u64>,
    /// Warmup single-shot batch size
    pub warmup_batch_size: Option<u32>,
    /// Measurement iteration count
    pub measurement_iterations: Option<u32>,
    /// Measurement iteration length
    pub measurement_time_ns: Option<u64>,
    /// Measurement single-shot batch size
    pub measurement_batch_size: Option<u32>,
    /// Thread count
    pub threads: Option<u32>,
    /// Group-size vector
    pub thread_groups: Option<&'a [u32]>,
    /// Synchronize measured windows
    pub sync_iterations: Option<bool>,
    /// Measured forks
    pub forks: Option<u32>,
    /// Discarded forks
    pub warmup_forks: Option<u32>,
    /// Per-iteration timeout
    pub timeout_ns: Option<u64>,
    /// Operations per payload call
    pub ops_per_invocation: Option<u64>,
    /// Consumption strategy
    pub blackhole: Option<BlackholeMode>,
}

impl Overrides<'static> {
    /// Tier that sets nothing
    pub const NONE: Overrides<'static> = Overrides {
        mode: None,
        time_unit: None,
        warmup_iterations: None,
        warmup_time_ns: None,
        warmup_batch_size: None,
        measurement_iterations: None,
        measurement_time_ns: None,
        measurement_batch_size: None,
        threads: None,
        thread_groups: None,
        sync_iterations: None,
        forks: None,
        warmup_forks: None,
        timeout_ns: None,
        ops_per_invocation: None,
        blackhole: None,
    };
}

impl Overrides<'_> {
    /// Write every set field into `d`
    pub fn apply(&self, d: &mut BenchmarkDescriptor) {
        macro_rules! set {
            ($($src:ident => $($dst:ident).+),* $(,)?) => {
                $(if let Some(v) = self.$src { d.$($dst).+ = v; })*
            };
        }
        set!(
            mode => mode,
            time_unit => time_unit,
            warmup_iterations => warmup.iterations,
            warmup_time_ns => warmup.time_ns,
            warmup_batch_size => warmup.batch_size,
            measurement_iterations => measurement.iterations,
            measurement_time_ns => measurement.time_ns,
            measurement_batch_size => measurement.batch_size,
            threads => threads,
            sync_iterations => sync_iterations,
            forks => forks,
            warmup_forks => warmup_forks,
            timeout_ns => timeout_ns,
            ops_per_invocation => ops_per_invocation,
            blackhole => blackhole,
        );
        if let Some(groups) = self.thread_groups {
            d.thread_groups = groups.to_vec();
        }
    }
}

/// Descriptor with every hard-coded default
pub fn default_descriptor(name: &str) -> BenchmarkDescriptor {
    let phase = IterationSpec {
        iterations: DEFAULT_ITERATIONS,
        time_ns: DEFAULT_ITERATION_NS,
        batch_size: 1,
    };
    BenchmarkDescriptor {
        name: name.to_string(),
        mode: Mode::Throughput,
        time_unit: TimeUnit::Seconds,
        warmup: phase,
        measurement: phase,
        threads: 1,
        thread_groups: vec![1],
        sync_iterations: true,
        forks: DEFAULT_FORKS,
        warmup_forks: 0,
        timeout_ns: DEFAULT_TIMEOUT_NS,
        ops_per_invocation: 1,
        blackhole: BlackholeMode::Full,
    }
}

/// Layer `tiers` over the defaults, lowest precedence first
pub fn resolve_descriptor(name: &str, tiers: &[Overrides<'_>]) -> BenchmarkDescriptor {
    let mut d = default_descriptor(name);
    for tier in tiers {
        tier.apply(&mut d);
    }
    d
}

/// Benchmark registered with `inventory::submit!`
pub struct BenchmarkDef {
    /// Benchmark name
    pub name: &'static str,
    /// Enclosing class (module or type); may be empty
    pub class: &'static str,
    /// Class-level declared options
    pub class_options: Overrides<'static>,
    /// Method-level declared options
    pub options: Overrides<'static>,
    /// Builds the payload
    pub payload: fn() -> Box<dyn Payload>,
}

impl BenchmarkDef {
    /// `class.name`, or `name` without a class
    pub fn qualified_name(&self) -> String {
        if self.class.is_empty() {
            self.name.to_string()
        } else {
            format!("{}.{}", self.class, self.name)
        }
    }

    /// Descriptor from declared options plus run options, lowest precedence first
    pub fn descriptor(&self, run_options: &[Overrides<'_>]) -> BenchmarkDescriptor {
        let mut tiers = vec![self.class_options, self.options];
        tiers.extend_from_slice(run_options);
        resolve_descriptor(&self.qualified_name(), &tiers)
    }
}

impl std::fmt::Debug for BenchmarkDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkDef")
            .field("name", &self.qualified_name())
            .finish()
    }
}

inventory::collect!(BenchmarkDef);

/// Every registered benchmark, sorted by qualified name
pub fn benchmarks() -> Vec<&'static BenchmarkDef> {
    let mut all: Vec<_> = inventory::iter::<BenchmarkDef>.into_iter().collect();
    all.sort_by_key(|b| b.qualified_name());
    all
}

/// Registered benchmark with this qualified name
pub fn find_benchmark(qualified_name: &str) -> Option<&'static BenchmarkDef> {
    inventory::iter::<BenchmarkDef>
        .into_iter()
        .find(|b| b.qualified_name() == qualified_name)
}
