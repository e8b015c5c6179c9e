//! Configuration loading from microflux.toml
//!
//! microflux configuration can be specified in a `microflux.toml` file in the project root.
//! The configuration is automatically discovered by walking up from the current directory.
//!
//! Every runner field is optional: an absent field leaves the benchmark's own
//! declaration (or the hard-coded default) in place.

use anyhow::Context;
use microflux_core::Overrides;
use microflux_results::{Mode, TimeUnit};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up by [`MicrofluxConfig::discover`]
pub const CONFIG_FILE: &str = "microflux.toml";

/// microflux configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MicrofluxConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Run-level overrides applied to every selected benchmark
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Benchmark mode: "thrpt", "avgt", "sample" or "ss"
    #[serde(default)]
    pub mode: Option<String>,
    /// Reporting unit: "ns", "us", "ms", "s" or "min"
    #[serde(default)]
    pub time_unit: Option<String>,
    /// Warmup iterations per fork
    #[serde(default)]
    pub warmup_iterations: Option<u32>,
    /// Length of one warmup iteration (e.g., "1s")
    #[serde(default)]
    pub warmup_time: Option<String>,
    /// Measurement iterations per fork
    #[serde(default)]
    pub iterations: Option<u32>,
    /// Length of one measurement iteration (e.g., "10s")
    #[serde(default)]
    pub time: Option<String>,
    /// Calls per single-shot iteration
    #[serde(default)]
    pub batch_size: Option<u32>,
    /// Measured forks; 0 runs in-process
    #[serde(default)]
    pub forks: Option<u32>,
    /// Discarded forks before the measured ones
    #[serde(default)]
    pub warmup_forks: Option<u32>,
    /// Worker threads per iteration
    #[serde(default)]
    pub threads: Option<u32>,
    /// Thread group sizes (e.g., [1, 3])
    #[serde(default)]
    pub thread_groups: Option<Vec<u32>>,
    /// Synchronize measured windows across threads
    #[serde(default)]
    pub sync_iterations: Option<bool>,
    /// Per-iteration timeout (e.g., "10m")
    #[serde(default)]
    pub timeout: Option<String>,
    /// Stop at the first failed benchmark and exit non-zero
    #[serde(default)]
    pub fail_on_error: bool,
}

impl RunnerConfig {
    /// This configuration as one override tier
    pub fn overrides(&self) -> anyhow::Result<Overrides<'_>> {
        Ok(Overrides {
            mode: self.mode.as_deref().map(parse_mode).transpose()?,
            time_unit: self.time_unit.as_deref().map(parse_time_unit).transpose()?,
            warmup_iterations: self.warmup_iterations,
            warmup_time_ns: self
                .warmup_time
                .as_deref()
                .map(MicrofluxConfig::parse_duration)
                .transpose()?,
            warmup_batch_size: self.batch_size,
            measurement_iterations: self.iterations,
            measurement_time_ns: self
                .time
                .as_deref()
                .map(MicrofluxConfig::parse_duration)
                .transpose()?,
            measurement_batch_size: self.batch_size,
            threads: self.threads,
            thread_groups: self.thread_groups.as_deref(),
            sync_iterations: self.sync_iterations,
            forks: self.forks,
            warmup_forks: self.warmup_forks,
            timeout_ns: self
                .timeout
                .as_deref()
                .map(MicrofluxConfig::parse_duration)
                .transpose()?,
            ..Overrides::default()
        })
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Write all results as JSON to this file
    #[serde(default)]
    pub json: Option<PathBuf>,
    /// Show a progress bar while running
    #[serde(default = "default_progress")]
    pub progress: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json: None,
            progress: default_progress(),
        }
    }
}

fn default_progress() -> bool {
    true
}

pub(crate) fn parse_mode(s: &str) -> anyhow::Result<Mode> {
    s.parse().map_err(anyhow::Error::msg)
}

pub(crate) fn parse_time_unit(s: &str) -> anyhow::Result<TimeUnit> {
    s.parse().map_err(anyhow::Error::msg)
}

impl MicrofluxConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        // Surface bad durations and names now rather than mid-run.
        config.runner.overrides()?;
        Ok(config)
    }

    /// Find `microflux.toml` by walking up from the current directory and load it
    pub fn discover() -> anyhow::Result<Option<Self>> {
        let mut dir = std::env::current_dir()?;
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                tracing::debug!(path = %config_path.display(), "loading configuration");
                return Self::load(&config_path).map(Some);
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(None)
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# microflux configuration
# Every [runner] key is optional; unset keys keep each benchmark's declaration.

[runner]
# Benchmark mode: thrpt, avgt, sample or ss
# mode = "thrpt"
# Reporting unit: ns, us, ms, s or min
# time_unit = "s"
# Warmup iterations and their length
warmup_iterations = 5
warmup_time = "10s"
# Measurement iterations and their length
iterations = 5
time = "10s"
# Calls per single-shot iteration (uncomment to enable)
# batch_size = 1
# Measured and discarded forks; forks = 0 runs in-process
forks = 5
warmup_forks = 0
# Worker threads and group sizes (uncomment to enable)
# threads = 1
# thread_groups = [1]
# Synchronize measured windows across threads
sync_iterations = true
# Per-iteration timeout
timeout = "10m"
# Stop at the first failed benchmark and exit non-zero
fail_on_error = false

[output]
# Write all results as JSON (uncomment to enable)
# json = "target/microflux/results.json"
# Show a progress bar while running
progress = true
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m") to nanoseconds
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64) as u64)
    }
}
