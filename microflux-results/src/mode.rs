//! Benchmark modes, time units, result roles and scalar aggregation policies.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a benchmark measures
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Operations per unit of time
    Throughput,
    /// Average time per operation
    AverageTime,
    /// Distribution of sampled per-operation latencies
    SampleTime,
    /// Cold latency of a single call (or batch), no steady state
    SingleShotTime,
}

impl Mode {
    /// Short name used in reports (`thrpt`, `avgt`, `sample`, `ss`)
    pub fn short_label(self) -> &'static str {
        match self {
            Mode::Throughput => "thrpt",
            Mode::AverageTime => "avgt",
            Mode::SampleTime => "sample",
            Mode::SingleShotTime => "ss",
        }
    }

    /// Whether iterations end by elapsed time rather than by call count
    pub fn is_time_bounded(self) -> bool {
        !matches!(self, Mode::SingleShotTime)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_label())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "thrpt" | "throughput" => Ok(Mode::Throughput),
            "avgt" | "average" | "average_time" | "averagetime" => Ok(Mode::AverageTime),
            "sample" | "sample_time" | "sampletime" => Ok(Mode::SampleTime),
            "ss" | "single_shot" | "singleshot" | "singleshottime" => Ok(Mode::SingleShotTime),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Unit scores are reported in
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// ns
    Nanoseconds,
    /// us
    Microseconds,
    /// ms
    Milliseconds,
    /// s
    Seconds,
    /// min
    Minutes,
}

impl TimeUnit {
    /// Nanoseconds in one unit
    pub fn nanos(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1.0,
            TimeUnit::Microseconds => 1e3,
            TimeUnit::Milliseconds => 1e6,
            TimeUnit::Seconds => 1e9,
            TimeUnit::Minutes => 60e9,
        }
    }

    /// Short suffix (`ns`, `us`, `ms`, `s`, `min`)
    pub fn label(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ns" | "nanoseconds" => Ok(TimeUnit::Nanoseconds),
            "us" | "µs" | "microseconds" => Ok(TimeUnit::Microseconds),
            "ms" | "milliseconds" => Ok(TimeUnit::Milliseconds),
            "s" | "seconds" => Ok(TimeUnit::Seconds),
            "m" | "min" | "minutes" => Ok(TimeUnit::Minutes),
            other => Err(format!("unknown time unit: {other}")),
        }
    }
}

/// Headline score vs. auxiliary quantity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum ResultRole {
    /// The benchmark's score
    Primary,
    /// Reported alongside the score
    Secondary,
}

/// How per-thread scalar counters combine within one iteration
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Add thread values
    Sum,
    /// Mean of thread values
    Average,
    /// Largest thread value
    Max,
    /// Smallest thread value
    Min,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("thrpt".parse::<Mode>().unwrap(), Mode::Throughput);
        assert_eq!("AverageTime".parse::<Mode>().unwrap(), Mode::AverageTime);
        assert_eq!("ss".parse::<Mode>().unwrap(), Mode::SingleShotTime);
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[test]
    fn test_time_unit_conversion() {
        assert_eq!(TimeUnit::Seconds.nanos(), 1e9);
        assert_eq!("us".parse::<TimeUnit>().unwrap(), TimeUnit::Microseconds);
        assert_eq!(TimeUnit::Milliseconds.to_string(), "ms");
    }

    #[test]
    fn test_time_bounded_modes() {
        assert!(Mode::Throughput.is_time_bounded());
        assert!(Mode::SampleTime.is_time_bounded());
        assert!(!Mode::SingleShotTime.is_time_bounded());
    }
}
