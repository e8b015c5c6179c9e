//! Typed Results
//!
//! A [`Measurement`] keeps the raw material of its score (operation counts
//! and nanoseconds, latency populations) rather than a pre-divided rate, so
//! merging along either axis is exact.

use crate::{AggregationError, AggregationPolicy, Mode, ResultRole, TimeUnit};
use microflux_stats::{
    BootstrappedStatistics, DEFAULT_SCORE_CONFIDENCE, HistogramStatistics, ListStatistics,
    Statistics, SummaryStatistics,
};
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

/// One sample emitted by one thread for one iteration
pub type RawResult = Measurement;

/// Which results are being combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationAxis {
    /// Results of different threads within one iteration
    Threads,
    /// Thread-aggregated results of different iterations or forks
    Iterations,
}

/// Mode-specific payload of a result
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize)]
#[archive(check_bytes)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementData {
    /// Operation count over a window
    Throughput {
        /// Operations completed
        ops: f64,
        /// Window length
        duration_ns: u64,
        /// One score per merged iteration
        samples: ListStatistics,
    },
    /// Time spent over an operation count
    AverageTime {
        /// Operations completed
        ops: f64,
        /// Time spent
        duration_ns: u64,
        /// One score per merged iteration
        samples: ListStatistics,
    },
    /// Per-operation latencies in nanoseconds
    SampleTime {
        /// Latency population
        histogram: HistogramStatistics,
    },
    /// Single-call latencies in nanoseconds
    SingleShot {
        /// Latency population
        samples: ListStatistics,
    },
    /// Auxiliary counter
    Scalar {
        /// How thread values combine
        policy: AggregationPolicy,
        /// One value per merged iteration
        samples: ListStatistics,
        /// Unit label of the counter
        score_unit: String,
    },
}

/// A labelled, typed result
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct Measurement {
    /// Primary score or secondary quantity
    pub role: ResultRole,
    /// Label; the benchmark name for primary results
    pub label: String,
    /// Reporting unit
    pub unit: TimeUnit,
    /// Raw payload
    pub data: MeasurementData,
}

fn throughput_score(ops: f64, duration_ns: u64, unit: TimeUnit) -> f64 {
    if duration_ns == 0 {
        return f64::NAN;
    }
    ops * unit.nanos() / duration_ns as f64
}

fn average_time_score(ops: f64, duration_ns: u64, unit: TimeUnit) -> f64 {
    if ops == 0.0 {
        return f64::NAN;
    }
    duration_ns as f64 / ops / unit.nanos()
}

impl Measurement {
    /// `ops` operations completed in `duration_ns`
    pub fn throughput(
        role: ResultRole,
        label: impl Into<String>,
        ops: u64,
        duration_ns: u64,
        unit: TimeUnit,
    ) -> Self {
        let ops = ops as f64;
        let samples = [throughput_score(ops, duration_ns, unit)].into_iter().collect();
        Self {
            role,
            label: label.into(),
            unit,
            data: MeasurementData::Throughput {
                ops,
                duration_ns,
                samples,
            },
        }
    }

    /// `duration_ns` spent on `ops` operations
    pub fn average_time(
        role: ResultRole,
        label: impl Into<String>,
        ops: u64,
        duration_ns: u64,
        unit: TimeUnit,
    ) -> Self {
        let ops = ops as f64;
        let samples = [average_time_score(ops, duration_ns, unit)].into_iter().collect();
        Self {
            role,
            label: label.into(),
            unit,
            data: MeasurementData::AverageTime {
                ops,
                duration_ns,
                samples,
            },
        }
    }

    /// Latency histogram in nanoseconds
    pub fn sample_time(
        role: ResultRole,
        label: impl Into<String>,
        histogram: HistogramStatistics,
        unit: TimeUnit,
    ) -> Self {
        Self {
            role,
            label: label.into(),
            unit,
            data: MeasurementData::SampleTime { histogram },
        }
    }

    /// One single-shot latency in nanoseconds
    pub fn single_shot(
        role: ResultRole,
        label: impl Into<String>,
        duration_ns: u64,
        unit: TimeUnit,
    ) -> Self {
        Self {
            role,
            label: label.into(),
            unit,
            data: MeasurementData::SingleShot {
                samples: [duration_ns as f64].into_iter().collect(),
            },
        }
    }

    /// Auxiliary counter value
    pub fn scalar(
        label: impl Into<String>,
        value: f64,
        policy: AggregationPolicy,
        score_unit: impl Into<String>,
    ) -> Self {
        Self {
            role: ResultRole::Secondary,
            label: label.into(),
            unit: TimeUnit::Seconds,
            data: MeasurementData::Scalar {
                policy,
                samples: [value].into_iter().collect(),
                score_unit: score_unit.into(),
            },
        }
    }

    /// Mode this result was measured in, `None` for scalar counters
    pub fn mode(&self) -> Option<Mode> {
        match self.data {
            MeasurementData::Throughput { .. } => Some(Mode::Throughput),
            MeasurementData::AverageTime { .. } => Some(Mode::AverageTime),
            MeasurementData::SampleTime { .. } => Some(Mode::SampleTime),
            MeasurementData::SingleShot { .. } => Some(Mode::SingleShotTime),
            MeasurementData::Scalar { .. } => None,
        }
    }

    /// Score in `unit`
    pub fn score(&self) -> f64 {
        let unit = self.unit;
        match &self.data {
            MeasurementData::Throughput {
                ops, duration_ns, ..
            } => throughput_score(*ops, *duration_ns, unit),
            MeasurementData::AverageTime {
                ops, duration_ns, ..
            } => average_time_score(*ops, *duration_ns, unit),
            MeasurementData::SampleTime { histogram } => histogram.mean() / unit.nanos(),
            MeasurementData::SingleShot { samples } => samples.mean() / unit.nanos(),
            MeasurementData::Scalar {
                policy, samples, ..
            } => match policy {
                AggregationPolicy::Max => samples.max(),
                AggregationPolicy::Min => samples.min(),
                AggregationPolicy::Sum | AggregationPolicy::Average => samples.mean(),
            },
        }
    }

    /// Half width of the score's 99.9% confidence interval
    pub fn score_error(&self) -> f64 {
        self.score_error_at(DEFAULT_SCORE_CONFIDENCE)
    }

    /// Half width of the score's `level` confidence interval
    pub fn score_error_at(&self, level: f64) -> f64 {
        match &self.data {
            MeasurementData::Throughput { samples, .. }
            | MeasurementData::AverageTime { samples, .. }
            | MeasurementData::Scalar { samples, .. } => samples.mean_error_at(level),
            MeasurementData::SampleTime { histogram } => {
                histogram.mean_error_at(level) / self.unit.nanos()
            }
            MeasurementData::SingleShot { samples } => {
                samples.mean_error_at(level) / self.unit.nanos()
            }
        }
    }

    /// Unit label of the score, e.g. `ops/s` or `us/op`
    pub fn score_unit(&self) -> String {
        match &self.data {
            MeasurementData::Throughput { .. } => format!("ops/{}", self.unit),
            MeasurementData::Scalar { score_unit, .. } => score_unit.clone(),
            _ => format!("{}/op", self.unit),
        }
    }

    /// Number of underlying samples
    pub fn sample_count(&self) -> u64 {
        match &self.data {
            MeasurementData::Throughput { samples, .. }
            | MeasurementData::AverageTime { samples, .. }
            | MeasurementData::SingleShot { samples }
            | MeasurementData::Scalar { samples, .. } => samples.n(),
            MeasurementData::SampleTime { histogram } => histogram.n(),
        }
    }

    /// Snapshot of the score distribution in the reporting unit.
    ///
    /// Sample-time percentiles are bootstrapped over the merged histogram.
    pub fn statistics(&self) -> SummaryStatistics {
        let level = DEFAULT_SCORE_CONFIDENCE;
        let to_unit = 1.0 / self.unit.nanos();
        match &self.data {
            MeasurementData::Throughput { samples, .. }
            | MeasurementData::AverageTime { samples, .. }
            | MeasurementData::Scalar { samples, .. } => SummaryStatistics::of(samples, level),
            MeasurementData::SampleTime { histogram } => {
                let boot = BootstrappedStatistics::new(histogram.clone());
                SummaryStatistics::of(&boot, level).scaled(to_unit)
            }
            MeasurementData::SingleShot { samples } => {
                SummaryStatistics::of(samples, level).scaled(to_unit)
            }
        }
    }

    /// Merge results of the same label and kind along `axis`.
    ///
    /// Threads: throughput rescales each thread's operation count onto the
    /// longest thread window, so the merged rate is the sum of per-thread
    /// rates; average time sums operations and time; latency populations
    /// merge; scalars apply their policy.
    ///
    /// Iterations: operations and time are summed and per-iteration scores
    /// concatenated; latency populations merge; scalar values concatenate.
    pub fn aggregate<'a>(
        axis: AggregationAxis,
        items: impl IntoIterator<Item = &'a Measurement>,
    ) -> Result<Measurement, AggregationError> {
        let items: Vec<&Measurement> = items.into_iter().collect();
        let first = *items.first().ok_or(AggregationError::Empty)?;
        for item in &items[1..] {
            if item.label != first.label {
                return Err(AggregationError::LabelMismatch {
                    expected: first.label.clone(),
                    found: item.label.clone(),
                });
            }
            if std::mem::discriminant(&item.data) != std::mem::discriminant(&first.data) {
                return Err(AggregationError::KindMismatch {
                    label: first.label.clone(),
                });
            }
            if item.unit != first.unit {
                return Err(AggregationError::UnitMismatch {
                    label: first.label.clone(),
                });
            }
        }

        let unit = first.unit;
        let data = match &first.data {
            MeasurementData::Throughput { .. } => {
                let parts: Vec<_> = items.iter().filter_map(|m| m.counted()).collect();
                let (ops, duration_ns, samples) = match axis {
                    AggregationAxis::Threads => {
                        let window = parts.iter().map(|p| p.1).max().unwrap_or(0);
                        let ops = parts
                            .iter()
                            .map(|&(ops, d, _)| {
                                if d == 0 || window == 0 {
                                    ops
                                } else {
                                    ops * window as f64 / d as f64
                                }
                            })
                            .sum::<f64>();
                        let score = throughput_score(ops, window, unit);
                        (ops, window, [score].into_iter().collect())
                    }
                    AggregationAxis::Iterations => sum_counted(&parts),
                };
                MeasurementData::Throughput {
                    ops,
                    duration_ns,
                    samples,
                }
            }
            MeasurementData::AverageTime { .. } => {
                let parts: Vec<_> = items.iter().filter_map(|m| m.counted()).collect();
                let (ops, duration_ns, samples) = duration_weighted(&parts);
                let samples = match axis {
                    AggregationAxis::Threads => {
                        [average_time_score(ops, duration_ns, unit)].into_iter().collect()
                    }
                    AggregationAxis::Iterations => samples,
                };
                MeasurementData::AverageTime {
                    ops,
                    duration_ns,
                    samples,
                }
            }
            MeasurementData::SampleTime { .. } => {
                let mut histogram = HistogramStatistics::new();
                for item in &items {
                    if let MeasurementData::SampleTime { histogram: h } = &item.data {
                        histogram.merge(h)?;
                    }
                }
                MeasurementData::SampleTime { histogram }
            }
            MeasurementData::SingleShot { .. } => {
                let mut samples = ListStatistics::new();
                for item in &items {
                    if let MeasurementData::SingleShot { samples: s } = &item.data {
                        samples.merge(s);
                    }
                }
                MeasurementData::SingleShot { samples }
            }
            MeasurementData::Scalar {
                policy, score_unit, ..
            } => {
                let mut merged = ListStatistics::new();
                for item in &items {
                    if let MeasurementData::Scalar { samples, .. } = &item.data {
                        merged.merge(samples);
                    }
                }
                let samples = match axis {
                    AggregationAxis::Threads => {
                        let value = match policy {
                            AggregationPolicy::Sum => merged.sum(),
                            AggregationPolicy::Average => merged.mean(),
                            AggregationPolicy::Max => merged.max(),
                            AggregationPolicy::Min => merged.min(),
                        };
                        [value].into_iter().collect()
                    }
                    AggregationAxis::Iterations => merged,
                };
                MeasurementData::Scalar {
                    policy: *policy,
                    samples,
                    score_unit: score_unit.clone(),
                }
            }
        };

        Ok(Measurement {
            role: first.role,
            label: first.label.clone(),
            unit,
            data,
        })
    }

    fn counted(&self) -> Option<(f64, u64, &ListStatistics)> {
        match &self.data {
            MeasurementData::Throughput {
                ops,
                duration_ns,
                samples,
            }
            | MeasurementData::AverageTime {
                ops,
                duration_ns,
                samples,
            } => Some((*ops, *duration_ns, samples)),
            _ => None,
        }
    }
}

fn sum_counted(parts: &[(f64, u64, &ListStatistics)]) -> (f64, u64, ListStatistics) {
    let mut samples = ListStatistics::new();
    let mut ops = 0.0;
    let mut duration_ns = 0u64;
    for (part_ops, part_ns, part_samples) in parts {
        ops += part_ops;
        duration_ns += part_ns;
        samples.merge(part_samples);
    }
    (ops, duration_ns, samples)
}

/// Average times combine as the duration-weighted mean of their scores,
/// `sum(score_i * d_i) / sum(d_i)`. The result keeps the summed duration and
/// the operation count that reproduces that mean.
fn duration_weighted(parts: &[(f64, u64, &ListStatistics)]) -> (f64, u64, ListStatistics) {
    let mut samples = ListStatistics::new();
    let mut ops = 0.0;
    let mut duration_ns = 0u64;
    let mut weight_ns = 0.0;
    let mut weighted = 0.0;
    for &(part_ops, part_ns, part_samples) in parts {
        ops += part_ops;
        duration_ns += part_ns;
        if part_ops > 0.0 {
            let d = part_ns as f64;
            weight_ns += d;
            weighted += d * (d / part_ops);
        }
        samples.merge(part_samples);
    }
    if weighted > 0.0 {
        ops = duration_ns as f64 * weight_ns / weighted;
    }
    (ops, duration_ns, samples)
}
