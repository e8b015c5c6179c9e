//! Summary Statistics
//!
//! A point-in-time snapshot of a population: moments, the percentile ladder
//! and the t-interval at a chosen confidence level. A view only; it is
//! recomputed from the population whenever it is needed.

use crate::Statistics;
use crate::percentiles::Percentiles;
use serde::{Deserialize, Serialize};

/// Snapshot of a population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    /// Sample count
    pub n: u64,
    /// Arithmetic mean
    pub mean: f64,
    /// Smallest sample
    pub min: f64,
    /// Largest sample
    pub max: f64,
    /// Sample standard deviation
    pub std_dev: f64,
    /// Sample variance
    pub variance: f64,
    /// Percentile ladder
    pub percentiles: Percentiles,
    /// Confidence level of `mean_error` and the interval
    pub confidence_level: f64,
    /// Half width of the confidence interval
    pub mean_error: f64,
    /// Lower interval bound
    pub ci_lower: f64,
    /// Upper interval bound
    pub ci_upper: f64,
}

impl SummaryStatistics {
    /// Snapshot `stats` with intervals at `level`
    pub fn of(stats: &dyn Statistics, level: f64) -> Self {
        let (ci_lower, ci_upper) = stats.confidence_interval_at(level);
        Self {
            n: stats.n(),
            mean: stats.mean(),
            min: stats.min(),
            max: stats.max(),
            std_dev: stats.standard_deviation(),
            variance: stats.variance(),
            percentiles: Percentiles::of(stats),
            confidence_level: level,
            mean_error: stats.mean_error_at(level),
            ci_lower,
            ci_upper,
        }
    }

    /// Rescale location and spread by `factor` (e.g. nanoseconds to a time unit)
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            n: self.n,
            mean: self.mean * factor,
            min: self.min * factor,
            max: self.max * factor,
            std_dev: self.std_dev * factor.abs(),
            variance: self.variance * factor * factor,
            percentiles: self.percentiles.scaled(factor),
            confidence_level: self.confidence_level,
            mean_error: self.mean_error * factor.abs(),
            ci_lower: self.ci_lower * factor,
            ci_upper: self.ci_upper * factor,
        }
    }

    /// Coefficient of variation in percent
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean == 0.0 {
            0.0
        } else {
            (self.std_dev / self.mean) * 100.0
        }
    }
}
