#![warn(missing_docs)]
//! microflux Statistical Engine
//!
//! Estimators over benchmark sample populations:
//! - Exact list populations for per-iteration scores
//! - HDR histograms for high-volume latency sampling
//! - Bootstrapped percentile estimates over either representation
//! - Student-t confidence intervals and interval-overlap significance

mod bootstrap;
mod comparison;
mod histogram;
mod list;
mod percentiles;
mod student_t;
mod summary;

pub use bootstrap::{BootstrappedStatistics, Resample};
pub use comparison::{compare_means, intervals_overlap};
pub use histogram::{HistogramError, HistogramStatistics, RecordedValue, SIGNIFICANT_DIGITS};
pub use list::ListStatistics;
pub use percentiles::{Percentiles, compute_percentile, percentile_of_sorted};
pub use student_t::{t_cdf, t_quantile};
pub use summary::SummaryStatistics;

use std::cmp::Ordering;
use thiserror::Error;

/// Default number of bootstrap resamples
pub const DEFAULT_RESAMPLES: usize = 100;

/// Confidence level used for reported score errors (99.9%)
pub const DEFAULT_SCORE_CONFIDENCE: f64 = 0.999;

/// Confidence level used by [`Statistics::compare`] (99%)
pub const DEFAULT_COMPARE_CONFIDENCE: f64 = 0.99;

/// Errors raised when constructing estimators
#[derive(Debug, Error, PartialEq)]
pub enum StatsError {
    #[error("Invalid confidence level: {0} (must be between 0 and 1)")]
    InvalidConfidenceLevel(f64),

    #[error("Resample count must be positive")]
    ZeroResamples,

    #[error(transparent)]
    Histogram(#[from] HistogramError),
}

/// Read contract shared by every sample population.
///
/// Empty populations answer NaN for `sum`, `mean`, `min`, `max` and every
/// percentile. Populations with fewer than two samples answer NaN for
/// `variance`, `standard_deviation`, `mean_error_at` and the interval bounds.
pub trait Statistics {
    /// Number of samples
    fn n(&self) -> u64;

    /// Sum of all samples
    fn sum(&self) -> f64;

    /// Smallest sample
    fn min(&self) -> f64;

    /// Largest sample
    fn max(&self) -> f64;

    /// Unbiased (n - 1) sample variance
    fn variance(&self) -> f64;

    /// Percentile for `p` in `[0, 100]`
    fn percentile(&self, p: f64) -> f64;

    /// Arithmetic mean
    fn mean(&self) -> f64 {
        if self.n() == 0 {
            f64::NAN
        } else {
            self.sum() / self.n() as f64
        }
    }

    /// Sample standard deviation
    fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Half width of the two-sided Student-t interval around the mean
    fn mean_error_at(&self, level: f64) -> f64 {
        let n = self.n();
        if n < 2 || !(level > 0.0 && level < 1.0) {
            return f64::NAN;
        }
        let t = t_quantile(1.0 - (1.0 - level) / 2.0, (n - 1) as f64);
        t * self.standard_deviation() / (n as f64).sqrt()
    }

    /// `(lower, upper)` bounds of the `level` confidence interval around the mean
    fn confidence_interval_at(&self, level: f64) -> (f64, f64) {
        let mean = self.mean();
        let err = self.mean_error_at(level);
        (mean - err, mean + err)
    }

    /// True when the two `level` intervals do not overlap
    fn is_different(&self, other: &dyn Statistics, level: f64) -> bool {
        let ours = self.confidence_interval_at(level);
        let theirs = other.confidence_interval_at(level);
        if ours.0.is_nan() || theirs.0.is_nan() {
            return false;
        }
        !intervals_overlap(ours, theirs)
    }

    /// Orders by mean, but only when the difference is significant at the
    /// default compare level; indistinguishable populations are `Equal`.
    fn compare(&self, other: &dyn Statistics) -> Ordering {
        if self.is_different(other, DEFAULT_COMPARE_CONFIDENCE) {
            compare_means(self.mean(), other.mean())
        } else {
            Ordering::Equal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_RESAMPLES, 100);
        assert!((DEFAULT_SCORE_CONFIDENCE - 0.999).abs() < f64::EPSILON);
        assert!((DEFAULT_COMPARE_CONFIDENCE - 0.99).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mean_error_matches_t_interval() {
        let stats: ListStatistics = [10.0, 12.0, 11.0, 13.0, 9.0].into_iter().collect();
        // sd = sqrt(2.5), t(0.975, 4) = 2.776
        let expected = 2.776 * 2.5f64.sqrt() / 5f64.sqrt();
        assert!((stats.mean_error_at(0.95) - expected).abs() < 1e-3);

        let (lo, hi) = stats.confidence_interval_at(0.95);
        assert!(((lo + hi) / 2.0 - 11.0).abs() < 1e-9);
        assert!(hi > lo);
    }

    #[test]
    fn test_invalid_level_is_nan() {
        let stats: ListStatistics = [1.0, 2.0, 3.0].into_iter().collect();
        assert!(stats.mean_error_at(0.0).is_nan());
        assert!(stats.mean_error_at(1.0).is_nan());
    }

    #[test]
    fn test_is_different_and_compare() {
        let low: ListStatistics = [10.0, 10.1, 9.9, 10.05, 9.95].into_iter().collect();
        let high: ListStatistics = [20.0, 20.1, 19.9, 20.05, 19.95].into_iter().collect();
        assert!(low.is_different(&high, 0.99));
        assert_eq!(low.compare(&high), Ordering::Less);
        assert_eq!(high.compare(&low), Ordering::Greater);
    }

    #[test]
    fn test_noisy_populations_compare_equal() {
        let a: ListStatistics = [10.0, 14.0, 6.0, 12.0, 8.0].into_iter().collect();
        let b: ListStatistics = [11.0, 15.0, 7.0, 13.0, 9.0].into_iter().collect();
        assert!(a.mean() < b.mean());
        assert!(!a.is_different(&b, 0.99));
        assert_eq!(a.compare(&b), Ordering::Equal);
    }

    #[test]
    fn test_singletons_are_never_different() {
        let a: ListStatistics = [1.0].into_iter().collect();
        let b: ListStatistics = [100.0].into_iter().collect();
        assert!(!a.is_different(&b, 0.99));
    }
}
