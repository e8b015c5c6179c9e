//! Percentile Computation
//!
//! Linear interpolation between nearest ranks over a sorted population, plus
//! the fixed percentile ladder reported for every score.

use crate::Statistics;
use serde::{Deserialize, Serialize};

/// Percentile ladder reported alongside a score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    /// 0th percentile (minimum)
    pub p0: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// 99.9th percentile
    pub p999: f64,
    /// 99.99th percentile
    pub p9999: f64,
    /// 100th percentile (maximum)
    pub p100: f64,
}

impl Percentiles {
    /// Query the ladder from any population
    pub fn of(stats: &dyn Statistics) -> Self {
        Self {
            p0: stats.percentile(0.0),
            p50: stats.percentile(50.0),
            p90: stats.percentile(90.0),
            p95: stats.percentile(95.0),
            p99: stats.percentile(99.0),
            p999: stats.percentile(99.9),
            p9999: stats.percentile(99.99),
            p100: stats.percentile(100.0),
        }
    }

    /// Multiply every entry by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            p0: self.p0 * factor,
            p50: self.p50 * factor,
            p90: self.p90 * factor,
            p95: self.p95 * factor,
            p99: self.p99 * factor,
            p999: self.p999 * factor,
            p9999: self.p9999 * factor,
            p100: self.p100 * factor,
        }
    }
}

/// Percentile of an already sorted slice.
///
/// `p` is clamped to `[0, 100]`; an empty slice yields NaN.
pub fn percentile_of_sorted(sorted: &[f64], percentile: f64) -> f64 {
    match sorted.len() {
        0 => return f64::NAN,
        1 => return sorted[0],
        _ => {}
    }

    let n = sorted.len();
    let p = percentile.clamp(0.0, 100.0) / 100.0;

    let rank = p * (n - 1) as f64;
    let lower_idx = rank.floor() as usize;
    let upper_idx = (lower_idx + 1).min(n - 1);
    let fraction = rank - lower_idx as f64;

    sorted[lower_idx] + fraction * (sorted[upper_idx] - sorted[lower_idx])
}

/// Percentile of an unsorted slice (sorts a copy)
pub fn compute_percentile(samples: &[f64], percentile: f64) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_of_sorted(&sorted, percentile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ListStatistics;

    #[test]
    fn test_median() {
        let samples = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        assert!((compute_percentile(&samples, 50.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_quartiles() {
        let samples: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!((compute_percentile(&samples, 25.0) - 25.75).abs() < 1e-9);
        assert!((compute_percentile(&samples, 75.0) - 75.25).abs() < 1e-9);
    }

    #[test]
    fn test_bounds() {
        let samples = vec![3.0, 9.0, 1.0];
        assert_eq!(compute_percentile(&samples, 0.0), 1.0);
        assert_eq!(compute_percentile(&samples, 100.0), 9.0);
        assert_eq!(compute_percentile(&samples, 150.0), 9.0);
        assert_eq!(compute_percentile(&samples, -1.0), 1.0);
    }

    #[test]
    fn test_empty_is_nan() {
        assert!(compute_percentile(&[], 50.0).is_nan());
    }

    #[test]
    fn test_ladder() {
        let stats: ListStatistics = (1..=1000).map(|x| x as f64).collect();
        let ladder = Percentiles::of(&stats);
        assert_eq!(ladder.p0, 1.0);
        assert_eq!(ladder.p100, 1000.0);
        assert!(ladder.p99 > 985.0 && ladder.p99 < 995.0);

        let doubled = ladder.scaled(2.0);
        assert_eq!(doubled.p100, 2000.0);
    }
}
