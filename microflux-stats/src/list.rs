//! Exact Sample Lists
//!
//! Stores every sample. Used where the population is small, e.g. one score
//! per iteration.

use crate::Statistics;
use crate::percentiles::percentile_of_sorted;
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

/// Population backed by the full list of samples
#[derive(
    Debug, Clone, Default, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
pub struct ListStatistics {
    values: Vec<f64>,
}

impl ListStatistics {
    /// Empty population
    pub fn new() -> Self {
        Self::default()
    }

    /// Population from existing samples
    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Add one sample
    pub fn add(&mut self, value: f64) {
        self.values.push(value);
    }

    /// Append every sample of `other`
    pub fn merge(&mut self, other: &ListStatistics) {
        self.values.extend_from_slice(&other.values);
    }

    /// Samples in insertion order
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// True when no samples were recorded
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn sorted(&self) -> Vec<f64> {
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted
    }
}

impl FromIterator<f64> for ListStatistics {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl Statistics for ListStatistics {
    fn n(&self) -> u64 {
        self.values.len() as u64
    }

    fn sum(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.values.iter().sum()
    }

    fn min(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    fn max(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    fn variance(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return f64::NAN;
        }
        let mean = self.mean();
        self.values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    }

    fn percentile(&self, p: f64) -> f64 {
        percentile_of_sorted(&self.sorted(), p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_moments() {
        let stats: ListStatistics = [1.0, 2.0, 3.0, 4.0, 5.0].into_iter().collect();
        assert_eq!(stats.n(), 5);
        assert_eq!(stats.sum(), 15.0);
        assert_eq!(stats.mean(), 3.0);
        assert_eq!(stats.min(), 1.0);
        assert_eq!(stats.max(), 5.0);
        assert!((stats.variance() - 2.5).abs() < 1e-12);
        assert!((stats.standard_deviation() - 2.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_empty_population_is_nan() {
        let stats = ListStatistics::new();
        assert_eq!(stats.n(), 0);
        assert!(stats.sum().is_nan());
        assert!(stats.mean().is_nan());
        assert!(stats.min().is_nan());
        assert!(stats.max().is_nan());
        assert!(stats.percentile(50.0).is_nan());
    }

    #[test]
    fn test_singleton_spread_is_nan() {
        let stats: ListStatistics = [42.0].into_iter().collect();
        assert_eq!(stats.mean(), 42.0);
        assert!(stats.variance().is_nan());
        assert!(stats.standard_deviation().is_nan());
        assert!(stats.mean_error_at(0.99).is_nan());
        let (lo, hi) = stats.confidence_interval_at(0.99);
        assert!(lo.is_nan() && hi.is_nan());
    }

    #[test]
    fn test_percentile_bounds_hold() {
        let stats: ListStatistics = [7.0, 3.0, 11.0, 5.0, 2.0, 13.0].into_iter().collect();
        assert_eq!(stats.percentile(0.0), stats.min());
        assert_eq!(stats.percentile(100.0), stats.max());
        let median = stats.percentile(50.0);
        assert!(stats.min() <= median && median <= stats.max());
    }

    #[test]
    fn test_merge_appends() {
        let mut a: ListStatistics = [1.0, 2.0].into_iter().collect();
        let b: ListStatistics = [3.0].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.values(), &[1.0, 2.0, 3.0]);
    }
}
