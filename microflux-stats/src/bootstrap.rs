//! Bootstrap Resampling
//!
//! Denoised percentile estimates: resample the backing population with
//! replacement, take the percentile of every resample and report the mean of
//! those estimates. Used for percentiles over merged multi-thread histograms,
//! whose samples are not independent.

use crate::{DEFAULT_RESAMPLES, HistogramStatistics, ListStatistics, Statistics, StatsError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, thread_rng};
use rayon::prelude::*;

/// Upper bound on draws per histogram resample
const MAX_HISTOGRAM_DRAWS: u64 = 1 << 16;

/// Populations that can draw a same-sized resample with replacement
pub trait Resample: Statistics + Send + Sync + Sized {
    /// Draw a resample using `rng`
    fn resample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Self, StatsError>;
}

impl Resample for ListStatistics {
    fn resample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Self, StatsError> {
        let values = self.values();
        Ok((0..values.len())
            .filter_map(|_| values.choose(rng).copied())
            .collect())
    }
}

impl Resample for HistogramStatistics {
    /// Draws recorded bucket values proportionally to their counts.
    /// Resamples of very large histograms are capped at 65536 draws.
    fn resample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Self, StatsError> {
        let recorded = self.recorded();
        let mut cumulative = Vec::with_capacity(recorded.len());
        let mut total = 0u64;
        for bucket in &recorded {
            total += bucket.count;
            cumulative.push(total);
        }

        let mut drawn = vec![0u64; recorded.len()];
        for _ in 0..total.min(MAX_HISTOGRAM_DRAWS) {
            let ticket = rng.gen_range(0..total);
            drawn[cumulative.partition_point(|&c| c <= ticket)] += 1;
        }

        let mut out = self.empty_like();
        for (bucket, &count) in recorded.iter().zip(&drawn) {
            out.record(bucket.value, count)?;
        }
        Ok(out)
    }
}

/// Wraps a population and replaces its percentile estimator with the
/// bootstrap mean. Every other statistic is answered by the inner population,
/// and so are the `p <= 0` and `p >= 100` extremes.
#[derive(Debug, Clone)]
pub struct BootstrappedStatistics<S> {
    inner: S,
    resamples: usize,
    seed: Option<u64>,
}

impl<S: Resample> BootstrappedStatistics<S> {
    /// Bootstrap with the default resample count
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            resamples: DEFAULT_RESAMPLES,
            seed: None,
        }
    }

    /// Bootstrap with a specific resample count
    pub fn with_resamples(inner: S, resamples: usize) -> Result<Self, StatsError> {
        if resamples == 0 {
            return Err(StatsError::ZeroResamples);
        }
        Ok(Self {
            inner,
            resamples,
            seed: None,
        })
    }

    /// Make percentile estimates reproducible
    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The wrapped population
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of resamples per percentile query
    pub fn resamples(&self) -> usize {
        self.resamples
    }

    fn estimates(&self, p: f64) -> Result<Vec<f64>, StatsError> {
        match self.seed {
            // One generator per resample index keeps results independent of
            // how rayon schedules the work.
            Some(seed) => (0..self.resamples)
                .into_par_iter()
                .map(|i| {
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                    Ok::<_, StatsError>(self.inner.resample(&mut rng)?.percentile(p))
                })
                .collect(),
            None => (0..self.resamples)
                .into_par_iter()
                .map_init(thread_rng, |rng, _| {
                    Ok::<_, StatsError>(self.inner.resample(rng)?.percentile(p))
                })
                .collect(),
        }
    }
}

impl<S: Resample> Statistics for BootstrappedStatistics<S> {
    fn n(&self) -> u64 {
        self.inner.n()
    }

    fn sum(&self) -> f64 {
        self.inner.sum()
    }

    fn min(&self) -> f64 {
        self.inner.min()
    }

    fn max(&self) -> f64 {
        self.inner.max()
    }

    fn variance(&self) -> f64 {
        self.inner.variance()
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.inner.n() == 0 {
            return f64::NAN;
        }
        let (min, max) = (self.inner.min(), self.inner.max());
        if p <= 0.0 {
            return min;
        }
        if p >= 100.0 {
            return max;
        }
        match self.estimates(p) {
            Ok(estimates) => {
                let mean = estimates.iter().sum::<f64>() / estimates.len() as f64;
                mean.clamp(min, max)
            }
            Err(_) => f64::NAN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_population() {
        let stats: ListStatistics = std::iter::repeat(7.0).take(50).collect();
        let boot = BootstrappedStatistics::new(stats);
        assert_eq!(boot.resamples(), DEFAULT_RESAMPLES);
        assert_eq!(boot.percentile(50.0), 7.0);
        assert_eq!(boot.percentile(99.0), 7.0);
    }

    #[test]
    fn test_delegates_moments() {
        let stats: ListStatistics = (1..=10).map(|x| x as f64).collect();
        let boot = BootstrappedStatistics::new(stats.clone());
        assert_eq!(boot.n(), 10);
        assert_eq!(boot.mean(), stats.mean());
        assert_eq!(boot.variance(), stats.variance());
        assert_eq!(boot.min(), 1.0);
        assert_eq!(boot.max(), 10.0);
    }

    #[test]
    fn test_median_estimate_is_close() {
        let stats: ListStatistics = (0..1_000).map(|x| x as f64).collect();
        let boot = BootstrappedStatistics::with_resamples(stats, 200)
            .unwrap()
            .seeded(42);
        let median = boot.percentile(50.0);
        assert!((median - 499.5).abs() < 25.0);
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut h = HistogramStatistics::new();
        for v in 0..5_000u64 {
            h.record(v * 13 % 7_919, 1).unwrap();
        }
        let a = BootstrappedStatistics::new(h.clone()).seeded(7);
        let b = BootstrappedStatistics::new(h).seeded(7);
        assert_eq!(a.percentile(99.0), b.percentile(99.0));
    }

    #[test]
    fn test_histogram_resample_preserves_size() {
        let mut h = HistogramStatistics::new();
        h.record(100, 40).unwrap();
        h.record(5_000, 60).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let resample = h.resample(&mut rng).unwrap();
        assert_eq!(resample.n(), 100);
        assert!(resample.min() >= h.min());
        assert!(resample.max() <= h.max());
    }

    #[test]
    fn test_constant_large_latency_stays_within_extremes() {
        let mut h = HistogramStatistics::new();
        h.record(1_000_000, 100).unwrap();
        let boot = BootstrappedStatistics::new(h.clone()).seeded(11);
        assert_eq!(boot.percentile(0.0), h.min());
        assert_eq!(boot.percentile(100.0), h.max());
        for p in [1.0, 50.0, 90.0, 99.99] {
            let value = boot.percentile(p);
            assert!(boot.min() <= value && value <= boot.max(), "p{p} = {value}");
        }
    }

    #[test]
    fn test_extremes_come_from_inner_population() {
        let stats: ListStatistics = [3.0, 9.0, 4.0, 1.0, 7.0].into_iter().collect();
        let boot = BootstrappedStatistics::new(stats).seeded(5);
        assert_eq!(boot.percentile(0.0), 1.0);
        assert_eq!(boot.percentile(-5.0), 1.0);
        assert_eq!(boot.percentile(100.0), 9.0);
    }

    #[test]
    fn test_zero_resamples_rejected() {
        let result = BootstrappedStatistics::with_resamples(ListStatistics::new(), 0);
        assert!(matches!(result, Err(StatsError::ZeroResamples)));
    }

    #[test]
    fn test_empty_population_is_nan() {
        let boot = BootstrappedStatistics::new(ListStatistics::new());
        assert!(boot.percentile(50.0).is_nan());
    }
}
