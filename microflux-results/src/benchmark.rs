//! Benchmark and Run Results

use crate::{AggregationAxis, AggregationError, IterationResult, IterationType, Measurement};
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Measurement iterations of one fork
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct BenchmarkResult {
    /// Benchmark name
    pub benchmark: String,
    /// Fork index, 0 when run in-process
    pub fork: u32,
    iterations: Vec<IterationResult>,
}

impl BenchmarkResult {
    /// Empty result for `fork`
    pub fn new(benchmark: impl Into<String>, fork: u32) -> Self {
        Self {
            benchmark: benchmark.into(),
            fork,
            iterations: Vec::new(),
        }
    }

    /// Append a sealed measurement iteration
    pub fn push(&mut self, iteration: IterationResult) -> Result<(), AggregationError> {
        if iteration.params.kind == IterationType::Warmup {
            return Err(AggregationError::WarmupIteration);
        }
        if !iteration.is_sealed() {
            return Err(AggregationError::Unsealed);
        }
        self.iterations.push(iteration);
        Ok(())
    }

    /// Iterations in order
    pub fn iterations(&self) -> &[IterationResult] {
        &self.iterations
    }

    /// Whether no iteration completed
    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    /// Primary score merged across iterations
    pub fn primary(&self) -> Result<Measurement, AggregationError> {
        let per_iteration = self
            .iterations
            .iter()
            .map(IterationResult::primary)
            .collect::<Result<Vec<_>, _>>()?;
        Measurement::aggregate(AggregationAxis::Iterations, &per_iteration)
    }

    /// Secondary results merged across the iterations that produced them
    pub fn secondaries(&self) -> Result<BTreeMap<String, Measurement>, AggregationError> {
        let mut per_label: BTreeMap<String, Vec<Measurement>> = BTreeMap::new();
        for iteration in &self.iterations {
            for (label, m) in iteration.secondaries()? {
                per_label.entry(label).or_default().push(m);
            }
        }
        merge_labels(per_label)
    }
}

/// Every measured fork of one benchmark
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct RunResult {
    /// Benchmark name
    pub benchmark: String,
    /// Results of measured forks
    pub forks: Vec<BenchmarkResult>,
}

impl RunResult {
    /// Empty run
    pub fn new(benchmark: impl Into<String>) -> Self {
        Self {
            benchmark: benchmark.into(),
            forks: Vec::new(),
        }
    }

    /// Add one fork's result
    pub fn push(&mut self, fork: BenchmarkResult) {
        self.forks.push(fork);
    }

    /// Iterations of all forks, fork by fork
    pub fn iterations(&self) -> impl Iterator<Item = &IterationResult> {
        self.forks.iter().flat_map(|f| f.iterations().iter())
    }

    /// Primary score over every iteration of every fork
    pub fn primary(&self) -> Result<Measurement, AggregationError> {
        let per_fork = self
            .forks
            .iter()
            .filter(|f| !f.is_empty())
            .map(BenchmarkResult::primary)
            .collect::<Result<Vec<_>, _>>()?;
        Measurement::aggregate(AggregationAxis::Iterations, &per_fork)
    }

    /// Secondary results over every fork that produced them
    pub fn secondaries(&self) -> Result<BTreeMap<String, Measurement>, AggregationError> {
        let mut per_label: BTreeMap<String, Vec<Measurement>> = BTreeMap::new();
        for fork in &self.forks {
            for (label, m) in fork.secondaries()? {
                per_label.entry(label).or_default().push(m);
            }
        }
        merge_labels(per_label)
    }
}

fn merge_labels(
    per_label: BTreeMap<String, Vec<Measurement>>,
) -> Result<BTreeMap<String, Measurement>, AggregationError> {
    per_label
        .into_iter()
        .map(|(label, items)| {
            Measurement::aggregate(AggregationAxis::Iterations, &items).map(|m| (label, m))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AggregationPolicy, IterationParams, ResultRole, TimeUnit};

    const SEC: u64 = 1_000_000_000;

    fn params(kind: IterationType) -> IterationParams {
        IterationParams {
            kind,
            count: 3,
            time_ns: SEC,
            batch_size: 1,
        }
    }

    fn iteration(index: u32, ops: u64, extra: Option<f64>) -> IterationResult {
        let mut it = IterationResult::new("b", params(IterationType::Measurement), index);
        it.add(Measurement::throughput(
            ResultRole::Primary,
            "b",
            ops,
            SEC,
            TimeUnit::Seconds,
        ))
        .unwrap();
        if let Some(v) = extra {
            it.add(Measurement::scalar("gc", v, AggregationPolicy::Sum, "#"))
                .unwrap();
        }
        it.seal();
        it
    }

    #[test]
    fn test_primary_across_iterations() {
        let mut result = BenchmarkResult::new("b", 0);
        for (i, ops) in [900, 1_000, 1_100].into_iter().enumerate() {
            result.push(iteration(i as u32 + 1, ops, None)).unwrap();
        }
        let primary = result.primary().unwrap();
        assert!((primary.score() - 1_000.0).abs() < 1e-9);
        assert_eq!(primary.sample_count(), 3);
        assert!(primary.score_error() > 0.0);
    }

    #[test]
    fn test_push_rejects_warmup_and_unsealed() {
        let mut result = BenchmarkResult::new("b", 0);
        let mut warm = IterationResult::new("b", params(IterationType::Warmup), 1);
        warm.seal();
        assert!(matches!(
            result.push(warm),
            Err(AggregationError::WarmupIteration)
        ));
        let open = IterationResult::new("b", params(IterationType::Measurement), 1);
        assert!(matches!(result.push(open), Err(AggregationError::Unsealed)));
        assert!(result.is_empty());
    }

    #[test]
    fn test_secondary_missing_in_some_iterations() {
        let mut result = BenchmarkResult::new("b", 0);
        result.push(iteration(1, 10, Some(4.0))).unwrap();
        result.push(iteration(2, 10, None)).unwrap();
        result.push(iteration(3, 10, Some(6.0))).unwrap();
        let secondaries = result.secondaries().unwrap();
        assert_eq!(secondaries["gc"].sample_count(), 2);
        assert_eq!(secondaries["gc"].score(), 5.0);
    }

    #[test]
    fn test_run_result_spans_forks() {
        let mut run = RunResult::new("b");
        for fork in 0..2 {
            let mut result = BenchmarkResult::new("b", fork);
            result.push(iteration(1, 100, Some(1.0))).unwrap();
            result.push(iteration(2, 300, None)).unwrap();
            run.push(result);
        }
        let primary = run.primary().unwrap();
        assert_eq!(primary.sample_count(), 4);
        assert!((primary.score() - 200.0).abs() < 1e-9);
        assert_eq!(run.iterations().count(), 4);
        assert_eq!(run.secondaries().unwrap()["gc"].sample_count(), 2);
    }

    #[test]
    fn test_empty_run_has_no_primary() {
        let run = RunResult::new("b");
        assert!(matches!(run.primary(), Err(AggregationError::Empty)));
    }
}
