//! Iteration Results

use crate::{AggregationAxis, AggregationError, Measurement, ResultRole};
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Warmup or measurement
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum IterationType {
    /// Discarded iteration that lets the payload reach steady state
    Warmup,
    /// Iteration that contributes to the score
    Measurement,
}

/// Shape of one phase of iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct IterationParams {
    /// Phase
    pub kind: IterationType,
    /// Number of iterations in the phase
    pub count: u32,
    /// Target duration of each iteration
    pub time_ns: u64,
    /// Calls per operation batch (single-shot)
    pub batch_size: u32,
}

/// Thread results of one iteration, sealed once every thread reported
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct IterationResult {
    /// Benchmark name
    pub benchmark: String,
    /// Phase parameters
    pub params: IterationParams,
    /// Index within the phase, starting at 1
    pub index: u32,
    raw: Vec<Measurement>,
    sealed: bool,
}

impl IterationResult {
    /// Empty, unsealed result
    pub fn new(benchmark: impl Into<String>, params: IterationParams, index: u32) -> Self {
        Self {
            benchmark: benchmark.into(),
            params,
            index,
            raw: Vec::new(),
            sealed: false,
        }
    }

    /// Add one thread's raw result
    pub fn add(&mut self, raw: Measurement) -> Result<(), AggregationError> {
        if self.sealed {
            return Err(AggregationError::Sealed);
        }
        self.raw.push(raw);
        Ok(())
    }

    /// Add every raw result of one thread
    pub fn extend(
        &mut self,
        raw: impl IntoIterator<Item = Measurement>,
    ) -> Result<(), AggregationError> {
        for m in raw {
            self.add(m)?;
        }
        Ok(())
    }

    /// Freeze the result; further additions fail
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether the result is frozen
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Raw thread results in arrival order
    pub fn raw(&self) -> &[Measurement] {
        &self.raw
    }

    /// Raw results carrying `label`
    pub fn by_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Measurement> + 'a {
        self.raw.iter().filter(move |m| m.label == label)
    }

    /// Primary score merged across threads
    pub fn primary(&self) -> Result<Measurement, AggregationError> {
        Measurement::aggregate(
            AggregationAxis::Threads,
            self.raw.iter().filter(|m| m.role == ResultRole::Primary),
        )
    }

    /// Secondary results merged across threads, keyed by label
    pub fn secondaries(&self) -> Result<BTreeMap<String, Measurement>, AggregationError> {
        let mut groups: BTreeMap<&str, Vec<&Measurement>> = BTreeMap::new();
        for m in self.raw.iter().filter(|m| m.role == ResultRole::Secondary) {
            groups.entry(m.label.as_str()).or_default().push(m);
        }
        groups
            .into_iter()
            .map(|(label, items)| {
                Measurement::aggregate(AggregationAxis::Threads, items)
                    .map(|merged| (label.to_string(), merged))
            })
            .collect()
    }

    /// Labels present in this iteration, primary first
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for role in [ResultRole::Primary, ResultRole::Secondary] {
            for m in self.raw.iter().filter(|m| m.role == role) {
                if !labels.contains(&m.label.as_str()) {
                    labels.push(&m.label);
                }
            }
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AggregationPolicy, TimeUnit};

    fn params() -> IterationParams {
        IterationParams {
            kind: IterationType::Measurement,
            count: 5,
            time_ns: 1_000_000_000,
            batch_size: 1,
        }
    }

    fn thread_result(ops: u64) -> Measurement {
        Measurement::throughput(
            ResultRole::Primary,
            "bench",
            ops,
            1_000_000_000,
            TimeUnit::Seconds,
        )
    }

    #[test]
    fn test_primary_sums_threads() {
        let mut it = IterationResult::new("bench", params(), 1);
        it.add(thread_result(100)).unwrap();
        it.add(thread_result(300)).unwrap();
        it.seal();
        assert!((it.primary().unwrap().score() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_sealed_rejects_additions() {
        let mut it = IterationResult::new("bench", params(), 1);
        it.seal();
        assert!(matches!(
            it.add(thread_result(1)),
            Err(AggregationError::Sealed)
        ));
        assert!(it.raw().is_empty());
    }

    #[test]
    fn test_secondaries_grouped_by_label() {
        let mut it = IterationResult::new("bench", params(), 1);
        it.extend([
            thread_result(10),
            Measurement::scalar("misses", 3.0, AggregationPolicy::Sum, "#"),
            Measurement::scalar("misses", 4.0, AggregationPolicy::Sum, "#"),
            Measurement::scalar("depth", 9.0, AggregationPolicy::Max, "#"),
            Measurement::scalar("depth", 2.0, AggregationPolicy::Max, "#"),
        ])
        .unwrap();
        let secondaries = it.secondaries().unwrap();
        assert_eq!(secondaries.len(), 2);
        assert_eq!(secondaries["misses"].score(), 7.0);
        assert_eq!(secondaries["depth"].score(), 9.0);
        assert_eq!(it.labels(), vec!["bench", "misses", "depth"]);
        assert_eq!(it.by_label("misses").count(), 2);
    }

    #[test]
    fn test_primary_missing_is_empty_error() {
        let it = IterationResult::new("bench", params(), 1);
        assert!(matches!(it.primary(), Err(AggregationError::Empty)));
    }
}
