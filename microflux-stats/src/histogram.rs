//! Latency Histogram
//!
//! High-volume latency populations backed by an HDR histogram with three
//! significant digits, so every statistic carries at most 0.1% relative
//! error. Extremes, moments and percentiles are all answered from the same
//! buckets, which keeps `min <= percentile(p) <= max` for every `p`.
//!
//! On the wire (rkyv for IPC, serde for reports) a histogram travels as its
//! non-empty `(value, count)` pairs and is rebuilt on the other side.

use crate::Statistics;
use hdrhistogram::Histogram;
use rkyv::ser::{ScratchSpace, Serializer};
use rkyv::vec::{ArchivedVec, VecResolver};
use rkyv::with::{ArchiveWith, DeserializeWith, SerializeWith};
use rkyv::{Archive, Deserialize as RkyvDeserialize, Fallible, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decimal digits of precision kept for every recorded value
pub const SIGNIFICANT_DIGITS: u8 = 3;

/// Errors raised while building or merging histograms
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HistogramError {
    #[error("Failed to create histogram: {0}")]
    Creation(String),

    #[error("Failed to record value {value}: {reason}")]
    Record { value: u64, reason: String },

    #[error("Failed to merge histograms: {0}")]
    Merge(String),
}

/// One non-empty bucket: the highest value equivalent to the bucket and
/// how many samples fell into it
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
pub struct RecordedValue {
    /// Bucket value
    pub value: u64,
    /// Samples in the bucket
    pub count: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct RecordedValues(Vec<RecordedValue>);

/// Population of `u64` samples (usually nanoseconds)
#[derive(
    Debug, Clone, Default, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
#[serde(into = "RecordedValues", try_from = "RecordedValues")]
pub struct HistogramStatistics {
    /// Allocated on first record
    #[with(AsRecordedValues)]
    histogram: Option<Histogram<u64>>,
}

impl HistogramStatistics {
    /// Empty histogram
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a histogram from its recorded values
    pub fn from_recorded(values: &[RecordedValue]) -> Result<Self, HistogramError> {
        let mut out = Self::new();
        for v in values {
            out.record(v.value, v.count)?;
        }
        Ok(out)
    }

    fn histogram_mut(&mut self) -> Result<&mut Histogram<u64>, HistogramError> {
        let histogram = match self.histogram.take() {
            Some(h) => h,
            None => Histogram::new(SIGNIFICANT_DIGITS)
                .map_err(|e| HistogramError::Creation(format!("{e:?}")))?,
        };
        Ok(self.histogram.insert(histogram))
    }

    /// Record `count` occurrences of `value`
    pub fn record(&mut self, value: u64, count: u64) -> Result<(), HistogramError> {
        if count == 0 {
            return Ok(());
        }
        self.histogram_mut()?
            .record_n(value, count)
            .map_err(|e| HistogramError::Record {
                value,
                reason: format!("{e:?}"),
            })
    }

    /// Add every sample of `other` into this histogram.
    ///
    /// Bucket counts add exactly, so merging is associative and commutative.
    pub fn merge(&mut self, other: &HistogramStatistics) -> Result<(), HistogramError> {
        let Some(theirs) = &other.histogram else {
            return Ok(());
        };
        match self.histogram.as_mut() {
            Some(ours) => ours
                .add(theirs)
                .map_err(|e| HistogramError::Merge(format!("{e:?}")))?,
            None => self.histogram = Some(theirs.clone()),
        }
        Ok(())
    }

    /// Non-empty buckets in increasing value order
    pub fn recorded(&self) -> Vec<RecordedValue> {
        recorded_values(&self.histogram)
    }

    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.histogram.as_ref().map_or(true, |h| h.is_empty())
    }

    /// An empty histogram already sized for the values of this one
    pub(crate) fn empty_like(&self) -> Self {
        let histogram = self.histogram.as_ref().map(|h| {
            let mut h = h.clone();
            h.reset();
            h
        });
        Self { histogram }
    }

    fn populated(&self) -> Option<&Histogram<u64>> {
        self.histogram.as_ref().filter(|h| !h.is_empty())
    }
}

fn recorded_values(histogram: &Option<Histogram<u64>>) -> Vec<RecordedValue> {
    histogram
        .iter()
        .flat_map(|h| h.iter_recorded())
        .map(|v| RecordedValue {
            value: v.value_iterated_to(),
            count: v.count_at_value(),
        })
        .collect()
}

impl From<HistogramStatistics> for RecordedValues {
    fn from(h: HistogramStatistics) -> Self {
        RecordedValues(h.recorded())
    }
}

impl TryFrom<RecordedValues> for HistogramStatistics {
    type Error = HistogramError;

    fn try_from(values: RecordedValues) -> Result<Self, Self::Error> {
        HistogramStatistics::from_recorded(&values.0)
    }
}

/// Archives a histogram as its recorded values
pub struct AsRecordedValues;

impl ArchiveWith<Option<Histogram<u64>>> for AsRecordedValues {
    type Archived = ArchivedVec<ArchivedRecordedValue>;
    type Resolver = VecResolver;

    unsafe fn resolve_with(
        field: &Option<Histogram<u64>>,
        pos: usize,
        resolver: VecResolver,
        out: *mut Self::Archived,
    ) {
        let len = field.as_ref().map_or(0, |h| h.iter_recorded().count());
        ArchivedVec::resolve_from_len(len, pos, resolver, out);
    }
}

impl<S> SerializeWith<Option<Histogram<u64>>, S> for AsRecordedValues
where
    S: Fallible + ScratchSpace + Serializer + ?Sized,
{
    fn serialize_with(
        field: &Option<Histogram<u64>>,
        serializer: &mut S,
    ) -> Result<VecResolver, S::Error> {
        ArchivedVec::serialize_from_slice(&recorded_values(field), serializer)
    }
}

impl<D> DeserializeWith<ArchivedVec<ArchivedRecordedValue>, Option<Histogram<u64>>, D>
    for AsRecordedValues
where
    D: Fallible + ?Sized,
{
    fn deserialize_with(
        field: &ArchivedVec<ArchivedRecordedValue>,
        deserializer: &mut D,
    ) -> Result<Option<Histogram<u64>>, D::Error> {
        let values: Vec<RecordedValue> = field.deserialize(deserializer)?;
        // Values were produced by a valid histogram, so rebuilding cannot
        // exceed its range; a failure leaves the population empty.
        Ok(HistogramStatistics::from_recorded(&values)
            .map(|h| h.histogram)
            .unwrap_or_default())
    }
}

impl Statistics for HistogramStatistics {
    fn n(&self) -> u64 {
        self.histogram.as_ref().map_or(0, |h| h.len())
    }

    fn sum(&self) -> f64 {
        self.populated()
            .map_or(f64::NAN, |h| h.mean() * h.len() as f64)
    }

    fn mean(&self) -> f64 {
        self.populated().map_or(f64::NAN, |h| h.mean())
    }

    fn min(&self) -> f64 {
        self.populated().map_or(f64::NAN, |h| h.min() as f64)
    }

    fn max(&self) -> f64 {
        self.populated().map_or(f64::NAN, |h| h.max() as f64)
    }

    fn variance(&self) -> f64 {
        match self.populated() {
            Some(h) if h.len() >= 2 => {
                let n = h.len() as f64;
                h.stdev().powi(2) * n / (n - 1.0)
            }
            _ => f64::NAN,
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        let Some(h) = self.populated() else {
            return f64::NAN;
        };
        let (min, max) = (h.min() as f64, h.max() as f64);
        if p <= 0.0 {
            return min;
        }
        if p >= 100.0 {
            return max;
        }
        (h.value_at_quantile(p / 100.0) as f64).clamp(min, max)
    }
}
