//! Significance Comparison
//!
//! Two populations are "different" at a confidence level when their
//! t-intervals around the mean do not overlap. Indistinguishable populations
//! compare equal so that noise does not flip report ordering.

use std::cmp::Ordering;

/// True when the closed intervals `a` and `b` share at least one point
pub fn intervals_overlap(a: (f64, f64), b: (f64, f64)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

/// Total order on means, with NaN sorting first
pub fn compare_means(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.total_cmp(&b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HistogramStatistics, ListStatistics, Statistics};

    #[test]
    fn test_overlap() {
        assert!(intervals_overlap((1.0, 3.0), (2.0, 4.0)));
        assert!(intervals_overlap((1.0, 3.0), (3.0, 4.0)));
        assert!(!intervals_overlap((1.0, 2.0), (2.5, 4.0)));
        assert!(!intervals_overlap((5.0, 6.0), (1.0, 2.0)));
    }

    #[test]
    fn test_compare_means_nan() {
        assert_eq!(compare_means(f64::NAN, 1.0), Ordering::Less);
        assert_eq!(compare_means(2.0, 1.0), Ordering::Greater);
    }

    #[test]
    fn test_list_against_histogram() {
        let list: ListStatistics = (0..100).map(|x| 1_000.0 + (x % 10) as f64).collect();
        let mut hist = HistogramStatistics::new();
        for x in 0..100u64 {
            hist.record(20 + x % 5, 1).unwrap();
        }
        assert!(list.is_different(&hist, 0.999));
        assert_eq!(hist.compare(&list), Ordering::Less);
    }
}
