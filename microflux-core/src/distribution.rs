//! Thread/Group Distribution
//!
//! Maps a total thread count onto repeated copies of a group-size vector.
//! With `groups = [3, 1]` and 8 threads there are two groups of four
//! threads; in each group threads 0..3 form subgroup 0 and thread 3 forms
//! subgroup 1.

use thiserror::Error;

/// Invalid distribution inputs
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DistributionError {
    #[error("Thread count must be positive")]
    ZeroThreads,

    #[error("Group vector must contain a positive entry, got {0:?}")]
    NoPositiveGroup(Vec<u32>),

    #[error("{threads} threads over groups {groups:?} exceed the u32 thread index range")]
    Overflow { threads: u32, groups: Vec<u32> },
}

/// Where one thread sits in the group topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadAssignment {
    /// Global index, `0..thread_count`
    pub thread_index: u32,
    /// Effective thread count
    pub thread_count: u32,
    /// Group this thread belongs to
    pub group_index: u32,
    /// Number of groups
    pub group_count: u32,
    /// Index within the group
    pub group_thread_index: u32,
    /// Threads per group (sum of the group vector)
    pub group_thread_count: u32,
    /// Subgroup (group vector entry) within the group
    pub subgroup_index: u32,
    /// Number of subgroups, including empty ones
    pub subgroup_count: u32,
    /// Index within the subgroup
    pub subgroup_thread_index: u32,
    /// Threads in this subgroup
    pub subgroup_thread_count: u32,
}

/// Result of [`distribute`]
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    /// Thread count after rounding up to a multiple of the group size
    pub effective_threads: u32,
    /// Number of replicated groups
    pub group_count: u32,
    /// One entry per thread, in thread index order
    pub assignments: Vec<ThreadAssignment>,
}

impl Distribution {
    /// Whether the requested count was rounded up
    pub fn was_rounded(&self, requested: u32) -> bool {
        self.effective_threads != requested
    }
}

/// Distribute `threads` threads over copies of `groups`.
///
/// `threads` is rounded up to the nearest multiple of `sum(groups)`; callers
/// must read back [`Distribution::effective_threads`]. Zero entries produce
/// empty subgroups that keep their index, so a leading zero reserves
/// subgroup 0.
pub fn distribute(threads: u32, groups: &[u32]) -> Result<Distribution, DistributionError> {
    if threads == 0 {
        return Err(DistributionError::ZeroThreads);
    }
    let overflow = || DistributionError::Overflow {
        threads,
        groups: groups.to_vec(),
    };
    let group_size = groups
        .iter()
        .try_fold(0u32, |acc, &g| acc.checked_add(g))
        .ok_or_else(overflow)?;
    if group_size == 0 {
        return Err(DistributionError::NoPositiveGroup(groups.to_vec()));
    }

    let group_count = threads.div_ceil(group_size);
    let effective_threads = group_count.checked_mul(group_size).ok_or_else(overflow)?;
    let subgroup_count = groups.len() as u32;

    let mut assignments = Vec::with_capacity(effective_threads as usize);
    for group_index in 0..group_count {
        let mut group_thread_index = 0;
        for (subgroup_index, &subgroup_size) in groups.iter().enumerate() {
            for subgroup_thread_index in 0..subgroup_size {
                assignments.push(ThreadAssignment {
                    thread_index: group_index * group_size + group_thread_index,
                    thread_count: effective_threads,
                    group_index,
                    group_count,
                    group_thread_index,
                    group_thread_count: group_size,
                    subgroup_index: subgroup_index as u32,
                    subgroup_count,
                    subgroup_thread_index,
                    subgroup_thread_count: subgroup_size,
                });
                group_thread_index += 1;
            }
        }
    }

    Ok(Distribution {
        effective_threads,
        group_count,
        assignments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn check_invariants(threads: u32, groups: &[u32]) {
        let d = distribute(threads, groups).unwrap();
        let group_size: u32 = groups.iter().sum();
        assert_eq!(d.effective_threads % group_size, 0);
        assert!(d.effective_threads >= threads);
        assert!(d.effective_threads < threads + group_size);

        // Every index appears exactly once, in order
        let indices: Vec<u32> = d.assignments.iter().map(|a| a.thread_index).collect();
        assert_eq!(indices, (0..d.effective_threads).collect::<Vec<_>>());

        let mut per_group: BTreeMap<u32, u32> = BTreeMap::new();
        let mut per_subgroup: BTreeMap<(u32, u32), u32> = BTreeMap::new();
        for a in &d.assignments {
            *per_group.entry(a.group_index).or_default() += 1;
            *per_subgroup.entry((a.group_index, a.subgroup_index)).or_default() += 1;
            assert!(a.subgroup_thread_index < a.subgroup_thread_count);
            assert!(a.group_thread_index < a.group_thread_count);
        }
        assert_eq!(per_group.values().sum::<u32>(), d.effective_threads);
        for (&group, &count) in &per_group {
            assert_eq!(count, group_size);
            let subgroups: u32 = per_subgroup
                .iter()
                .filter(|((g, _), _)| *g == group)
                .map(|(_, c)| *c)
                .sum();
            assert_eq!(subgroups, count);
        }
    }

    #[test]
    fn test_invariants_over_inputs() {
        let vectors: &[&[u32]] = &[&[1], &[2], &[3, 1], &[1, 1, 1], &[0, 1], &[0, 2, 3], &[4, 0, 1]];
        for groups in vectors {
            for threads in 1..=17 {
                check_invariants(threads, groups);
            }
        }
    }

    #[test]
    fn test_round_up() {
        let d = distribute(5, &[3, 1]).unwrap();
        assert_eq!(d.effective_threads, 8);
        assert_eq!(d.group_count, 2);
        assert!(d.was_rounded(5));
        assert!(!distribute(8, &[3, 1]).unwrap().was_rounded(8));
    }

    #[test]
    fn test_asymmetric_layout() {
        let d = distribute(8, &[3, 1]).unwrap();
        let a = &d.assignments;
        assert_eq!(a[2].group_index, 0);
        assert_eq!(a[2].subgroup_index, 0);
        assert_eq!(a[2].subgroup_thread_index, 2);
        assert_eq!(a[3].subgroup_index, 1);
        assert_eq!(a[3].subgroup_thread_count, 1);
        assert_eq!(a[4].group_index, 1);
        assert_eq!(a[4].group_thread_index, 0);
        assert_eq!(a[7].subgroup_index, 1);
    }

    #[test]
    fn test_leading_zero_reserves_subgroup() {
        let d = distribute(2, &[0, 1]).unwrap();
        assert_eq!(d.effective_threads, 2);
        for a in &d.assignments {
            assert_eq!(a.subgroup_index, 1);
            assert_eq!(a.subgroup_count, 2);
            assert_eq!(a.subgroup_thread_count, 1);
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(distribute(0, &[1]), Err(DistributionError::ZeroThreads));
        assert!(matches!(
            distribute(4, &[0, 0]),
            Err(DistributionError::NoPositiveGroup(_))
        ));
        assert!(distribute(4, &[]).is_err());
    }

    #[test]
    fn test_huge_inputs_report_overflow() {
        // Rounding u32::MAX up to a multiple of 2 needs 2^32 threads
        assert_eq!(
            distribute(u32::MAX, &[2]),
            Err(DistributionError::Overflow {
                threads: u32::MAX,
                groups: vec![2],
            })
        );
        // Group size itself exceeds u32
        assert!(matches!(
            distribute(1, &[u32::MAX, 1]),
            Err(DistributionError::Overflow { .. })
        ));
        let err = distribute(u32::MAX, &[2]).unwrap_err();
        assert!(err.to_string().contains("exceed the u32 thread index range"));
    }
}
