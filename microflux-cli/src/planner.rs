//! Benchmark Planner
//!
//! Builds the execution plan: filters registered benchmarks by a regex on
//! their qualified name, resolves each descriptor through the override
//! tiers, and validates the result before anything runs.
//!
//! Ordering: benchmarks are sorted by qualified name for deterministic execution.

use microflux_core::{BenchmarkDef, DistributionError, Overrides, distribute};
use microflux_ipc::{BenchmarkDescriptor, DescriptorError};
use regex::Regex;
use thiserror::Error;

/// A configuration problem found before the run started
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("{benchmark}: {source}")]
    Descriptor {
        benchmark: String,
        source: DescriptorError,
    },

    #[error("{benchmark}: {source}")]
    Distribution {
        benchmark: String,
        source: DistributionError,
    },
}

/// One selected benchmark with its resolved descriptor
#[derive(Debug, Clone)]
pub struct PlannedBenchmark {
    /// Registration
    pub def: &'static BenchmarkDef,
    /// Descriptor after every override tier
    pub descriptor: BenchmarkDescriptor,
}

/// Execution plan for benchmarks
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Ordered list of benchmarks to run
    pub benchmarks: Vec<PlannedBenchmark>,
}

impl ExecutionPlan {
    /// Whether nothing was selected
    pub fn is_empty(&self) -> bool {
        self.benchmarks.is_empty()
    }

    /// Number of selected benchmarks
    pub fn len(&self) -> usize {
        self.benchmarks.len()
    }

    /// Reject descriptors that cannot run
    pub fn validate(&self) -> Result<(), PlanError> {
        for planned in &self.benchmarks {
            let d = &planned.descriptor;
            d.validate().map_err(|source| PlanError::Descriptor {
                benchmark: d.name.clone(),
                source,
            })?;
            distribute(d.threads, &d.thread_groups).map_err(|source| {
                PlanError::Distribution {
                    benchmark: d.name.clone(),
                    source,
                }
            })?;
        }
        Ok(())
    }
}

/// Build execution plan from discovered benchmarks
///
/// `run_options` are layered over each benchmark's declared options, lowest
/// precedence first.
pub fn build_plan(
    benchmarks: impl IntoIterator<Item = &'static BenchmarkDef>,
    filter: Option<&Regex>,
    run_options: &[Overrides<'_>],
) -> ExecutionPlan {
    let mut selected: Vec<_> = benchmarks
        .into_iter()
        .map(|def| (def.qualified_name(), def))
        .filter(|(name, _)| filter.map_or(true, |re| re.is_match(name)))
        .collect();

    selected.sort_by(|a, b| a.0.cmp(&b.0));

    ExecutionPlan {
        benchmarks: selected
            .into_iter()
            .map(|(_, def)| PlannedBenchmark {
                def,
                descriptor: def.descriptor(run_options),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microflux_core::{Payload, payload_fn};

    fn noop() -> Box<dyn Payload> {
        Box::new(payload_fn(|| 0u64))
    }

    static SUM: BenchmarkDef = BenchmarkDef {
        name: "sum",
        class: "math",
        class_options: Overrides {
            forks: Some(1),
            ..Overrides::NONE
        },
        options: Overrides::NONE,
        payload: noop,
    };

    static PRODUCT: BenchmarkDef = BenchmarkDef {
        name: "product",
        class: "math",
        class_options: Overrides::NONE,
        options: Overrides {
            threads: Some(2),
            ..Overrides::NONE
        },
        payload: noop,
    };

    static PARSE: BenchmarkDef = BenchmarkDef {
        name: "parse",
        class: "text",
        class_options: Overrides::NONE,
        options: Overrides::NONE,
        payload: noop,
    };

    fn all() -> Vec<&'static BenchmarkDef> {
        vec![&SUM, &PARSE, &PRODUCT]
    }

    fn names(plan: &ExecutionPlan) -> Vec<&str> {
        plan.benchmarks
            .iter()
            .map(|p| p.descriptor.name.as_str())
            .collect()
    }

    #[test]
    fn test_no_filter() {
        let plan = build_plan(all(), None, &[]);

        // Should be sorted by qualified name
        assert_eq!(names(&plan), vec!["math.product", "math.sum", "text.parse"]);
        assert_eq!(plan.benchmarks[0].descriptor.threads, 2);
        assert_eq!(plan.benchmarks[1].descriptor.forks, 1);
    }

    #[test]
    fn test_regex_filter() {
        let re = Regex::new(r"^math\.").unwrap();
        let plan = build_plan(all(), Some(&re), &[]);
        assert_eq!(names(&plan), vec!["math.product", "math.sum"]);

        let re = Regex::new("nothing").unwrap();
        assert!(build_plan(all(), Some(&re), &[]).is_empty());
    }

    #[test]
    fn test_run_options_take_precedence() {
        let run = Overrides {
            threads: Some(4),
            forks: Some(0),
            ..Overrides::NONE
        };
        let plan = build_plan(all(), None, &[run]);
        assert!(plan.benchmarks.iter().all(|p| p.descriptor.threads == 4));
        assert!(plan.benchmarks.iter().all(|p| p.descriptor.forks == 0));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_configuration() {
        let zero_iterations = Overrides {
            measurement_iterations: Some(0),
            ..Overrides::NONE
        };
        let plan = build_plan(all(), None, &[zero_iterations]);
        assert!(matches!(
            plan.validate(),
            Err(PlanError::Descriptor { .. })
        ));

        let groups = [0u32, 0];
        let all_zero = Overrides {
            thread_groups: Some(&groups),
            ..Overrides::NONE
        };
        let plan = build_plan(all(), None, &[all_zero]);
        assert!(plan.validate().is_err());
    }
}
