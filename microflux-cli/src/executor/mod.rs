//! Benchmark Executor
//!
//! Runs the execution plan and renders its lifecycle.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ExecutionPlan (from the planner)
//!       │
//!       ▼
//! ┌─────────────┐
//! │  execution  │  In-process or one child per fork
//! └──────┬──────┘
//!        │  OutputSink callbacks
//!        ▼
//! ┌─────────────┐
//! │ formatting  │  Iteration lines, score summaries, final table
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`execution`] - Executors, outcomes and the plan driver
//! - [`formatting`] - Human-readable output sink

mod execution;
mod formatting;

pub use execution::{
    BenchmarkOutcome, ExecutionConfig, Executor, IsolatedExecutor, execute_plan, progress_bar,
};
pub use formatting::{
    HumanSink, format_benchmark_header, format_duration, format_results, format_summary_table,
};
