// src/dag/mod.rs

//! Task graph representation and per-run scheduling.
//!
//! - [`graph`] holds the arena-backed DAG with in-degree counters.
//! - [`scheduler`] contains the per-run state machine that decides
//!   which tasks are ready to run, retries failures and settles the
//!   pipeline outcome.
//! - [`task_info`] provides per-run task state and scheduled task types.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod task_info;

pub use graph::TaskGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task_info::{ScheduledTask, TaskRunInfo};
