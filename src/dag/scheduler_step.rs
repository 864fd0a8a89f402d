// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use std::time::Duration;

use crate::dag::task_info::ScheduledTask;
use crate::model::TaskStatusUpdate;
use crate::types::{PipelineStatus, TaskId};

/// Structured result of a single scheduler "step".
///
/// Everything a step changed, in the order it happened, so the caller can
/// persist transitions faithfully and then act on them.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Task status transitions, in order.
    pub task_updates: Vec<TaskStatusUpdate>,
    /// Pipeline status transitions, in order.
    pub pipeline_updates: Vec<PipelineStatus>,
    /// Tasks to submit to the worker pool.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Failed tasks to re-submit after the given delay.
    pub retries: Vec<(TaskId, Duration)>,
    /// In-flight tasks should be told to stop.
    pub cancel_in_flight: bool,
    /// The run has concluded and nothing is in flight anymore.
    pub run_finished: bool,
}
