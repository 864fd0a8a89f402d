// src/dag/task_info.rs

//! Per-run task state and the description of a task handed to the pool.

use crate::model::Task;
use crate::types::{PipelineId, TaskStatus};

/// Mutable per-run state for one task (internal to the scheduler).
#[derive(Debug, Clone)]
pub struct TaskRunInfo {
    pub status: TaskStatus,
    /// Failed attempts so far in this run.
    pub retry_count: u32,
    /// Maximum attempts for this run.
    pub retry_limit: u32,
    pub last_error: Option<String>,
    /// Attempts dispatched so far.
    pub attempts: u32,
}

impl TaskRunInfo {
    pub fn from_task(task: &Task) -> Self {
        Self {
            status: TaskStatus::Pending,
            retry_count: 0,
            retry_limit: task.retry_limit,
            last_error: None,
            attempts: 0,
        }
    }

    /// Whether another attempt is allowed after the latest failure.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.retry_limit
    }
}

/// A task the scheduler wants executed now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub pipeline_id: PipelineId,
    pub task: Task,
    /// 1-based attempt number within the run.
    pub attempt: u32,
}

impl ScheduledTask {
    pub fn new(pipeline_id: PipelineId, task: Task, attempt: u32) -> Self {
        Self {
            pipeline_id,
            task,
            attempt,
        }
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }
}
