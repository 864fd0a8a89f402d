// src/engine/core.rs

//! Pure core of a pipeline run.
//!
//! `RunCore` consumes [`RunEvent`]s and produces:
//! - an updated scheduler state
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::RunDriver`) is responsible for:
//! - reading events from channels
//! - submitting `ScheduledTask`s to the worker pool
//! - persisting status changes
//! - arming retry timers and signalling cancellation
//!
//! The core is unit tested without any Tokio, channels, store or pool.

use std::time::Duration;

use crate::dag::{ScheduledTask, Scheduler, SchedulerStep};
use crate::engine::RunEvent;
use crate::model::TaskStatusUpdate;
use crate::types::{PipelineStatus, TaskId};

/// Command produced by the core, executed in order by the IO shell.
#[derive(Debug, Clone)]
pub enum RunCommand {
    SaveTaskStatus(TaskStatusUpdate),
    SavePipelineStatus(PipelineStatus),
    /// Hand this task to the worker pool.
    Submit(ScheduledTask),
    /// Send `RetryDue` for this task after the delay.
    ScheduleRetry { task: TaskId, delay: Duration },
    /// Tell every in-flight attempt to stop.
    CancelInFlight,
    /// The run is over with this final status.
    Finish(PipelineStatus),
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<RunCommand>,
    /// Whether the event loop should keep running.
    pub keep_running: bool,
}

/// Pure run state: the scheduler and nothing else.
#[derive(Debug)]
pub struct RunCore {
    scheduler: Scheduler,
}

impl RunCore {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn status(&self) -> PipelineStatus {
        self.scheduler.status()
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Start the run.
    pub fn start(&mut self) -> CoreStep {
        let step = self.scheduler.start();
        self.commands_for(step)
    }

    /// Handle a single event, returning the commands for the IO shell.
    pub fn step(&mut self, event: RunEvent) -> CoreStep {
        let step = match event {
            RunEvent::TaskFinished { task, outcome } => {
                self.scheduler.handle_completion(&task, outcome)
            }
            RunEvent::RetryDue { task } => self.scheduler.handle_retry_due(&task),
            RunEvent::SubmitRejected { task, reason } => {
                self.scheduler.handle_submit_rejected(&task, &reason)
            }
            RunEvent::CancelRequested => self.scheduler.cancel(),
        };
        self.commands_for(step)
    }

    /// Order matters: statuses are persisted before the work they describe
    /// is started, and `Finish` always comes last.
    fn commands_for(&self, step: SchedulerStep) -> CoreStep {
        let mut commands = Vec::new();

        if step.cancel_in_flight {
            commands.push(RunCommand::CancelInFlight);
        }
        commands.extend(step.task_updates.into_iter().map(RunCommand::SaveTaskStatus));
        commands.extend(
            step.pipeline_updates
                .into_iter()
                .map(RunCommand::SavePipelineStatus),
        );
        commands.extend(
            step.retries
                .into_iter()
                .map(|(task, delay)| RunCommand::ScheduleRetry { task, delay }),
        );
        commands.extend(step.newly_scheduled.into_iter().map(RunCommand::Submit));

        if step.run_finished {
            commands.push(RunCommand::Finish(self.scheduler.status()));
        }

        CoreStep {
            commands,
            keep_running: !step.run_finished,
        }
    }
}
