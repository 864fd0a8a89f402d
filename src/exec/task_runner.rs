// src/exec/task_runner.rs

//! Runs one attempt of a task: activity lookup, timeout, cancellation and
//! panic isolation.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::TaskOutcome;
use crate::exec::activity::{ActivityContext, ActivityRegistry};
use crate::exec::cancelled;

#[derive(Debug, Clone)]
pub struct TaskRunner {
    registry: Arc<ActivityRegistry>,
}

impl TaskRunner {
    pub fn new(registry: Arc<ActivityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActivityRegistry {
        &self.registry
    }

    /// Execute one attempt and report how it ended.
    ///
    /// The activity runs on its own tokio task. On timeout or when `cancel`
    /// flips to `true` that task is aborted, which drops the activity future
    /// (and with it any child process or open file).
    pub async fn run(&self, scheduled: &ScheduledTask, mut cancel: watch::Receiver<bool>) -> TaskOutcome {
        let task = &scheduled.task;

        let Some(activity) = self.registry.get(&task.activity) else {
            warn!(
                pipeline = %scheduled.pipeline_id,
                task = %task.id,
                activity = %task.activity,
                "no activity registered for kind"
            );
            return TaskOutcome::Failed(format!("unknown activity '{}'", task.activity));
        };

        if *cancel.borrow() {
            debug!(pipeline = %scheduled.pipeline_id, task = %task.id, "run cancelled before start");
            return TaskOutcome::Cancelled;
        }

        let ctx = ActivityContext {
            pipeline_id: scheduled.pipeline_id,
            task_id: task.id.clone(),
            attempt: scheduled.attempt,
        };
        let config = task.config.clone();
        let limit = task.timeout;

        debug!(
            pipeline = %scheduled.pipeline_id,
            task = %task.id,
            attempt = scheduled.attempt,
            timeout_ms = limit.as_millis() as u64,
            "running task"
        );

        let started = Instant::now();
        let mut handle = tokio::spawn(async move { activity.execute(&ctx, &config).await });

        let outcome = tokio::select! {
            res = tokio::time::timeout(limit, &mut handle) => match res {
                Ok(Ok(Ok(()))) => TaskOutcome::Succeeded,
                Ok(Ok(Err(e))) => TaskOutcome::Failed(e.to_string()),
                Ok(Err(join_err)) => TaskOutcome::Failed(join_failure(join_err)),
                Err(_) => TaskOutcome::TimedOut(limit),
            },
            _ = cancelled(&mut cancel) => TaskOutcome::Cancelled,
        };

        if matches!(outcome, TaskOutcome::TimedOut(_) | TaskOutcome::Cancelled) {
            handle.abort();
            // Resolves once the activity future has been dropped.
            let _ = handle.await;
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            TaskOutcome::Succeeded => {
                info!(pipeline = %scheduled.pipeline_id, task = %task.id, elapsed_ms, "task attempt succeeded");
            }
            other => {
                warn!(
                    pipeline = %scheduled.pipeline_id,
                    task = %task.id,
                    attempt = scheduled.attempt,
                    elapsed_ms,
                    error = %other.error_message().unwrap_or_default(),
                    "task attempt did not succeed"
                );
            }
        }
        outcome
    }
}

fn join_failure(err: JoinError) -> String {
    if err.is_panic() {
        format!("activity panicked: {}", panic_message(err.into_panic()))
    } else {
        "activity task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
