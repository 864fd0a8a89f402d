// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::exec::{cancelled, TaskRunner, WorkerPool};
use crate::store::PipelineStore;
use crate::types::{PipelineId, PipelineStatus};

use super::core::{RunCommand, RunCore};
use super::{RunEvent, TaskOutcome};

/// Drives one pipeline run.
///
/// This is the IO shell around `RunCore`, which contains all the run
/// semantics. The driver owns the core for the lifetime of the run, so every
/// graph mutation happens on this single task. It:
/// - submits scheduled tasks to the shared worker pool
/// - persists every status transition through the store
/// - arms retry timers
/// - forwards external cancellation and signals in-flight attempts
pub struct RunDriver {
    core: RunCore,
    pipeline_id: PipelineId,
    events_tx: mpsc::UnboundedSender<RunEvent>,
    events_rx: mpsc::UnboundedReceiver<RunEvent>,
    /// External cancellation request (from the service).
    cancel_rx: watch::Receiver<bool>,
    cancel_seen: bool,
    /// Observed by every runner of this run.
    abort_tx: watch::Sender<bool>,
    /// Events produced while executing commands, handled before new ones.
    backlog: VecDeque<RunEvent>,
    /// Armed retry timers; aborted when the driver is dropped.
    retry_timers: JoinSet<()>,
    pool: Arc<WorkerPool>,
    runner: Arc<TaskRunner>,
    store: Arc<dyn PipelineStore>,
}

impl fmt::Debug for RunDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunDriver")
            .field("pipeline_id", &self.pipeline_id)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl RunDriver {
    pub fn new(
        pipeline_id: PipelineId,
        core: RunCore,
        cancel_rx: watch::Receiver<bool>,
        pool: Arc<WorkerPool>,
        runner: Arc<TaskRunner>,
        store: Arc<dyn PipelineStore>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (abort_tx, _) = watch::channel(false);
        Self {
            core,
            pipeline_id,
            events_tx,
            events_rx,
            cancel_rx,
            cancel_seen: false,
            abort_tx,
            backlog: VecDeque::new(),
            retry_timers: JoinSet::new(),
            pool,
            runner,
            store,
        }
    }

    /// Main event loop. Returns the run's final pipeline status.
    ///
    /// - Starts the core and executes its initial commands.
    /// - Consumes completions, retry timers and cancellation.
    /// - Stops once the core reports the run finished (nothing in flight).
    pub async fn run(mut self) -> PipelineStatus {
        info!(pipeline = %self.pipeline_id, "pipeline run started");

        let mut step = self.core.start();
        loop {
            for command in step.commands {
                self.execute_command(command).await;
            }

            if !step.keep_running {
                break;
            }

            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => self.next_event().await,
            };
            debug!(pipeline = %self.pipeline_id, ?event, "run received event");
            step = self.core.step(event);
        }

        self.retry_timers.abort_all();
        let status = self.core.status();
        info!(pipeline = %self.pipeline_id, status = %status, "pipeline run finished");
        status
    }

    async fn next_event(&mut self) -> RunEvent {
        if self.cancel_seen {
            return self.recv().await;
        }

        tokio::select! {
            event = self.events_rx.recv() => event.unwrap_or(RunEvent::CancelRequested),
            _ = cancelled(&mut self.cancel_rx) => {
                self.cancel_seen = true;
                RunEvent::CancelRequested
            }
        }
    }

    async fn recv(&mut self) -> RunEvent {
        // The driver holds a sender, so the channel never closes while it runs.
        self.events_rx
            .recv()
            .await
            .unwrap_or(RunEvent::CancelRequested)
    }

    async fn execute_command(&mut self, command: RunCommand) {
        match command {
            RunCommand::SaveTaskStatus(update) => {
                let task = update.task.clone();
                let status = update.status;
                if let Err(e) = self.store.save_task_status(self.pipeline_id, update).await {
                    warn!(pipeline = %self.pipeline_id, task = %task, status = %status, error = %e, "failed to persist task status");
                }
            }
            RunCommand::SavePipelineStatus(status) => {
                if let Err(e) = self.store.save_pipeline_status(self.pipeline_id, status).await {
                    warn!(pipeline = %self.pipeline_id, status = %status, error = %e, "failed to persist pipeline status");
                }
            }
            RunCommand::Submit(task) => self.submit(task).await,
            RunCommand::ScheduleRetry { task, delay } => {
                debug!(pipeline = %self.pipeline_id, task = %task, delay_ms = delay.as_millis() as u64, "arming retry timer");
                while self.retry_timers.try_join_next().is_some() {}
                let tx = self.events_tx.clone();
                self.retry_timers.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(RunEvent::RetryDue { task });
                });
            }
            RunCommand::CancelInFlight => {
                debug!(pipeline = %self.pipeline_id, "signalling in-flight tasks to stop");
                self.abort_tx.send_replace(true);
            }
            RunCommand::Finish(status) => {
                debug!(pipeline = %self.pipeline_id, status = %status, "core finished run");
            }
        }
    }

    /// Hand a task to the pool, waiting for a slot if needed.
    ///
    /// A cancellation that arrives while waiting is queued ahead of the
    /// task's own `Cancelled` completion so the core sees the cancel first.
    async fn submit(&mut self, task: ScheduledTask) {
        let id = task.id().to_string();

        if self.cancel_seen || *self.abort_tx.borrow() {
            self.backlog.push_back(RunEvent::TaskFinished {
                task: id,
                outcome: TaskOutcome::Cancelled,
            });
            return;
        }

        let runner = Arc::clone(&self.runner);
        let events = self.events_tx.clone();
        let abort_rx = self.abort_tx.subscribe();
        let job = async move {
            let id = task.id().to_string();
            let outcome = runner.run(&task, abort_rx).await;
            let _ = events.send(RunEvent::TaskFinished { task: id, outcome });
        };

        tokio::select! {
            res = self.pool.submit(job) => {
                if let Err(e) = res {
                    warn!(pipeline = %self.pipeline_id, task = %id, error = %e, "pool rejected task");
                    self.backlog.push_back(RunEvent::SubmitRejected {
                        task: id,
                        reason: e.to_string(),
                    });
                }
            }
            _ = cancelled(&mut self.cancel_rx) => {
                info!(pipeline = %self.pipeline_id, task = %id, "cancelled while waiting for a worker slot");
                self.cancel_seen = true;
                self.backlog.push_back(RunEvent::CancelRequested);
                self.backlog.push_back(RunEvent::TaskFinished {
                    task: id,
                    outcome: TaskOutcome::Cancelled,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dag::{Scheduler, TaskGraph};
    use crate::engine::RetryBackoff;
    use crate::exec::ActivityRegistry;
    use crate::store::InMemoryStore;

    fn driver() -> RunDriver {
        let id = PipelineId::new();
        let graph = TaskGraph::build(Vec::new()).unwrap();
        let core = RunCore::new(Scheduler::new(id, graph, RetryBackoff::default()));
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        RunDriver::new(
            id,
            core,
            cancel_rx,
            Arc::new(WorkerPool::new(1).unwrap()),
            Arc::new(TaskRunner::new(Arc::new(ActivityRegistry::new()))),
            Arc::new(InMemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn retry_timers_do_not_outlive_the_driver() {
        let mut driver = driver();
        let events = driver.events_tx.downgrade();

        driver
            .execute_command(RunCommand::ScheduleRetry {
                task: "A".into(),
                delay: Duration::from_secs(3600),
            })
            .await;
        assert_eq!(driver.retry_timers.len(), 1);

        drop(driver);
        // Aborted tasks are dropped on the runtime's next pass.
        for _ in 0..10 {
            if events.upgrade().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(events.upgrade().is_none());
    }

    #[tokio::test]
    async fn empty_run_succeeds_without_events() {
        let status = driver().run().await;
        assert_eq!(status, PipelineStatus::Succeeded);
    }
}
