// src/dag/scheduler.rs

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info, warn};

use crate::dag::graph::TaskGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::task_info::{ScheduledTask, TaskRunInfo};
use crate::engine::{RetryBackoff, TaskOutcome};
use crate::model::TaskStatusUpdate;
use crate::types::{PipelineId, PipelineStatus, TaskId, TaskStatus};

/// Scheduler holds one run's task graph plus the mutable per-run state.
///
/// It is responsible for:
/// - releasing tasks whose dependencies completed
/// - marking tasks as running/succeeded/failed
/// - retrying failed tasks within their attempt budget
/// - deciding the pipeline outcome
///
/// It performs no IO; every change is reported through [`SchedulerStep`].
#[derive(Debug)]
pub struct Scheduler {
    pipeline_id: PipelineId,
    graph: TaskGraph,
    tasks: HashMap<TaskId, TaskRunInfo>,
    status: PipelineStatus,
    backoff: RetryBackoff,
    started: bool,
    /// Dispatched tasks whose outcome has not arrived yet.
    in_flight: usize,
    /// Failed tasks waiting for their retry timer.
    retries_pending: HashSet<TaskId>,
    succeeded: usize,
    /// Set once the run failed or was cancelled; nothing new is submitted.
    aborted: bool,
    finished: bool,
}

impl Scheduler {
    pub fn new(pipeline_id: PipelineId, graph: TaskGraph, backoff: RetryBackoff) -> Self {
        let tasks = graph
            .tasks()
            .map(|t| (t.id.clone(), TaskRunInfo::from_task(t)))
            .collect();

        Self {
            pipeline_id,
            graph,
            tasks,
            status: PipelineStatus::Queued,
            backoff,
            started: false,
            in_flight: 0,
            retries_pending: HashSet::new(),
            succeeded: 0,
            aborted: false,
            finished: false,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    /// True once the run concluded and no task is in flight.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn task_count(&self) -> usize {
        self.graph.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Number of `mark_done` calls made on the graph so far.
    pub fn completed_count(&self) -> usize {
        self.graph.completed_count()
    }

    pub fn task_status(&self, task: &str) -> Option<TaskStatus> {
        self.tasks.get(task).map(|info| info.status)
    }

    pub fn task_info(&self, task: &str) -> Option<&TaskRunInfo> {
        self.tasks.get(task)
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Begin the run: reset every task to pending, move the pipeline to
    /// running and schedule the initially ready tasks.
    pub fn start(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.started {
            warn!(pipeline = %self.pipeline_id, "scheduler already started; ignoring");
            return step;
        }
        self.started = true;

        let ids: Vec<TaskId> = self.graph.tasks().map(|t| t.id.clone()).collect();
        for id in ids {
            if let Some(info) = self.tasks.get(&id) {
                step.task_updates.push(update_for(&id, info));
            }
        }

        self.set_status(PipelineStatus::Running, &mut step);
        info!(
            pipeline = %self.pipeline_id,
            tasks = self.graph.len(),
            edges = self.graph.edge_count(),
            "scheduler: starting pipeline run"
        );

        if self.graph.is_empty() {
            self.set_status(PipelineStatus::Succeeded, &mut step);
        } else {
            self.schedule_ready(&mut step);
        }

        self.check_finished(&mut step);
        step
    }

    /// Handle the outcome of one dispatched attempt.
    pub fn handle_completion(&mut self, task: &str, outcome: TaskOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        match self.tasks.get(task).map(|info| info.status) {
            Some(TaskStatus::Running) => {}
            Some(other) => {
                self.abort(
                    format!("completion for task '{task}' in state {other}"),
                    &mut step,
                );
                return step;
            }
            None => {
                self.abort(format!("completion for unknown task '{task}'"), &mut step);
                return step;
            }
        }
        self.in_flight = self.in_flight.saturating_sub(1);

        match outcome {
            TaskOutcome::Succeeded => self.on_success(task, &mut step),
            TaskOutcome::Cancelled => {
                self.record_failure(task, "cancelled".to_string(), &mut step);
            }
            TaskOutcome::Failed(_) | TaskOutcome::TimedOut(_) => {
                let message = outcome.error_message().unwrap_or_default();
                self.on_failure(task, message, &mut step);
            }
        }

        self.check_finished(&mut step);
        step
    }

    /// A retry timer for `task` fired.
    pub fn handle_retry_due(&mut self, task: &str) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if !self.retries_pending.remove(task) {
            warn!(pipeline = %self.pipeline_id, task = %task, "retry for task with no pending retry; ignoring");
            return step;
        }

        if self.aborted {
            debug!(pipeline = %self.pipeline_id, task = %task, "run aborted; dropping retry");
        } else {
            self.dispatch(task, &mut step);
            if self.retries_pending.is_empty() && self.status == PipelineStatus::Retrying {
                self.set_status(PipelineStatus::Running, &mut step);
            }
        }

        self.check_finished(&mut step);
        step
    }

    /// The pool refused a dispatched task. The task fails without retry and
    /// the run is aborted.
    pub fn handle_submit_rejected(&mut self, task: &str, reason: &str) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if self.task_status(task) == Some(TaskStatus::Running) {
            self.in_flight = self.in_flight.saturating_sub(1);
            self.record_failure(task, reason.to_string(), &mut step);
        }
        self.abort(format!("task '{task}' could not be submitted: {reason}"), &mut step);
        step
    }

    /// Stop the run from outside: no new submissions, in-flight tasks are
    /// signalled, the run ends once they drain.
    pub fn cancel(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.finished {
            return step;
        }

        if !self.aborted {
            info!(pipeline = %self.pipeline_id, in_flight = self.in_flight, "scheduler: cancelling run");
            self.aborted = true;
            self.set_status(PipelineStatus::Cancelled, &mut step);
        }
        step.cancel_in_flight = true;

        self.check_finished(&mut step);
        step
    }

    fn on_success(&mut self, task: &str, step: &mut SchedulerStep) {
        if let Some(info) = self.tasks.get_mut(task) {
            info.status = TaskStatus::Succeeded;
            info.last_error = None;
            step.task_updates.push(update_for(task, info));
        }
        self.succeeded += 1;
        debug!(pipeline = %self.pipeline_id, task = %task, "task succeeded");

        let newly_ready: Vec<TaskId> = match self.graph.mark_done(task) {
            Ok(ready) => ready.into_iter().map(|t| t.id.clone()).collect(),
            Err(e) => {
                self.abort(e.to_string(), step);
                return;
            }
        };

        if self.aborted {
            return;
        }

        if self.succeeded == self.graph.len() {
            info!(pipeline = %self.pipeline_id, "scheduler: all tasks succeeded");
            self.set_status(PipelineStatus::Succeeded, step);
            return;
        }

        for id in newly_ready {
            self.start_task(&id, step);
        }
    }

    fn on_failure(&mut self, task: &str, message: String, step: &mut SchedulerStep) {
        let Some(info) = self.tasks.get_mut(task) else {
            return;
        };
        info.status = TaskStatus::Failed;
        info.retry_count += 1;
        info.last_error = Some(message.clone());
        step.task_updates.push(update_for(task, info));

        if !self.aborted && info.has_retries_left() {
            let delay = self.backoff.delay_for(info.retry_count);
            info.status = TaskStatus::Pending;
            step.task_updates.push(update_for(task, info));

            warn!(
                pipeline = %self.pipeline_id,
                task = %task,
                attempt = info.attempts,
                retry_limit = info.retry_limit,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "task failed; scheduling retry"
            );

            self.retries_pending.insert(task.to_string());
            step.retries.push((task.to_string(), delay));
            if self.status == PipelineStatus::Running {
                self.set_status(PipelineStatus::Retrying, step);
            }
            return;
        }

        warn!(
            pipeline = %self.pipeline_id,
            task = %task,
            attempts = info.attempts,
            error = %message,
            "task failed permanently"
        );
        if !self.aborted {
            self.aborted = true;
            self.set_status(PipelineStatus::Error, step);
        }
    }

    /// Record a failure that is never retried (cancellation, rejection).
    fn record_failure(&mut self, task: &str, message: String, step: &mut SchedulerStep) {
        if let Some(info) = self.tasks.get_mut(task) {
            info.status = TaskStatus::Failed;
            info.last_error = Some(message);
            step.task_updates.push(update_for(task, info));
        }
    }

    /// Abort the run because of an internal problem. Other runs are unaffected.
    fn abort(&mut self, reason: String, step: &mut SchedulerStep) {
        error!(pipeline = %self.pipeline_id, reason = %reason, "aborting pipeline run");
        if !self.aborted {
            self.aborted = true;
            self.set_status(PipelineStatus::Error, step);
        } else if self.status != PipelineStatus::Error && self.status != PipelineStatus::Cancelled {
            self.set_status(PipelineStatus::Error, step);
        }
        step.cancel_in_flight = true;
        self.check_finished(step);
    }

    fn schedule_ready(&mut self, step: &mut SchedulerStep) {
        let ready: Vec<TaskId> = self.graph.ready_tasks().into_iter().map(|t| t.id.clone()).collect();
        for id in ready {
            self.start_task(&id, step);
        }
    }

    /// First dispatch of a task whose dependencies are done.
    fn start_task(&mut self, task: &str, step: &mut SchedulerStep) {
        if self.aborted {
            return;
        }
        if let Err(e) = self.graph.mark_started(task) {
            self.abort(e.to_string(), step);
            return;
        }
        self.dispatch(task, step);
    }

    fn dispatch(&mut self, task: &str, step: &mut SchedulerStep) {
        let Some(spec) = self.graph.task(task).cloned() else {
            self.abort(format!("dispatch of unknown task '{task}'"), step);
            return;
        };
        let Some(info) = self.tasks.get_mut(task) else {
            return;
        };

        info.status = TaskStatus::Running;
        info.attempts += 1;
        step.task_updates.push(update_for(task, info));
        self.in_flight += 1;

        debug!(
            pipeline = %self.pipeline_id,
            task = %task,
            attempt = info.attempts,
            "dependencies satisfied; dispatching task"
        );
        step.newly_scheduled
            .push(ScheduledTask::new(self.pipeline_id, spec, info.attempts));
    }

    fn set_status(&mut self, status: PipelineStatus, step: &mut SchedulerStep) {
        if self.status != status {
            debug!(pipeline = %self.pipeline_id, from = %self.status, to = %status, "pipeline status change");
            self.status = status;
            step.pipeline_updates.push(status);
        }
    }

    fn check_finished(&mut self, step: &mut SchedulerStep) {
        if self.finished {
            return;
        }

        if self.status == PipelineStatus::Succeeded || (self.aborted && self.in_flight == 0) {
            self.finished = true;
            step.run_finished = true;
            info!(pipeline = %self.pipeline_id, status = %self.status, "scheduler: run finished");
            return;
        }

        // Nothing running, nothing waiting, yet not done: readiness accounting
        // is broken for this run.
        if !self.aborted
            && self.started
            && self.in_flight == 0
            && self.retries_pending.is_empty()
            && self.succeeded < self.graph.len()
        {
            self.abort(
                format!(
                    "run stalled with {} of {} tasks succeeded",
                    self.succeeded,
                    self.graph.len()
                ),
                step,
            );
        }
    }
}

fn update_for(task: &str, info: &TaskRunInfo) -> TaskStatusUpdate {
    TaskStatusUpdate {
        task: task.to_string(),
        status: info.status,
        error: info.last_error.clone(),
        retry_count: info.retry_count,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::{ActivityKind, Task};

    fn task(id: &str, deps: &[&str], retry_limit: u32) -> Task {
        Task {
            id: id.to_string(),
            name: id.to_string(),
            activity: ActivityKind::run_script(),
            config: Default::default(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            status: TaskStatus::Pending,
            last_error: None,
            timeout: Duration::from_secs(1),
            retry_count: 0,
            retry_limit,
        }
    }

    fn scheduler(tasks: Vec<Task>) -> Scheduler {
        let graph = TaskGraph::build(tasks).unwrap();
        Scheduler::new(PipelineId::new(), graph, RetryBackoff::default())
    }

    fn names(step: &SchedulerStep) -> Vec<String> {
        let mut out: Vec<String> = step.newly_scheduled.iter().map(|t| t.task.id.clone()).collect();
        out.sort();
        out
    }

    #[test]
    fn fan_out_after_root_succeeds() {
        let mut s = scheduler(vec![task("A", &[], 1), task("B", &["A"], 1), task("C", &["A"], 1)]);

        let step = s.start();
        assert_eq!(names(&step), vec!["A"]);
        assert_eq!(step.pipeline_updates, vec![PipelineStatus::Running]);

        let step = s.handle_completion("A", TaskOutcome::Succeeded);
        assert_eq!(names(&step), vec!["B", "C"]);

        let step = s.handle_completion("B", TaskOutcome::Succeeded);
        assert!(step.newly_scheduled.is_empty());
        assert_eq!(s.status(), PipelineStatus::Running);

        let step = s.handle_completion("C", TaskOutcome::Succeeded);
        assert_eq!(step.pipeline_updates, vec![PipelineStatus::Succeeded]);
        assert!(step.run_finished);
        assert_eq!(s.completed_count(), 3);
    }

    #[test]
    fn failure_with_retries_left_goes_back_to_pending() {
        let mut s = scheduler(vec![task("A", &[], 2)]);
        s.start();

        let step = s.handle_completion("A", TaskOutcome::Failed("boom".into()));
        let statuses: Vec<TaskStatus> = step.task_updates.iter().map(|u| u.status).collect();
        assert_eq!(statuses, vec![TaskStatus::Failed, TaskStatus::Pending]);
        assert_eq!(step.pipeline_updates, vec![PipelineStatus::Retrying]);
        assert_eq!(step.retries.len(), 1);
        assert!(step.newly_scheduled.is_empty());

        let step = s.handle_retry_due("A");
        assert_eq!(names(&step), vec!["A"]);
        assert_eq!(step.newly_scheduled[0].attempt, 2);
        assert_eq!(step.pipeline_updates, vec![PipelineStatus::Running]);

        let step = s.handle_completion("A", TaskOutcome::Failed("boom".into()));
        assert!(step.retries.is_empty());
        assert_eq!(step.pipeline_updates, vec![PipelineStatus::Error]);
        assert!(step.run_finished);
        assert_eq!(s.task_info("A").unwrap().retry_count, 2);
    }

    #[test]
    fn permanent_failure_lets_running_siblings_finish() {
        let mut s = scheduler(vec![
            task("A", &[], 1),
            task("B", &[], 1),
            task("C", &["B"], 1),
        ]);
        s.start();

        let step = s.handle_completion("A", TaskOutcome::TimedOut(Duration::from_millis(5)));
        assert_eq!(step.pipeline_updates, vec![PipelineStatus::Error]);
        assert!(!step.run_finished);

        // B finishes after the abort: C must not be released.
        let step = s.handle_completion("B", TaskOutcome::Succeeded);
        assert!(step.newly_scheduled.is_empty());
        assert!(step.run_finished);
        assert_eq!(s.task_status("C"), Some(TaskStatus::Pending));
        assert_eq!(s.status(), PipelineStatus::Error);
    }

    #[test]
    fn cancel_waits_for_in_flight_tasks() {
        let mut s = scheduler(vec![task("A", &[], 1), task("B", &["A"], 1)]);
        s.start();

        let step = s.cancel();
        assert!(step.cancel_in_flight);
        assert_eq!(step.pipeline_updates, vec![PipelineStatus::Cancelled]);
        assert!(!step.run_finished);

        let step = s.handle_completion("A", TaskOutcome::Cancelled);
        assert!(step.run_finished);
        assert!(step.newly_scheduled.is_empty());
        assert_eq!(s.task_info("A").unwrap().last_error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn completion_for_unknown_task_aborts_run() {
        let mut s = scheduler(vec![task("A", &[], 1)]);
        s.start();

        let step = s.handle_completion("ghost", TaskOutcome::Succeeded);
        assert_eq!(step.pipeline_updates, vec![PipelineStatus::Error]);
        assert!(step.cancel_in_flight);
        assert!(!step.run_finished);

        let step = s.handle_completion("A", TaskOutcome::Succeeded);
        assert!(step.run_finished);
        assert_eq!(s.status(), PipelineStatus::Error);
    }

    #[test]
    fn retry_is_dropped_after_abort() {
        let mut s = scheduler(vec![task("A", &[], 3), task("B", &[], 1)]);
        s.start();

        s.handle_completion("A", TaskOutcome::Failed("flaky".into()));
        let step = s.handle_completion("B", TaskOutcome::Failed("hard".into()));
        assert!(step.pipeline_updates.contains(&PipelineStatus::Error));
        assert!(step.run_finished);

        let step = s.handle_retry_due("A");
        assert!(step.newly_scheduled.is_empty());
    }
}
