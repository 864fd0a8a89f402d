// src/engine/mod.rs

//! Pipeline run orchestration.
//!
//! This module ties together:
//! - the per-run scheduler (`dag::Scheduler`)
//! - the worker pool and task runner
//! - the pipeline store, for persisting every status transition
//!
//! The pure core state machine lives in [`core`]; the async/IO shell that
//! owns a run's event loop is implemented in [`runtime`].

use std::time::Duration;

/// Result of one task attempt, as reported by the task runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    /// The activity returned an error or panicked.
    Failed(String),
    /// The activity did not finish within the task's timeout.
    TimedOut(Duration),
    /// The run was cancelled while the attempt was in flight.
    Cancelled,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }

    /// Human readable failure description, `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            TaskOutcome::Succeeded => None,
            TaskOutcome::Failed(msg) => Some(msg.clone()),
            TaskOutcome::TimedOut(after) => {
                Some(format!("timed out after {}ms", after.as_millis()))
            }
            TaskOutcome::Cancelled => Some("cancelled".to_string()),
        }
    }
}

/// Delay before re-submitting a failed task.
///
/// Exponential: the n-th retry waits `initial * 2^(n-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl RetryBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// No delay at all; handy for tests.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay for the `retry`-th retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5))
    }
}

/// Events flowing into a run's event loop.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A dispatched attempt finished.
    TaskFinished { task: String, outcome: TaskOutcome },
    /// A retry timer fired.
    RetryDue { task: String },
    /// The pool refused a submission (e.g. it is shutting down).
    SubmitRejected { task: String, reason: String },
    /// Cancellation requested from outside the run.
    CancelRequested,
}

pub mod core;
pub mod runtime;

pub use core::{CoreStep, RunCommand, RunCore};
pub use runtime::RunDriver;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let b = RetryBackoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(b.delay_for(1), Duration::from_millis(100));
        assert_eq!(b.delay_for(2), Duration::from_millis(200));
        assert_eq!(b.delay_for(3), Duration::from_millis(400));
        assert_eq!(b.delay_for(4), Duration::from_millis(500));
        assert_eq!(b.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(TaskOutcome::Succeeded.error_message(), None);
        assert_eq!(
            TaskOutcome::TimedOut(Duration::from_millis(20)).error_message(),
            Some("timed out after 20ms".to_string())
        );
    }
}
