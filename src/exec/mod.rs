// src/exec/mod.rs

//! Execution layer.
//!
//! This module is responsible for actually running the work a task
//! describes and for bounding how much of it runs at once.
//!
//! - [`activity`] defines the `Activity` trait and the `ActivityRegistry`.
//! - [`activities`] holds the built-in activities.
//! - [`task_runner`] runs one task attempt with timeout and cancellation.
//! - [`pool`] provides the semaphore-bounded `WorkerPool`.

use tokio::sync::watch;

pub mod activities;
pub mod activity;
pub mod pool;
pub mod task_runner;

pub use activity::{Activity, ActivityContext, ActivityError, ActivityRegistry};
pub use pool::WorkerPool;
pub use task_runner::TaskRunner;

/// Resolves once the flag is `true`. Never resolves if the sender is gone.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}
