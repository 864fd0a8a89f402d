// src/store/mod.rs

//! Persistence seam.
//!
//! The engine never talks to a database directly; it goes through
//! [`PipelineStore`]. Implementations must make the version
//! compare-and-increment in `update_pipeline` atomic.
//!
//! - [`memory`] provides `InMemoryStore`, used by the CLI and the tests.

use crate::errors::Result;
use crate::model::{Pipeline, PipelineChanges, TaskStatusUpdate};
use crate::types::{BoxFuture, PipelineId, PipelineStatus};

pub mod memory;

pub use memory::InMemoryStore;

/// Storage for pipelines and their run state.
///
/// Object safe so the service can hold an `Arc<dyn PipelineStore>`.
pub trait PipelineStore: Send + Sync {
    fn create_pipeline(&self, pipeline: Pipeline) -> BoxFuture<'_, Result<()>>;

    /// `NotFound` when no pipeline has this id.
    fn load_pipeline(&self, id: PipelineId) -> BoxFuture<'_, Result<Pipeline>>;

    /// Persist one task transition. Does not bump the version.
    fn save_task_status(
        &self,
        id: PipelineId,
        update: TaskStatusUpdate,
    ) -> BoxFuture<'_, Result<()>>;

    /// Persist a pipeline status transition. Does not bump the version.
    fn save_pipeline_status(
        &self,
        id: PipelineId,
        status: PipelineStatus,
    ) -> BoxFuture<'_, Result<()>>;

    /// Apply `changes` only if the stored version equals `expected_version`.
    ///
    /// On success the version is incremented by one and the new record is
    /// returned. A stale version yields `VersionConflict` and leaves the
    /// stored record untouched.
    fn update_pipeline(
        &self,
        id: PipelineId,
        changes: PipelineChanges,
        expected_version: u64,
    ) -> BoxFuture<'_, Result<Pipeline>>;

    fn delete_pipeline(&self, id: PipelineId) -> BoxFuture<'_, Result<()>>;
}
