// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::types::{PipelineId, TaskId};

#[derive(Error, Debug)]
pub enum HakuError {
    /// Malformed pipeline or task definition. Always fixable by the caller.
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cycle detected in task graph involving task '{0}'")]
    CycleDetected(TaskId),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    DanglingDependency { task: TaskId, dependency: TaskId },

    /// Optimistic concurrency check failed; re-read and retry.
    #[error("Version conflict on pipeline {pipeline}: expected {expected}, stored {actual}")]
    VersionConflict {
        pipeline: PipelineId,
        expected: u64,
        actual: u64,
    },

    #[error("Pipeline not found: {0}")]
    NotFound(PipelineId),

    #[error("Pipeline {0} already has an active run")]
    AlreadyRunning(PipelineId),

    #[error("Pipeline {0} has no active run")]
    NotRunning(PipelineId),

    #[error("Worker pool is closed")]
    PoolClosed,

    /// Internal logic error. Aborts the affected run only.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, HakuError>;
