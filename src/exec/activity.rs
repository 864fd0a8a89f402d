// src/exec/activity.rs

//! Activity abstraction and registry.
//!
//! An activity is the unit of work a task performs. The scheduler and the
//! graph never look at activity kinds; only the task runner resolves a kind
//! to an implementation through the [`ActivityRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::errors::{HakuError, Result};
use crate::model::{ActivityConfig, ActivityKind, TaskDefinition};
use crate::types::{BoxFuture, PipelineId, TaskId};

/// Why an activity failed.
#[derive(Error, Debug)]
pub enum ActivityError {
    #[error("missing required config key '{0}'")]
    MissingConfig(String),

    #[error("invalid value for config key '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("process exited with status {0}")]
    ExitStatus(i32),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Where an activity runs, for logging and side-channel naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityContext {
    pub pipeline_id: PipelineId,
    pub task_id: TaskId,
    /// 1-based attempt number within the run.
    pub attempt: u32,
}

/// A kind of work a task can perform.
///
/// Implementations must be cancel safe: the runner drops the returned future
/// on timeout or cancellation.
pub trait Activity: Send + Sync {
    fn kind(&self) -> ActivityKind;

    /// Check the task configuration before anything runs.
    fn validate_config(&self, config: &ActivityConfig) -> std::result::Result<(), ActivityError>;

    fn execute<'a>(
        &'a self,
        ctx: &'a ActivityContext,
        config: &'a ActivityConfig,
    ) -> BoxFuture<'a, std::result::Result<(), ActivityError>>;
}

/// Look up a required, non-blank config value.
pub fn require<'a>(
    config: &'a ActivityConfig,
    key: &str,
) -> std::result::Result<&'a str, ActivityError> {
    match config.get(key).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ActivityError::MissingConfig(key.to_string())),
    }
}

/// Maps activity kinds to implementations. Populated at startup.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: HashMap<ActivityKind, Arc<dyn Activity>>,
}

impl fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `copy-file`, `send-email` (logging mailer) and
    /// `run-script`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(super::activities::CopyFile);
        registry.register(super::activities::SendEmail::default());
        registry.register(super::activities::RunScript);
        registry
    }

    /// Register an activity, replacing any previous one of the same kind.
    pub fn register<A: Activity + 'static>(&mut self, activity: A) {
        self.activities.insert(activity.kind(), Arc::new(activity));
    }

    pub fn get(&self, kind: &ActivityKind) -> Option<Arc<dyn Activity>> {
        self.activities.get(kind).cloned()
    }

    pub fn contains(&self, kind: &ActivityKind) -> bool {
        self.activities.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&ActivityKind> {
        let mut kinds: Vec<_> = self.activities.keys().collect();
        kinds.sort();
        kinds
    }

    /// Reject unknown kinds and configs the activity refuses.
    pub fn validate_task(&self, task: &TaskDefinition) -> Result<()> {
        let activity = self.get(&task.activity).ok_or_else(|| {
            HakuError::ValidationError(format!(
                "task '{}' uses unknown activity '{}'",
                task.id, task.activity
            ))
        })?;

        activity.validate_config(&task.config).map_err(|e| {
            HakuError::ValidationError(format!("task '{}' ({}): {e}", task.id, task.activity))
        })
    }
}
