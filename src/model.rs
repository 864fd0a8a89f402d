// src/model.rs

//! Pipeline and task records, definitions used to create them, and the
//! update/report shapes exchanged with the store and callers.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Owner, PipelineId, PipelineStatus, TaskId, TaskStatus};

/// Discriminates which [`Activity`](crate::exec::Activity) a task runs.
///
/// Kept open (a string newtype) so new kinds only need a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityKind(String);

impl ActivityKind {
    pub const COPY_FILE: &'static str = "copy-file";
    pub const SEND_EMAIL: &'static str = "send-email";
    pub const RUN_SCRIPT: &'static str = "run-script";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn copy_file() -> Self {
        Self::new(Self::COPY_FILE)
    }

    pub fn send_email() -> Self {
        Self::new(Self::SEND_EMAIL)
    }

    pub fn run_script() -> Self {
        Self::new(Self::RUN_SCRIPT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActivityKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

/// Activity parameters, e.g. `source`/`destination` for `copy-file`.
pub type ActivityConfig = BTreeMap<String, String>;

/// A task as stored alongside its pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub activity: ActivityKind,
    #[serde(default)]
    pub config: ActivityConfig,
    /// Prerequisite tasks, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    pub status: TaskStatus,
    pub last_error: Option<String>,
    pub timeout: Duration,
    /// Failed attempts in the current (or last) run.
    pub retry_count: u32,
    /// Maximum number of attempts per run.
    pub retry_limit: u32,
}

/// A pipeline record together with its tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub owner: Owner,
    pub name: String,
    pub description: Option<String>,
    pub status: PipelineStatus,
    /// Optimistic concurrency counter; starts at 1, +1 per successful update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
}

impl Pipeline {
    /// Materialize a fresh pipeline from an already validated definition.
    pub fn from_definition(owner: Owner, def: PipelineDefinition, defaults: &TaskDefaults) -> Self {
        let now = Utc::now();
        Self {
            id: PipelineId::new(),
            owner,
            name: def.name,
            description: def.description,
            status: PipelineStatus::Created,
            version: 1,
            created_at: now,
            updated_at: now,
            tasks: def
                .tasks
                .into_iter()
                .map(|t| t.into_task(defaults))
                .collect(),
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// Fallback values for task fields a definition leaves out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDefaults {
    pub timeout: Duration,
    pub retry_limit: u32,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_limit: 1,
        }
    }
}

/// What a caller submits to create a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    /// Display name; the id is used when absent.
    #[serde(default)]
    pub name: Option<String>,
    pub activity: ActivityKind,
    #[serde(default)]
    pub config: ActivityConfig,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retry_limit: Option<u32>,
}

impl TaskDefinition {
    pub fn into_task(self, defaults: &TaskDefaults) -> Task {
        let name = self.name.unwrap_or_else(|| self.id.clone());
        Task {
            id: self.id,
            name,
            activity: self.activity,
            config: self.config,
            dependencies: self.dependencies,
            status: TaskStatus::Pending,
            last_error: None,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            retry_count: 0,
            retry_limit: self.retry_limit.unwrap_or(defaults.retry_limit),
        }
    }
}

/// Field changes requested by a caller. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Replaces the whole task set.
    pub tasks: Option<Vec<TaskDefinition>>,
}

impl PipelineUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.tasks.is_none()
    }

    /// Fill in task defaults, producing what the store applies.
    pub fn resolve(self, defaults: &TaskDefaults) -> PipelineChanges {
        PipelineChanges {
            name: self.name,
            description: self.description,
            tasks: self
                .tasks
                .map(|tasks| tasks.into_iter().map(|t| t.into_task(defaults)).collect()),
        }
    }
}

/// A validated update as written by [`PipelineStore::update_pipeline`].
///
/// [`PipelineStore::update_pipeline`]: crate::store::PipelineStore::update_pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tasks: Option<Vec<Task>>,
}

impl PipelineChanges {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// One task status write made by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusUpdate {
    pub task: TaskId,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub retry_count: u32,
}

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatusReport {
    pub pipeline: PipelineId,
    pub name: String,
    pub status: PipelineStatus,
    pub version: u64,
    pub tasks: Vec<TaskStatusReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatusReport {
    pub id: TaskId,
    pub status: TaskStatus,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

impl From<&Pipeline> for PipelineStatusReport {
    fn from(p: &Pipeline) -> Self {
        Self {
            pipeline: p.id,
            name: p.name.clone(),
            status: p.status,
            version: p.version,
            tasks: p
                .tasks
                .iter()
                .map(|t| TaskStatusReport {
                    id: t.id.clone(),
                    status: t.status,
                    last_error: t.last_error.clone(),
                    retry_count: t.retry_count,
                })
                .collect(),
        }
    }
}

impl PipelineStatusReport {
    pub fn task(&self, id: &str) -> Option<&TaskStatusReport> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str) -> TaskDefinition {
        TaskDefinition {
            id: id.to_string(),
            name: None,
            activity: ActivityKind::run_script(),
            config: ActivityConfig::new(),
            dependencies: Vec::new(),
            timeout: None,
            retry_limit: None,
        }
    }

    #[test]
    fn task_defaults_fill_missing_fields() {
        let defaults = TaskDefaults {
            timeout: Duration::from_secs(7),
            retry_limit: 3,
        };
        let mut explicit = definition("b");
        explicit.timeout = Some(Duration::from_millis(250));
        explicit.retry_limit = Some(1);

        let a = definition("a").into_task(&defaults);
        let b = explicit.into_task(&defaults);

        assert_eq!(a.name, "a");
        assert_eq!((a.timeout, a.retry_limit), (Duration::from_secs(7), 3));
        assert_eq!((b.timeout, b.retry_limit), (Duration::from_millis(250), 1));
        assert_eq!(a.status, TaskStatus::Pending);
    }

    #[test]
    fn update_resolves_task_definitions() {
        assert!(PipelineUpdate::default().is_empty());
        assert!(!PipelineUpdate::rename("x").is_empty());

        let update = PipelineUpdate {
            tasks: Some(vec![definition("a")]),
            ..PipelineUpdate::default()
        };
        let changes = update.resolve(&TaskDefaults::default());
        let tasks = changes.tasks.unwrap();
        assert_eq!(changes.name, None);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].timeout, Duration::from_secs(30));
    }
}
