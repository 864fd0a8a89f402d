// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::engine::RetryBackoff;
use crate::model::{PipelineDefinition, TaskDefaults};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [engine]
/// max_concurrency = 4
/// default_timeout = "30s"
///
/// [pipeline]
/// name = "nightly"
///
/// [task.copy]
/// activity = "copy-file"
/// config = { source = "in.txt", destination = "out.txt" }
///
/// [task.notify]
/// activity = "send-email"
/// after = ["copy"]
/// config = { to = "ops@example.com", subject = "done" }
/// ```
///
/// Deserialization only; [`ConfigFile`] is the validated form.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Engine tuning from `[engine]`.
    #[serde(default)]
    pub engine: EngineSection,

    /// Pipeline metadata from `[pipeline]`.
    pub pipeline: PipelineSection,

    /// All tasks from `[task.<id>]`, keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, RawTaskConfig>,
}

/// `[engine]` section. Durations are strings like `"250ms"` or `"30s"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_timeout")]
    pub default_timeout: String,

    #[serde(default = "default_retry_limit")]
    pub default_retry_limit: u32,

    #[serde(default = "default_backoff_initial")]
    pub retry_backoff_initial: String,

    #[serde(default = "default_backoff_max")]
    pub retry_backoff_max: String,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_timeout() -> String {
    "30s".to_string()
}

fn default_retry_limit() -> u32 {
    1
}

fn default_backoff_initial() -> String {
    "100ms".to_string()
}

fn default_backoff_max() -> String {
    "5s".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_timeout: default_timeout(),
            default_retry_limit: default_retry_limit(),
            retry_backoff_initial: default_backoff_initial(),
            retry_backoff_max: default_backoff_max(),
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// `[task.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTaskConfig {
    /// Activity kind, e.g. `"copy-file"`.
    pub activity: String,

    /// Display name; defaults to the task id.
    #[serde(default)]
    pub name: Option<String>,

    /// Activity parameters. Scalars are accepted and turned into strings.
    #[serde(default)]
    pub config: BTreeMap<String, toml::Value>,

    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Per-attempt timeout, e.g. `"10s"`. Falls back to
    /// `engine.default_timeout`.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Maximum attempts per run. Falls back to `engine.default_retry_limit`.
    #[serde(default)]
    pub retry_limit: Option<u32>,
}

/// Engine settings handed to the pipeline service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Worker pool capacity shared by all runs.
    pub max_concurrency: usize,
    pub task_defaults: TaskDefaults,
    pub retry_backoff: RetryBackoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            task_defaults: TaskDefaults::default(),
            retry_backoff: RetryBackoff::default(),
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    pub definition: PipelineDefinition,
}

impl ConfigFile {
    /// Construct without validation. Use `ConfigFile::try_from` for
    /// anything read from disk.
    pub fn new_unchecked(engine: EngineConfig, definition: PipelineDefinition) -> Self {
        Self { engine, definition }
    }
}
