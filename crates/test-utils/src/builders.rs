#![allow(dead_code)]

use std::time::Duration;

use haku::model::{ActivityConfig, ActivityKind, PipelineDefinition, TaskDefinition};

use crate::scripted::SCRIPTED;

/// Builder for `PipelineDefinition` to simplify test setup.
pub struct DefinitionBuilder {
    definition: PipelineDefinition,
}

impl DefinitionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            definition: PipelineDefinition {
                name: name.to_string(),
                description: None,
                tasks: Vec::new(),
            },
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.definition.description = Some(description.to_string());
        self
    }

    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.definition.tasks.push(task);
        self
    }

    pub fn build(self) -> PipelineDefinition {
        self.definition
    }
}

/// Builder for `TaskDefinition`.
pub struct TaskDefBuilder {
    task: TaskDefinition,
}

impl TaskDefBuilder {
    pub fn new(id: &str, activity: &str) -> Self {
        Self {
            task: TaskDefinition {
                id: id.to_string(),
                name: None,
                activity: ActivityKind::new(activity),
                config: ActivityConfig::new(),
                dependencies: Vec::new(),
                timeout: None,
                retry_limit: None,
            },
        }
    }

    /// A task running the `scripted` test activity (succeeds by default).
    pub fn scripted(id: &str) -> Self {
        Self::new(id, SCRIPTED)
    }

    pub fn name(mut self, name: &str) -> Self {
        self.task.name = Some(name.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.dependencies.push(dep.to_string());
        self
    }

    pub fn config(mut self, key: &str, value: &str) -> Self {
        self.task.config.insert(key.to_string(), value.to_string());
        self
    }

    /// `scripted`: sleep this long before finishing.
    pub fn sleep(self, d: Duration) -> Self {
        let ms = d.as_millis().to_string();
        self.config("sleep_ms", &ms)
    }

    /// `scripted`: fail the first `n` attempts of each run.
    pub fn fail_times(self, n: u32) -> Self {
        self.config("fail_times", &n.to_string())
    }

    /// `scripted`: fail every attempt.
    pub fn always_fail(self) -> Self {
        self.config("fail", "always")
    }

    /// `scripted`: panic inside the activity.
    pub fn panics(self) -> Self {
        self.config("panic", "true")
    }

    /// `scripted`: never finish on its own.
    pub fn hang(self) -> Self {
        self.config("hang", "true")
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.task.timeout = Some(d);
        self
    }

    pub fn retry_limit(mut self, n: u32) -> Self {
        self.task.retry_limit = Some(n);
        self
    }

    pub fn build(self) -> TaskDefinition {
        self.task
    }
}
