// src/config/validate.rs

use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, EngineConfig, RawConfigFile, RawTaskConfig};
use crate::engine::RetryBackoff;
use crate::errors::{HakuError, Result};
use crate::model::{ActivityConfig, ActivityKind, PipelineDefinition, TaskDefaults, TaskDefinition};
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = HakuError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let engine = engine_config(&raw)?;
        let definition = pipeline_definition(raw)?;
        Ok(ConfigFile::new_unchecked(engine, definition))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(HakuError::ConfigError(
            "config must contain at least one [task.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn duration_field(section: &str, key: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| HakuError::ConfigError(format!("{section}.{key}: {e}")))
}

fn engine_config(cfg: &RawConfigFile) -> Result<EngineConfig> {
    let engine = &cfg.engine;

    if engine.max_concurrency == 0 {
        return Err(HakuError::ConfigError(
            "[engine].max_concurrency must be >= 1 (got 0)".to_string(),
        ));
    }

    let timeout = duration_field("[engine]", "default_timeout", &engine.default_timeout)?;
    if timeout.is_zero() {
        return Err(HakuError::ConfigError(
            "[engine].default_timeout must be greater than zero".to_string(),
        ));
    }

    let initial = duration_field(
        "[engine]",
        "retry_backoff_initial",
        &engine.retry_backoff_initial,
    )?;
    let max = duration_field("[engine]", "retry_backoff_max", &engine.retry_backoff_max)?;
    if initial > max {
        return Err(HakuError::ConfigError(format!(
            "[engine].retry_backoff_initial ({}) exceeds retry_backoff_max ({})",
            engine.retry_backoff_initial, engine.retry_backoff_max
        )));
    }

    Ok(EngineConfig {
        max_concurrency: engine.max_concurrency,
        task_defaults: TaskDefaults {
            timeout,
            retry_limit: engine.default_retry_limit,
        },
        retry_backoff: RetryBackoff::new(initial, max),
    })
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == name {
                return Err(HakuError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(HakuError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task, so `after = ["A"]` on B adds A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(HakuError::CycleDetected(cycle.node_id().to_string())),
    }
}

fn pipeline_definition(raw: RawConfigFile) -> Result<PipelineDefinition> {
    let tasks = raw
        .task
        .into_iter()
        .map(|(id, task)| task_definition(id, task))
        .collect::<Result<Vec<_>>>()?;

    Ok(PipelineDefinition {
        name: raw.pipeline.name,
        description: raw.pipeline.description,
        tasks,
    })
}

fn task_definition(id: String, task: RawTaskConfig) -> Result<TaskDefinition> {
    let section = format!("[task.{id}]");

    let timeout = match task.timeout.as_deref() {
        Some(value) => {
            let timeout = duration_field(&section, "timeout", value)?;
            if timeout.is_zero() {
                return Err(HakuError::ConfigError(format!(
                    "{section}.timeout must be greater than zero"
                )));
            }
            Some(timeout)
        }
        None => None,
    };

    let mut config = ActivityConfig::new();
    for (key, value) in task.config {
        let value = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                return Err(HakuError::ConfigError(format!(
                    "{section}.config.{key} must be a scalar, got {}",
                    other.type_str()
                )));
            }
        };
        config.insert(key, value);
    }

    Ok(TaskDefinition {
        id,
        name: task.name,
        activity: ActivityKind::new(task.activity),
        config,
        dependencies: task.after,
        timeout,
        retry_limit: task.retry_limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_src)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn scalars_become_strings() {
        let cfg = parse(
            r#"
            [pipeline]
            name = "p"

            [task.a]
            activity = "run-script"
            config = { script = "true", retries = 3, verbose = true }
            "#,
        )
        .unwrap();

        let task = &cfg.definition.tasks[0];
        assert_eq!(task.config["retries"], "3");
        assert_eq!(task.config["verbose"], "true");
        assert_eq!(task.timeout, None);
        assert_eq!(cfg.engine, EngineConfig::default());
    }

    #[test]
    fn table_config_values_are_rejected() {
        let err = parse(
            r#"
            [pipeline]
            name = "p"

            [task.a]
            activity = "run-script"
            config = { script = { nested = "x" } }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, HakuError::ConfigError(msg) if msg.contains("config.script")));
    }

    #[test]
    fn backoff_initial_above_max_is_rejected() {
        let err = parse(
            r#"
            [engine]
            retry_backoff_initial = "10s"
            retry_backoff_max = "1s"

            [pipeline]
            name = "p"

            [task.a]
            activity = "run-script"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, HakuError::ConfigError(_)));
    }
}
