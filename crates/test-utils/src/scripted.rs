use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use haku::exec::{Activity, ActivityContext, ActivityError};
use haku::model::{ActivityConfig, ActivityKind};
use haku::types::BoxFuture;

/// Kind name of [`ScriptedActivity`].
pub const SCRIPTED: &str = "scripted";

/// Observes every `scripted` execution.
#[derive(Debug, Default)]
pub struct Probe {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Probe {
    /// Executions currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous executions seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Task ids in start order (one entry per attempt).
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Attempts started for `task`, across runs.
    pub fn attempts(&self, task: &str) -> u32 {
        self.attempts.lock().unwrap().get(task).copied().unwrap_or(0)
    }

    fn enter(self: &Arc<Self>, task: &str) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.lock().unwrap().push(task.to_string());
        *self.attempts.lock().unwrap().entry(task.to_string()).or_default() += 1;
        ActiveGuard(Arc::clone(self))
    }
}

/// Decrements the active count even when the execution is aborted.
struct ActiveGuard(Arc<Probe>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Test activity whose behaviour is driven by its config:
///
/// - `sleep_ms`: sleep before finishing
/// - `fail_times`: fail attempts `1..=n` of each run
/// - `fail = "always"`: fail every attempt
/// - `panic = "true"`: panic
/// - `hang = "true"`: never finish
pub struct ScriptedActivity {
    probe: Arc<Probe>,
}

impl ScriptedActivity {
    pub fn new(probe: Arc<Probe>) -> Self {
        Self { probe }
    }
}

fn number(config: &ActivityConfig, key: &str) -> Result<Option<u64>, ActivityError> {
    config
        .get(key)
        .map(|v| {
            v.parse::<u64>().map_err(|e| ActivityError::InvalidConfig {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn flag(config: &ActivityConfig, key: &str, value: &str) -> bool {
    config.get(key).is_some_and(|v| v == value)
}

impl Activity for ScriptedActivity {
    fn kind(&self) -> ActivityKind {
        ActivityKind::new(SCRIPTED)
    }

    fn validate_config(&self, config: &ActivityConfig) -> Result<(), ActivityError> {
        number(config, "sleep_ms")?;
        number(config, "fail_times")?;
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ActivityContext,
        config: &'a ActivityConfig,
    ) -> BoxFuture<'a, Result<(), ActivityError>> {
        Box::pin(async move {
            let _guard = self.probe.enter(&ctx.task_id);

            if let Some(ms) = number(config, "sleep_ms")? {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if flag(config, "hang", "true") {
                std::future::pending::<()>().await;
            }
            if flag(config, "panic", "true") {
                panic!("scripted panic in task '{}'", ctx.task_id);
            }
            if flag(config, "fail", "always") {
                return Err(ActivityError::Other(anyhow::anyhow!("scripted failure")));
            }
            if let Some(n) = number(config, "fail_times")? {
                if u64::from(ctx.attempt) <= n {
                    return Err(ActivityError::Other(anyhow::anyhow!(
                        "scripted failure on attempt {}",
                        ctx.attempt
                    )));
                }
            }
            Ok(())
        })
    }
}
