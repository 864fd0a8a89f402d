// src/service.rs

//! Operations exposed to an outer layer (HTTP handlers, the CLI).
//!
//! The service owns the worker pool shared by every run, and one `RunDriver`
//! task per active run. Callers are assumed to be authorized already.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dag::{Scheduler, TaskGraph};
use crate::engine::{RunCore, RunDriver};
use crate::errors::{HakuError, Result};
use crate::exec::{ActivityRegistry, TaskRunner, WorkerPool};
use crate::model::{
    Pipeline, PipelineDefinition, PipelineStatusReport, PipelineUpdate, TaskDefaults,
    TaskDefinition,
};
use crate::store::PipelineStore;
use crate::types::{Owner, PipelineId, PipelineStatus};

const MAX_NAME_LEN: usize = 255;

/// Handle to a started run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pipeline_id: PipelineId,
    done: watch::Receiver<Option<PipelineStatus>>,
}

impl RunHandle {
    pub fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }

    /// Final status, if the run is over.
    pub fn try_status(&self) -> Option<PipelineStatus> {
        *self.done.borrow()
    }

    /// Wait for the run to end and return its final pipeline status.
    pub async fn wait(&mut self) -> PipelineStatus {
        match self.done.wait_for(|status| status.is_some()).await {
            Ok(status) => status.unwrap_or(PipelineStatus::Error),
            // The driver task vanished without reporting (panic or runtime
            // shutdown).
            Err(_) => PipelineStatus::Error,
        }
    }
}

#[derive(Debug)]
struct ActiveRun {
    cancel_tx: watch::Sender<bool>,
    done: watch::Receiver<Option<PipelineStatus>>,
}

impl ActiveRun {
    fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }
}

pub struct PipelineService {
    config: EngineConfig,
    store: Arc<dyn PipelineStore>,
    registry: Arc<ActivityRegistry>,
    pool: Arc<WorkerPool>,
    runner: Arc<TaskRunner>,
    runs: Mutex<HashMap<PipelineId, ActiveRun>>,
}

impl std::fmt::Debug for PipelineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineService")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl PipelineService {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn PipelineStore>,
        registry: Arc<ActivityRegistry>,
    ) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(config.max_concurrency)?);
        let runner = Arc::new(TaskRunner::new(Arc::clone(&registry)));
        info!(max_concurrency = config.max_concurrency, "pipeline service ready");
        Ok(Self {
            config,
            store,
            registry,
            pool,
            runner,
            runs: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Validate and store a new pipeline. Version starts at 1.
    pub async fn create_pipeline(
        &self,
        owner: Owner,
        definition: PipelineDefinition,
    ) -> Result<Pipeline> {
        validate_definition(&definition, &self.registry, &self.config.task_defaults)?;

        let pipeline = Pipeline::from_definition(owner, definition, &self.config.task_defaults);
        self.store.create_pipeline(pipeline.clone()).await?;
        info!(
            pipeline = %pipeline.id,
            name = %pipeline.name,
            tasks = pipeline.tasks.len(),
            "pipeline created"
        );
        Ok(pipeline)
    }

    /// Start a new run of a stored pipeline.
    ///
    /// Fails with `AlreadyRunning` if a run of this pipeline is still active,
    /// and with the graph error if the stored task set no longer builds.
    pub async fn start_run(&self, id: PipelineId) -> Result<RunHandle> {
        let mut runs = self.runs.lock().await;
        if runs.get(&id).is_some_and(|run| !run.is_finished()) {
            return Err(HakuError::AlreadyRunning(id));
        }
        if self.pool.is_closed() {
            return Err(HakuError::PoolClosed);
        }

        let pipeline = self.store.load_pipeline(id).await?;
        let graph = TaskGraph::build(pipeline.tasks)?;
        self.store
            .save_pipeline_status(id, PipelineStatus::Queued)
            .await?;

        let core = RunCore::new(Scheduler::new(id, graph, self.config.retry_backoff));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(None);

        let driver = RunDriver::new(
            id,
            core,
            cancel_rx,
            Arc::clone(&self.pool),
            Arc::clone(&self.runner),
            Arc::clone(&self.store),
        );
        tokio::spawn(async move {
            let status = driver.run().await;
            done_tx.send_replace(Some(status));
        });

        runs.insert(
            id,
            ActiveRun {
                cancel_tx,
                done: done_rx.clone(),
            },
        );
        info!(pipeline = %id, "pipeline run queued");

        Ok(RunHandle {
            pipeline_id: id,
            done: done_rx,
        })
    }

    /// Current pipeline status and every task's status.
    pub async fn get_status(&self, id: PipelineId) -> Result<PipelineStatusReport> {
        let pipeline = self.store.load_pipeline(id).await?;
        Ok(PipelineStatusReport::from(&pipeline))
    }

    /// Cancel the active run and wait until its in-flight work drained.
    pub async fn cancel_run(&self, id: PipelineId) -> Result<()> {
        let mut done = {
            let runs = self.runs.lock().await;
            match runs.get(&id) {
                Some(run) if !run.is_finished() => {
                    info!(pipeline = %id, "cancelling pipeline run");
                    run.cancel_tx.send_replace(true);
                    run.done.clone()
                }
                _ => return Err(HakuError::NotRunning(id)),
            }
        };

        let _ = done.wait_for(|status| status.is_some()).await;
        debug!(pipeline = %id, "cancelled run drained");
        Ok(())
    }

    /// Apply an optimistic update. A stale `expected_version` fails with
    /// `VersionConflict` and changes nothing.
    pub async fn update_pipeline(
        &self,
        id: PipelineId,
        update: PipelineUpdate,
        expected_version: u64,
    ) -> Result<Pipeline> {
        if let Some(name) = &update.name {
            validate_name(name)?;
        }

        // Replacing tasks holds the run table across the store write so no
        // run can start from the old task set in between.
        let runs = match &update.tasks {
            Some(tasks) => {
                validate_tasks(tasks, &self.registry, &self.config.task_defaults)?;
                let runs = self.runs.lock().await;
                if runs.get(&id).is_some_and(|run| !run.is_finished()) {
                    return Err(HakuError::AlreadyRunning(id));
                }
                Some(runs)
            }
            None => None,
        };

        let changes = update.resolve(&self.config.task_defaults);
        let pipeline = self
            .store
            .update_pipeline(id, changes, expected_version)
            .await?;
        drop(runs);
        info!(pipeline = %id, version = pipeline.version, "pipeline updated");
        Ok(pipeline)
    }

    /// Delete a pipeline, cancelling its active run first.
    ///
    /// The run table stays locked until the record is gone, so no new run
    /// can start against a pipeline being deleted.
    pub async fn delete_pipeline(&self, id: PipelineId) -> Result<()> {
        let mut runs = self.runs.lock().await;
        if let Some(run) = runs.remove(&id) {
            if !run.is_finished() {
                info!(pipeline = %id, "cancelling pipeline run before delete");
                run.cancel_tx.send_replace(true);
                let mut done = run.done.clone();
                let _ = done.wait_for(|status| status.is_some()).await;
                debug!(pipeline = %id, "cancelled run drained");
            }
        }
        self.store.delete_pipeline(id).await?;
        drop(runs);
        info!(pipeline = %id, "pipeline deleted");
        Ok(())
    }

    /// Whether `id` has a run that has not finished yet.
    pub async fn is_running(&self, id: PipelineId) -> bool {
        self.runs
            .lock()
            .await
            .get(&id)
            .is_some_and(|run| !run.is_finished())
    }

    /// Cancel every active run, wait for them, then drain the pool.
    pub async fn shutdown(&self) {
        let pending: Vec<(PipelineId, watch::Receiver<Option<PipelineStatus>>)> = {
            let runs = self.runs.lock().await;
            runs.iter()
                .filter(|(_, run)| !run.is_finished())
                .map(|(id, run)| {
                    run.cancel_tx.send_replace(true);
                    (*id, run.done.clone())
                })
                .collect()
        };

        info!(active_runs = pending.len(), "pipeline service shutting down");
        for (id, mut done) in pending {
            if done.wait_for(|status| status.is_some()).await.is_err() {
                warn!(pipeline = %id, "run ended without reporting a status");
            }
        }
        self.pool.shutdown().await;
    }
}

/// Check a definition without storing it: name, activity configs, and the
/// task graph (duplicates, dangling dependencies, cycles).
pub fn validate_definition(
    definition: &PipelineDefinition,
    registry: &ActivityRegistry,
    defaults: &TaskDefaults,
) -> Result<()> {
    validate_name(&definition.name)?;
    validate_tasks(&definition.tasks, registry, defaults)
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(HakuError::ValidationError(
            "pipeline name must not be empty".into(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(HakuError::ValidationError(format!(
            "pipeline name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_tasks(
    tasks: &[TaskDefinition],
    registry: &ActivityRegistry,
    defaults: &TaskDefaults,
) -> Result<()> {
    for task in tasks {
        if task.id.trim().is_empty() {
            return Err(HakuError::ValidationError("task id must not be empty".into()));
        }
        if task.timeout.is_some_and(|t| t.is_zero()) {
            return Err(HakuError::ValidationError(format!(
                "task '{}' has a zero timeout",
                task.id
            )));
        }
        for (i, dep) in task.dependencies.iter().enumerate() {
            if task.dependencies[..i].contains(dep) {
                return Err(HakuError::ValidationError(format!(
                    "task '{}' lists dependency '{}' more than once",
                    task.id, dep
                )));
            }
        }
        registry.validate_task(task)?;
    }

    let resolved = tasks
        .iter()
        .cloned()
        .map(|t| t.into_task(defaults))
        .collect();
    TaskGraph::build(resolved)?;
    Ok(())
}
