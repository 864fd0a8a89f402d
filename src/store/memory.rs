// src/store/memory.rs

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::{HakuError, Result};
use crate::model::{Pipeline, PipelineChanges, TaskStatusUpdate};
use crate::store::PipelineStore;
use crate::types::{BoxFuture, PipelineId, PipelineStatus, TaskStatus};

#[derive(Debug)]
struct StoredPipeline {
    pipeline: Pipeline,
    /// Every status written per task, oldest first.
    history: HashMap<String, Vec<TaskStatus>>,
}

/// Process-local store. All operations take one lock, which is what makes
/// the version check in `update_pipeline` atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    pipelines: Mutex<HashMap<PipelineId, StoredPipeline>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status transitions recorded for one task, across all runs.
    pub async fn task_history(&self, id: PipelineId, task: &str) -> Vec<TaskStatus> {
        let guard = self.pipelines.lock().await;
        guard
            .get(&id)
            .and_then(|stored| stored.history.get(task).cloned())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.pipelines.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pipelines.lock().await.is_empty()
    }
}

impl PipelineStore for InMemoryStore {
    fn create_pipeline(&self, pipeline: Pipeline) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut guard = self.pipelines.lock().await;
            if guard.contains_key(&pipeline.id) {
                return Err(HakuError::ValidationError(format!(
                    "pipeline {} already exists",
                    pipeline.id
                )));
            }
            debug!(pipeline = %pipeline.id, name = %pipeline.name, "store: pipeline created");
            guard.insert(
                pipeline.id,
                StoredPipeline {
                    pipeline,
                    history: HashMap::new(),
                },
            );
            Ok(())
        })
    }

    fn load_pipeline(&self, id: PipelineId) -> BoxFuture<'_, Result<Pipeline>> {
        Box::pin(async move {
            let guard = self.pipelines.lock().await;
            guard
                .get(&id)
                .map(|stored| stored.pipeline.clone())
                .ok_or(HakuError::NotFound(id))
        })
    }

    fn save_task_status(
        &self,
        id: PipelineId,
        update: TaskStatusUpdate,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut guard = self.pipelines.lock().await;
            let stored = guard.get_mut(&id).ok_or(HakuError::NotFound(id))?;

            let Some(task) = stored.pipeline.tasks.iter_mut().find(|t| t.id == update.task) else {
                warn!(pipeline = %id, task = %update.task, "store: status for unknown task");
                return Err(HakuError::ValidationError(format!(
                    "pipeline {id} has no task '{}'",
                    update.task
                )));
            };

            task.status = update.status;
            task.last_error = update.error;
            task.retry_count = update.retry_count;
            stored
                .history
                .entry(update.task)
                .or_default()
                .push(update.status);
            Ok(())
        })
    }

    fn save_pipeline_status(
        &self,
        id: PipelineId,
        status: PipelineStatus,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut guard = self.pipelines.lock().await;
            let stored = guard.get_mut(&id).ok_or(HakuError::NotFound(id))?;
            stored.pipeline.status = status;
            Ok(())
        })
    }

    fn update_pipeline(
        &self,
        id: PipelineId,
        changes: PipelineChanges,
        expected_version: u64,
    ) -> BoxFuture<'_, Result<Pipeline>> {
        Box::pin(async move {
            let mut guard = self.pipelines.lock().await;
            let stored = guard.get_mut(&id).ok_or(HakuError::NotFound(id))?;

            let actual = stored.pipeline.version;
            if actual != expected_version {
                debug!(pipeline = %id, expected_version, actual, "store: stale update rejected");
                return Err(HakuError::VersionConflict {
                    pipeline: id,
                    expected: expected_version,
                    actual,
                });
            }

            let pipeline = &mut stored.pipeline;
            if let Some(name) = changes.name {
                pipeline.name = name;
            }
            if let Some(description) = changes.description {
                pipeline.description = Some(description);
            }
            if let Some(tasks) = changes.tasks {
                pipeline.tasks = tasks;
                stored.history.clear();
            }
            pipeline.version += 1;
            pipeline.updated_at = Utc::now();

            debug!(pipeline = %id, version = pipeline.version, "store: pipeline updated");
            Ok(pipeline.clone())
        })
    }

    fn delete_pipeline(&self, id: PipelineId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut guard = self.pipelines.lock().await;
            guard
                .remove(&id)
                .map(|_| ())
                .ok_or(HakuError::NotFound(id))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::{ActivityKind, Task};
    use crate::types::Owner;

    fn pipeline() -> Pipeline {
        let now = Utc::now();
        Pipeline {
            id: PipelineId::new(),
            owner: Owner::User(7),
            name: "nightly".into(),
            description: None,
            status: PipelineStatus::Created,
            version: 1,
            created_at: now,
            updated_at: now,
            tasks: vec![Task {
                id: "A".into(),
                name: "A".into(),
                activity: ActivityKind::run_script(),
                config: Default::default(),
                dependencies: vec![],
                status: TaskStatus::Pending,
                last_error: None,
                timeout: Duration::from_secs(1),
                retry_count: 0,
                retry_limit: 1,
            }],
        }
    }

    #[tokio::test]
    async fn update_bumps_version_once() {
        let store = InMemoryStore::new();
        let p = pipeline();
        let id = p.id;
        store.create_pipeline(p).await.unwrap();

        let updated = store
            .update_pipeline(id, PipelineChanges::rename("renamed"), 1)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "renamed");
        assert!(updated.updated_at >= updated.created_at);
    }

    #[tokio::test]
    async fn stale_update_leaves_record_untouched() {
        let store = InMemoryStore::new();
        let p = pipeline();
        let id = p.id;
        store.create_pipeline(p).await.unwrap();

        let err = store
            .update_pipeline(id, PipelineChanges::rename("x"), 5)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HakuError::VersionConflict { expected: 5, actual: 1, .. }
        ));
        assert_eq!(store.load_pipeline(id).await.unwrap().name, "nightly");
    }

    #[tokio::test]
    async fn status_writes_do_not_bump_version() {
        let store = InMemoryStore::new();
        let p = pipeline();
        let id = p.id;
        store.create_pipeline(p).await.unwrap();

        store
            .save_pipeline_status(id, PipelineStatus::Running)
            .await
            .unwrap();
        store
            .save_task_status(
                id,
                TaskStatusUpdate {
                    task: "A".into(),
                    status: TaskStatus::Running,
                    error: None,
                    retry_count: 0,
                },
            )
            .await
            .unwrap();

        let loaded = store.load_pipeline(id).await.unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.status, PipelineStatus::Running);
        assert_eq!(store.task_history(id, "A").await, vec![TaskStatus::Running]);
    }

    #[tokio::test]
    async fn missing_pipeline_is_not_found() {
        let store = InMemoryStore::new();
        let id = PipelineId::new();
        assert!(matches!(store.load_pipeline(id).await, Err(HakuError::NotFound(_))));
        assert!(matches!(store.delete_pipeline(id).await, Err(HakuError::NotFound(_))));
    }
}
