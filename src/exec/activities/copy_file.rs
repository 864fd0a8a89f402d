// src/exec/activities/copy_file.rs

use std::path::Path;

use tracing::info;

use crate::exec::activity::{require, Activity, ActivityContext, ActivityError};
use crate::model::{ActivityConfig, ActivityKind};
use crate::types::BoxFuture;

/// `copy-file`: copy `source` to `destination`, creating the destination's
/// parent directory when needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyFile;

impl Activity for CopyFile {
    fn kind(&self) -> ActivityKind {
        ActivityKind::copy_file()
    }

    fn validate_config(&self, config: &ActivityConfig) -> Result<(), ActivityError> {
        let source = require(config, "source")?;
        let destination = require(config, "destination")?;
        if source == destination {
            return Err(ActivityError::InvalidConfig {
                key: "destination".into(),
                reason: "must differ from source".into(),
            });
        }
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ActivityContext,
        config: &'a ActivityConfig,
    ) -> BoxFuture<'a, Result<(), ActivityError>> {
        Box::pin(async move {
            let source = Path::new(require(config, "source")?);
            let destination = Path::new(require(config, "destination")?);

            if let Some(parent) = destination.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }

            let bytes = tokio::fs::copy(source, destination).await?;
            info!(
                pipeline = %ctx.pipeline_id,
                task = %ctx.task_id,
                source = %source.display(),
                destination = %destination.display(),
                bytes,
                "file copied"
            );
            Ok(())
        })
    }
}
