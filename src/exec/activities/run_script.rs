// src/exec/activities/run_script.rs

//! `run-script` activity: run a shell snippet as a child process.

use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::exec::activity::{require, Activity, ActivityContext, ActivityError};
use crate::model::{ActivityConfig, ActivityKind};
use crate::types::BoxFuture;

/// Config: `script` (required), `shell` (optional, `sh` by default; `cmd` on
/// Windows), `workdir` (optional).
#[derive(Debug, Clone, Copy, Default)]
pub struct RunScript;

fn command_for(config: &ActivityConfig, script: &str) -> Command {
    let mut cmd = match config.get("shell").map(|s| s.trim()) {
        Some(shell) if !shell.is_empty() => {
            let mut c = Command::new(shell);
            c.arg("-c").arg(script);
            c
        }
        _ if cfg!(windows) => {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(script);
            c
        }
        _ => {
            let mut c = Command::new("sh");
            c.arg("-c").arg(script);
            c
        }
    };

    if let Some(dir) = config.get("workdir") {
        cmd.current_dir(dir);
    }

    // Dropping the future (timeout, cancellation) kills the child.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

impl Activity for RunScript {
    fn kind(&self) -> ActivityKind {
        ActivityKind::run_script()
    }

    fn validate_config(&self, config: &ActivityConfig) -> Result<(), ActivityError> {
        require(config, "script")?;
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ActivityContext,
        config: &'a ActivityConfig,
    ) -> BoxFuture<'a, Result<(), ActivityError>> {
        Box::pin(async move {
            let script = require(config, "script")?;
            info!(
                pipeline = %ctx.pipeline_id,
                task = %ctx.task_id,
                attempt = ctx.attempt,
                script = %script,
                "starting script"
            );

            let mut child = command_for(config, script)
                .spawn()
                .with_context(|| format!("spawning script for task '{}'", ctx.task_id))?;

            // Always consume both pipes so buffers don't fill; log at debug.
            if let Some(stdout) = child.stdout.take() {
                let task = ctx.task_id.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        debug!(task = %task, "stdout: {}", line);
                    }
                });
            }
            if let Some(stderr) = child.stderr.take() {
                let task = ctx.task_id.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        debug!(task = %task, "stderr: {}", line);
                    }
                });
            }

            let status = child.wait().await?;
            let code = status.code().unwrap_or(-1);
            info!(
                pipeline = %ctx.pipeline_id,
                task = %ctx.task_id,
                exit_code = code,
                success = status.success(),
                "script exited"
            );

            if status.success() {
                Ok(())
            } else {
                Err(ActivityError::ExitStatus(code))
            }
        })
    }
}
