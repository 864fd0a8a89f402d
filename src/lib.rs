// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{load_and_validate, ConfigFile};
use crate::dag::TaskGraph;
use crate::exec::ActivityRegistry;
use crate::model::PipelineStatusReport;
use crate::store::InMemoryStore;
use crate::types::{Owner, PipelineStatus};

pub use crate::errors::HakuError;
pub use crate::service::{PipelineService, RunHandle};

/// Owner recorded for pipelines started from the command line.
const LOCAL_OWNER: Owner = Owner::User(0);

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - activity registry, in-memory store, worker pool and service
/// - one pipeline run
/// - Ctrl-C handling (cancels the run)
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    if let Some(n) = args.max_concurrency {
        debug!(from = cfg.engine.max_concurrency, to = n, "max_concurrency overridden on the command line");
        cfg.engine.max_concurrency = n;
    }

    let registry = Arc::new(ActivityRegistry::with_builtins());

    if args.dry_run {
        service::validate_definition(&cfg.definition, &registry, &cfg.engine.task_defaults)?;
        print_dry_run(&cfg)?;
        return Ok(());
    }

    let store = Arc::new(InMemoryStore::new());
    let service = Arc::new(PipelineService::new(cfg.engine, store, registry)?);

    let pipeline = service.create_pipeline(LOCAL_OWNER, cfg.definition).await?;
    let pipeline_id = pipeline.id;
    let mut handle = service.start_run(pipeline_id).await?;

    // Ctrl-C → cancel the run; in-flight tasks are stopped and drained.
    {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!(pipeline = %pipeline_id, "Ctrl+C received; cancelling run");
            if let Err(e) = service.cancel_run(pipeline_id).await {
                debug!(error = %e, "cancel after Ctrl+C had nothing to do");
            }
        });
    }

    let status = handle.wait().await;
    let report = service.get_status(pipeline_id).await?;
    print_report(&report);

    service.shutdown().await;
    info!(pipeline = %pipeline_id, status = %status, "haku exiting");

    if status != PipelineStatus::Succeeded {
        bail!("pipeline '{}' finished with status {status}", report.name);
    }
    Ok(())
}

/// Dry-run output: tasks in an order that respects every dependency.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    let defaults = &cfg.engine.task_defaults;
    let tasks = cfg
        .definition
        .tasks
        .iter()
        .cloned()
        .map(|t| t.into_task(defaults))
        .collect();
    let graph = TaskGraph::build(tasks)?;

    println!("haku dry-run: pipeline '{}'", cfg.definition.name);
    if let Some(description) = &cfg.definition.description {
        println!("  {description}");
    }
    println!("  engine.max_concurrency = {}", cfg.engine.max_concurrency);
    println!();

    println!("tasks ({}, {} edges):", graph.len(), graph.edge_count());
    for task in graph.topological_order() {
        println!("  - {} [{}]", task.id, task.activity);
        if !task.dependencies.is_empty() {
            println!("      after: {:?}", task.dependencies);
        }
        println!("      timeout: {}ms", task.timeout.as_millis());
        println!("      retry_limit: {}", task.retry_limit);
        for (key, value) in &task.config {
            println!("      config.{key}: {value}");
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_report(report: &PipelineStatusReport) {
    println!("pipeline '{}' ({}): {}", report.name, report.pipeline, report.status);
    for task in &report.tasks {
        match &task.last_error {
            Some(error) => println!(
                "  - {}: {} (retries: {}, error: {})",
                task.id, task.status, task.retry_count, error
            ),
            None => println!("  - {}: {}", task.id, task.status),
        }
    }
}
