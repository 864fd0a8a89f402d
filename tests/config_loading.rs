// tests/config_loading.rs

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use haku::config::{load_and_validate, load_from_path};
use haku::errors::HakuError;
use haku::types::{Owner, PipelineStatus};
use haku_test_utils::{init_tracing, with_timeout, Harness};

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("Haku.toml");
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn full_config_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [engine]
        max_concurrency = 2
        default_timeout = "10s"
        default_retry_limit = 3
        retry_backoff_initial = "50ms"
        retry_backoff_max = "1s"

        [pipeline]
        name = "nightly"
        description = "copy then notify"

        [task.copy]
        activity = "copy-file"
        config = { source = "in.txt", destination = "out.txt" }
        timeout = "2m"

        [task.notify]
        activity = "send-email"
        after = ["copy"]
        retry_limit = 1
        config = { to = "ops@example.com", subject = "done" }
        "#,
    );

    let cfg = load_and_validate(&path).unwrap();

    assert_eq!(cfg.engine.max_concurrency, 2);
    assert_eq!(cfg.engine.task_defaults.timeout, Duration::from_secs(10));
    assert_eq!(cfg.engine.task_defaults.retry_limit, 3);
    assert_eq!(cfg.engine.retry_backoff.initial, Duration::from_millis(50));
    assert_eq!(cfg.engine.retry_backoff.max, Duration::from_secs(1));

    assert_eq!(cfg.definition.name, "nightly");
    assert_eq!(cfg.definition.description.as_deref(), Some("copy then notify"));
    assert_eq!(cfg.definition.tasks.len(), 2);

    let copy = cfg.definition.tasks.iter().find(|t| t.id == "copy").unwrap();
    assert_eq!(copy.activity.as_str(), "copy-file");
    assert_eq!(copy.timeout, Some(Duration::from_secs(120)));
    assert_eq!(copy.retry_limit, None);
    assert_eq!(copy.config["destination"], "out.txt");

    let notify = cfg.definition.tasks.iter().find(|t| t.id == "notify").unwrap();
    assert_eq!(notify.dependencies, vec!["copy".to_string()]);
    assert_eq!(notify.retry_limit, Some(1));
}

#[test]
fn missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = load_from_path(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, HakuError::IoError(_)));
}

#[test]
fn malformed_toml_is_toml_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[pipeline\nname = ");
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, HakuError::TomlError(_)));
}

#[test]
fn unknown_engine_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [engine]
        max_concurency = 2

        [pipeline]
        name = "typo"

        [task.a]
        activity = "run-script"
        "#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, HakuError::TomlError(_)));
}

#[test]
fn cycle_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [pipeline]
        name = "loop"

        [task.a]
        activity = "run-script"
        after = ["b"]

        [task.b]
        activity = "run-script"
        after = ["a"]
        "#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, HakuError::CycleDetected(ref t) if t == "a" || t == "b"));
}

#[test]
fn unknown_and_self_dependencies_are_config_errors() {
    let dir = TempDir::new().unwrap();

    let path = write_config(
        &dir,
        r#"
        [pipeline]
        name = "dangling"

        [task.a]
        activity = "run-script"
        after = ["ghost"]
        "#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, HakuError::ConfigError(ref msg) if msg.contains("ghost")));

    let path = write_config(
        &dir,
        r#"
        [pipeline]
        name = "selfish"

        [task.a]
        activity = "run-script"
        after = ["a"]
        "#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, HakuError::ConfigError(ref msg) if msg.contains("itself")));
}

#[test]
fn bad_engine_values_are_config_errors() {
    let dir = TempDir::new().unwrap();
    let cases = [
        "max_concurrency = 0",
        "default_timeout = \"0s\"",
        "default_timeout = \"soon\"",
        "retry_backoff_initial = \"5x\"",
        "default_timeout = \"9999999999999999h\"",
    ];

    for engine in cases {
        let path = write_config(
            &dir,
            &format!(
                "[engine]\n{engine}\n\n[pipeline]\nname = \"p\"\n\n[task.a]\nactivity = \"run-script\"\n"
            ),
        );
        let err = load_and_validate(&path).unwrap_err();
        assert!(
            matches!(err, HakuError::ConfigError(_)),
            "{engine}: expected ConfigError, got {err:?}"
        );
    }
}

#[test]
fn bad_task_timeout_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [pipeline]
        name = "p"

        [task.a]
        activity = "run-script"
        timeout = "forever"
        "#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, HakuError::ConfigError(ref msg) if msg.contains("[task.a]")));
}

#[test]
fn config_without_tasks_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[pipeline]\nname = \"empty\"\n");
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, HakuError::ConfigError(_)));
}

#[tokio::test]
async fn loaded_definition_runs() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [pipeline]
        name = "from-file"

        [task.first]
        activity = "scripted"

        [task.second]
        activity = "scripted"
        after = ["first"]
        config = { sleep_ms = 5 }

        [task.third]
        activity = "scripted"
        after = ["first"]
        "#,
    );

    let cfg = load_and_validate(&path).unwrap();
    let h = Harness::new(cfg.engine.max_concurrency);

    let pipeline = h
        .service
        .create_pipeline(Owner::User(7), cfg.definition)
        .await
        .unwrap();
    let mut handle = h.service.start_run(pipeline.id).await.unwrap();

    assert_eq!(with_timeout(handle.wait()).await, PipelineStatus::Succeeded);
    assert_eq!(h.probe.started()[0], "first");
    assert_eq!(h.probe.started().len(), 3);
}
