// tests/task_runner.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use haku::dag::ScheduledTask;
use haku::engine::TaskOutcome;
use haku::exec::TaskRunner;
use haku::model::TaskDefaults;
use haku::types::PipelineId;
use haku_test_utils::builders::TaskDefBuilder;
use haku_test_utils::scripted::Probe;
use haku_test_utils::{init_tracing, test_registry, with_timeout};

fn runner() -> (TaskRunner, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let registry = Arc::new(test_registry(Arc::clone(&probe)));
    (TaskRunner::new(registry), probe)
}

fn scheduled(builder: TaskDefBuilder) -> ScheduledTask {
    let task = builder.build().into_task(&TaskDefaults::default());
    ScheduledTask::new(PipelineId::new(), task, 1)
}

#[tokio::test]
async fn successful_activity() {
    init_tracing();
    let (runner, probe) = runner();
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = with_timeout(runner.run(&scheduled(TaskDefBuilder::scripted("A")), cancel_rx)).await;

    assert_eq!(outcome, TaskOutcome::Succeeded);
    assert_eq!(probe.attempts("A"), 1);
}

#[tokio::test]
async fn activity_error_becomes_failed() {
    init_tracing();
    let (runner, _probe) = runner();
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = with_timeout(runner.run(
        &scheduled(TaskDefBuilder::scripted("A").always_fail()),
        cancel_rx,
    ))
    .await;

    assert_eq!(outcome, TaskOutcome::Failed("scripted failure".to_string()));
}

#[tokio::test]
async fn hanging_activity_times_out_and_is_dropped() {
    init_tracing();
    let (runner, probe) = runner();
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let task = scheduled(
        TaskDefBuilder::scripted("slow")
            .hang()
            .timeout(Duration::from_millis(50)),
    );

    let outcome = with_timeout(runner.run(&task, cancel_rx)).await;
    assert_eq!(outcome, TaskOutcome::TimedOut(Duration::from_millis(50)));

    // The activity future is already dropped when the runner reports back.
    assert_eq!(probe.active(), 0);
}

#[tokio::test]
async fn panic_is_reported_as_failure() {
    init_tracing();
    let (runner, _probe) = runner();
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = with_timeout(runner.run(&scheduled(TaskDefBuilder::scripted("boom").panics()), cancel_rx)).await;

    match outcome {
        TaskOutcome::Failed(msg) => {
            assert!(msg.contains("panicked"), "{msg}");
            assert!(msg.contains("boom"), "{msg}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_stops_a_running_activity() {
    init_tracing();
    let (runner, probe) = runner();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let task = scheduled(TaskDefBuilder::scripted("A").hang());

    let run = tokio::spawn(async move { runner.run(&task, cancel_rx).await });

    with_timeout(async {
        while probe.active() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    cancel_tx.send_replace(true);

    let outcome = with_timeout(run).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Cancelled);
    assert_eq!(probe.active(), 0);
}

#[tokio::test]
async fn already_cancelled_run_does_not_start_the_activity() {
    let (runner, probe) = runner();
    let (_cancel_tx, cancel_rx) = watch::channel(true);

    let outcome = runner.run(&scheduled(TaskDefBuilder::scripted("A")), cancel_rx).await;

    assert_eq!(outcome, TaskOutcome::Cancelled);
    assert_eq!(probe.attempts("A"), 0);
}

#[tokio::test]
async fn unknown_activity_fails_without_running() {
    let (runner, _probe) = runner();
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = runner
        .run(&scheduled(TaskDefBuilder::new("A", "teleport")), cancel_rx)
        .await;

    assert_eq!(outcome, TaskOutcome::Failed("unknown activity 'teleport'".to_string()));
}
