pub mod builders;
pub mod scripted;

use std::sync::{Arc, Once};
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use haku::config::EngineConfig;
use haku::engine::RetryBackoff;
use haku::exec::ActivityRegistry;
use haku::model::TaskDefaults;
use haku::store::InMemoryStore;
use haku::PipelineService;

use crate::scripted::{Probe, ScriptedActivity};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=haku=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Engine settings for tests: short retry backoff, generous timeout.
pub fn test_engine_config(max_concurrency: usize) -> EngineConfig {
    EngineConfig {
        max_concurrency,
        task_defaults: TaskDefaults {
            timeout: Duration::from_secs(5),
            retry_limit: 1,
        },
        retry_backoff: RetryBackoff::new(Duration::from_millis(1), Duration::from_millis(10)),
    }
}

/// Built-in activities plus the `scripted` test activity, sharing `probe`.
pub fn test_registry(probe: Arc<Probe>) -> ActivityRegistry {
    let mut registry = ActivityRegistry::with_builtins();
    registry.register(ScriptedActivity::new(probe));
    registry
}

/// A service wired to an in-memory store and an instrumented registry.
pub struct Harness {
    pub service: PipelineService,
    pub store: Arc<InMemoryStore>,
    pub probe: Arc<Probe>,
}

impl Harness {
    pub fn new(max_concurrency: usize) -> Self {
        Self::with_config(test_engine_config(max_concurrency))
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let probe = Arc::new(Probe::default());
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(test_registry(Arc::clone(&probe)));
        let service = PipelineService::new(config, store.clone(), registry)
            .expect("test engine config is valid");
        Self {
            service,
            store,
            probe,
        }
    }
}
