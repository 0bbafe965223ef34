pub mod builders;
pub mod scripted_executor;

use std::sync::{Arc, Once};

use rundag::command::{ExecSettings, ExecutionEnv};
use rundag::events::EventPublisher;
use rundag::fs::mock::MockFileSystem;
use rundag::incremental::IncrementalTracker;
use tracing_subscriber::{fmt, EnvFilter};

pub use builders::{ConfigFileBuilder, PipelineSpecBuilder, TaskSpecBuilder};
pub use scripted_executor::{DispatchLog, ScriptedExecutor};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
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
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Execution environment backed by memory stores and a mock filesystem.
pub fn memory_env(publisher: EventPublisher) -> Arc<ExecutionEnv> {
    memory_env_with_fs(publisher, Arc::new(MockFileSystem::new()))
}

pub fn memory_env_with_fs(publisher: EventPublisher, fs: Arc<MockFileSystem>) -> Arc<ExecutionEnv> {
    Arc::new(ExecutionEnv {
        settings: ExecSettings::default(),
        tracker: IncrementalTracker::default(),
        fs,
        publisher,
    })
}
