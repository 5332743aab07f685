//! Process-wide worker pool for blocking driver calls.

use crate::config::EngineConfig;
use crate::error::{OdbcError, Result};
use std::sync::OnceLock;
use tokio::runtime::{Builder, Runtime};

static RUNTIME: OnceLock<std::result::Result<Runtime, String>> = OnceLock::new();

/// Builds the runtime with at most `max_workers` blocking threads. Only the
/// first call configures it; later calls return the existing runtime.
pub fn init_runtime(max_workers: usize) -> Result<&'static Runtime> {
    let runtime = RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_workers.max(1))
            .thread_name("odbc-worker")
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))
    });

    match runtime {
        Ok(rt) => Ok(rt),
        Err(msg) => Err(OdbcError::InternalError(msg.clone())),
    }
}

pub fn runtime() -> Result<&'static Runtime> {
    init_runtime(EngineConfig::default().max_workers)
}

/// Runs `f` on a blocking worker. Completion is reported by `f` itself.
pub fn spawn_blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    runtime()?.spawn_blocking(f);
    Ok(())
}
