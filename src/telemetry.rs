use crate::config::DashboardConfig;
use crate::errors::{DashboardError, DashboardResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the JSON file logger. `RUST_LOG` wins over `default_level` when set.
pub fn init_tracing(log_dir: &Path, default_level: &str) -> DashboardResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "segment-insights.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| DashboardError::Internal(format!("tracing already initialized: {}", error)))?;

    let _ = LOG_GUARD.set(guard);
    Ok(())
}

/// Host path for logging: installs the file logger at the level named in `config.log_level`.
pub fn init_tracing_from_config(config: &DashboardConfig, log_dir: &Path) -> DashboardResult<()> {
    init_tracing(log_dir, &config.log_level)
}
