use anyhow::{Context, Result};
use chorus::config::APP_STRATEGY;
use etcetera::{choose_app_strategy, AppStrategy};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "chorus=info";

/// Directory holding the daily log files.
fn log_dir() -> Result<PathBuf> {
    let dir = choose_app_strategy(APP_STRATEGY.clone())
        .context("chorus requires a home directory")?
        .in_data_dir("logs");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    Ok(dir)
}

/// Sends logs to a daily-rotated file so they never interleave with streamed
/// replies. `RUST_LOG` overrides the default filter.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the writer.
pub fn setup_logging(name: Option<&str>) -> Result<WorkerGuard> {
    let file_name = format!("{}.log", name.unwrap_or("chorus"));
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir()?, file_name);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    Ok(guard)
}
