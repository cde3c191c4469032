//! Logging setup shared by SerinDB router binaries.
use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build an env filter from `RUST_LOG`, falling back to `default_directive`.
pub fn env_filter(default_directive: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| anyhow!("invalid log filter {default_directive:?}: {e}")),
    }
}

/// Initialize human-readable logging on stderr.
pub fn init_stdout(default_directive: &str) -> Result<()> {
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    tracing_subscriber::registry()
        .with(env_filter(default_directive)?)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("logging already initialized: {e}"))
}

/// Initialize structured JSON logging with hourly rolling files.
/// `dir` – log directory, `level` – initial log level.
/// The returned guard flushes buffered lines when dropped; keep it alive for the process lifetime.
pub fn init(dir: &str, level: Level) -> Result<WorkerGuard> {
    let file_appender = RollingFileAppender::new(Rotation::HOURLY, dir, "serin-router.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .json()
        .with_current_span(false)
        .with_span_list(false);

    tracing_subscriber::registry()
        .with(EnvFilter::default().add_directive(level.into()))
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("logging already initialized: {e}"))?;
    Ok(guard)
}
