//! tracing subscriber setup.

use crate::config::{LogFormat, LoggingSection};
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Build the event filter. `RUST_LOG` wins over the configured directives,
/// and `verbose` forces debug output for this crate.
pub fn env_filter(directives: &str, verbose: bool) -> Result<EnvFilter> {
    if verbose {
        return EnvFilter::try_new("info,pulsewatch=debug").context("Invalid log filter");
    }
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid log filter '{}'", directives)),
    }
}

/// Install the global subscriber, writing to stderr from a background thread.
///
/// The returned guard flushes pending lines when dropped; keep it alive for
/// the lifetime of the process.
pub fn init(config: &LoggingSection, verbose: bool) -> Result<WorkerGuard> {
    let filter = env_filter(&config.filter, verbose)?;
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let installed = match config.format {
        LogFormat::Pretty => builder.with_target(false).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;

    Ok(guard)
}
