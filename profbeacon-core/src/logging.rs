//! Logging for profbeacon
//!
//! The pipeline logs through `tracing` to a daily-rotated file under the XDG
//! state directory (`~/.local/state/profbeacon/profbeacon.log`). Lines are
//! plain text with structured fields rather than prose, so a capture can be
//! followed from window to upload with grep:
//!
//! - `window`: capture window number, on scheduler and read-out lines
//! - `generation`: flush generation a profile was captured under
//! - `entry_id`, `key`, `bytes`: upload queue entry, storage key and body size
//! - `raw_bytes`, `compressed_bytes`, `purge_ms`: pack worker output
//! - `category`, `action`, `elapsed_ms`: usage events from [`LogUsage`](crate::usage::LogUsage)
//!
//! `RUST_LOG` overrides the configured level, e.g.
//! `RUST_LOG=profbeacon_core::queue=debug,info` to trace queue digests.

use crate::config::{Config, LoggingConfig};
use std::path::PathBuf;
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const DEFAULT_LEVEL: &str = "info";

/// Initialize file logging.
///
/// Keeps `max_files` daily files. The returned guard flushes the
/// non-blocking writer when dropped, so hold it for the life of the process.
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = Config::state_dir();

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("profbeacon.log")
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| crate::error::Error::Config(format!("failed to create log appender: {}", e)))?;

    // uploads and the pack worker never wait on disk
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer(non_blocking))
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Filter for a configured level, falling back to `info` when it does not parse.
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Plain-text layer used for the log file.
fn file_layer<S, W>(writer: W) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
}

/// Initialize logging for tests (logs to the test writer)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Keeps the non-blocking log writer alive.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Returns the log file path
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}
