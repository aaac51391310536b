//! Logging infrastructure for navigator.
//!
//! Structured logging using the `tracing` ecosystem. Navigator keeps its own
//! log file, separate from the output of the runs it supervises.
//!
//! ## Features
//!
//! - JSON lines format for machine parsing
//! - File output to `~/.navigator/logs/navigator.log`
//! - Optional console output (disabled while the TUI owns the terminal)
//! - `-v` flag support for verbose logging
//!
//! ## Example
//!
//! ```no_run
//! use navigator_core::logging;
//!
//! let _guard = logging::init_logging(None, false, true).expect("logging init");
//!
//! tracing::info!("navigator started");
//! tracing::debug!(run_id = "a1b2", "launching run");
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{NavigatorError, Result};

/// Guard that must be held to ensure log flushing on shutdown.
///
/// Keep this guard alive for the lifetime of the application.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the navigator logging system.
///
/// # Arguments
///
/// * `log_dir` - Optional custom log directory. Defaults to `~/.navigator/logs/`
/// * `verbose` - If true, sets log level to DEBUG. Otherwise uses INFO.
/// * `console` - If true, also logs human-readable lines to stderr. Must be
///   false while the interactive UI is drawing on the alternate screen.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool, console: bool) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };

    std::fs::create_dir_all(&log_dir).map_err(|e| NavigatorError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "navigator.log");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("navigator={default_level}")));

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true);

    let console_layer = console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true)
            .with_file(verbose)
            .with_line_number(verbose)
            .compact()
            .boxed()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!(log_dir = %log_dir.display(), verbose, console, "logging initialized");

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Initialize minimal console-only logging for testing.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Get the navigator home directory (`~/.navigator`).
pub fn navigator_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".navigator"))
        .ok_or_else(|| NavigatorError::internal("home directory could not be determined"))
}

/// Get the default log directory path (`~/.navigator/logs/`).
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(navigator_home()?.join("logs"))
}

/// Log a run lifecycle event under the `navigator::run` target.
///
/// # Example
///
/// ```ignore
/// log_run_event!(run_id, "started");
/// log_run_event!(run_id, "finished", status = %status);
/// ```
#[macro_export]
macro_rules! log_run_event {
    ($run_id:expr, $event:expr) => {
        tracing::info!(
            target: "navigator::run",
            run_id = %$run_id,
            event = $event,
            "run event"
        )
    };
    ($run_id:expr, $event:expr, $($field:tt)*) => {
        tracing::info!(
            target: "navigator::run",
            run_id = %$run_id,
            event = $event,
            $($field)*,
            "run event"
        )
    };
}
