//! Tracing subscriber setup.
//!
//! Development runs log pretty text to stdout. Production runs (`logging.production`)
//! write one JSON object per event to daily files and mirror a compact,
//! colourless line to stdout for the journal. Each JSON event carries the
//! `device` span, so the watch's `service` and `peer` travel with every
//! record the device loop emits.

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vitalwatch_core::LoggingConfig;

/// Environment variable consulted when `RUST_LOG` is not set.
pub const LOG_LEVEL_ENV: &str = "VITALWATCH_LOG_LEVEL";

/// Prefix of the daily log files, e.g. `vitalwatch.2026-10-19.log`.
const LOG_FILE_PREFIX: &str = "vitalwatch";

// Flushed on drop, so they live as long as the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber.
///
/// The filter is `RUST_LOG` if set. Otherwise `VITALWATCH_LOG_LEVEL` (default
/// `info`) applies to the gateway while the Bluetooth stack and hyper are
/// held at `warn`.
///
/// # Errors
///
/// Returns an error if the filter does not parse or, in production, if the
/// log directory cannot be created.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
            EnvFilter::try_new(default_directives(&level))
                .with_context(|| format!("invalid {LOG_LEVEL_ENV} '{level}'"))?
        }
    };

    if config.production {
        init_production(env_filter, config)
    } else {
        init_development(env_filter);
        Ok(())
    }
}

/// Filter directives for `level`, with noisy dependencies capped at `warn`.
fn default_directives(level: &str) -> String {
    format!("{level},bluer=warn,hyper=warn,hyper_util=warn")
}

fn init_production(env_filter: EnvFilter, config: &LoggingConfig) -> anyhow::Result<()> {
    let log_dir = config.directory.clone().unwrap_or_else(log_directory);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.retained_files)
        .build(&log_dir)
        .context("opening rolling log file")?;

    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(file_writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    tracing::info!(
        directory = %log_dir.display(),
        retained_files = config.retained_files,
        "File logging enabled"
    );
    Ok(())
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Default log directory: `/var/log/vitalwatch` on Linux, the platform data
/// dir elsewhere.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/vitalwatch")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "vitalwatch").map_or_else(
            || PathBuf::from("./logs"),
            |dirs| dirs.data_dir().join("logs"),
        )
    }
}
