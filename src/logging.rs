/*!
 * Logging and tracing initialization
 *
 * Worker pools report per-entry failures as log records, so the two sinks are
 * tuned differently: the console stays compact next to the interactive status
 * line, while the file sink writes JSON with thread ids so one pool worker's
 * records can be followed through a run.
 */

use std::fs::File;
use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::BackupConfig;
use crate::error::{Result, UmbraError};

/// Destination for a run's log records
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogSink {
    /// Compact console lines alongside the status renderer
    Console,
    /// JSON lines written to a file
    File(PathBuf),
}

impl LogSink {
    fn from_config(config: &BackupConfig) -> Self {
        match config.log_file {
            Some(ref path) => LogSink::File(path.clone()),
            None => LogSink::Console,
        }
    }
}

/// Effective verbosity for a run: `verbose` forces DEBUG, everything else
/// follows the configured level
fn effective_level(config: &BackupConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

/// Filter directives for a run. `RUST_LOG` wins when set; otherwise the crate
/// logs at the effective level and dependencies stay at warn, so per-entry
/// pool errors are not drowned out by third-party chatter.
fn env_filter(level: Level) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("warn,umbra={}", level)))
        .map_err(|e| UmbraError::Config(format!("Failed to create log filter: {}", e)))
}

/// Initialize structured logging for a backup or validation run
pub fn init_logging(config: &BackupConfig) -> Result<()> {
    let filter = env_filter(effective_level(config))?;

    match LogSink::from_config(config) {
        LogSink::Console => {
            let layer = fmt::layer().compact().with_target(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LogSink::File(path) => {
            let file = File::create(&path).map_err(|e| {
                UmbraError::Config(format!(
                    "Failed to create log file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            // Pool workers are anonymous threads; ids are the only way to
            // tell their interleaved records apart
            let layer = fmt::layer()
                .json()
                .with_writer(file)
                .with_ansi(false)
                .with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }

    Ok(())
}

/// Test-writer logging; first caller wins so parallel tests can all ask
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let layer = fmt::layer().with_test_writer().with_target(false).compact();
        tracing_subscriber::registry()
            .with(EnvFilter::new("umbra=debug"))
            .with(layer)
            .try_init()
            .ok();
    });
}
