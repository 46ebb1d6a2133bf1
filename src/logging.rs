//! Tracing subscriber setup.
//!
//! Logs always go to stderr. When [`LoggingConfig::log_dir`] is set, a
//! daily-rolling file is written there as well. `RUST_LOG` overrides the
//! configured level.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::{KestrelError, Result};

/// File name prefix for rolling log files.
pub const LOG_FILE_PREFIX: &str = "kestrel.log";

/// Build the filter, preferring `RUST_LOG` over the configured directives.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| {
        KestrelError::Configuration(format!("invalid log level '{}': {e}", config.level))
    })
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for as long as file logging should
/// flush; dropping it stops the background writer.
///
/// # Errors
/// Returns [`KestrelError::Configuration`] for an unparsable level or when a
/// global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| KestrelError::Configuration(format!("logging already initialised: {e}")))?;

    Ok(guard)
}
