// Logging module for structured logging using the tracing crate

use crate::config::{LogFormat, LoggingConfig};
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Logging setup failure
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{0}': {1}")]
    InvalidFilter(String, String),

    #[error("Failed to initialize subscriber: {0}")]
    InitError(String),
}

/// Build the level filter: `RUST_LOG` wins over the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .map_err(|e| LoggingError::InvalidFilter(directives, e.to_string())),
        _ => EnvFilter::try_new(&config.level)
            .map_err(|e| LoggingError::InvalidFilter(config.level.clone(), e.to_string())),
    }
}

/// Initialize the global tracing subscriber.
///
/// Events go to stderr, as JSON lines or in the human-readable pretty format.
/// Calling this more than once is a no-op.
///
/// ```
/// use bulk_watermarker::config::LoggingConfig;
/// use bulk_watermarker::logging::init_subscriber;
///
/// init_subscriber(&LoggingConfig::default()).unwrap();
/// tracing::info!("Application started");
/// ```
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), LoggingError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = build_filter(config)?;
    let registry = Registry::default().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };

    match result {
        Ok(()) => {
            let _ = INITIALIZED.set(());
            Ok(())
        }
        // Another subscriber (e.g. a test harness) already owns the global slot
        Err(_) if tracing::dispatcher::has_been_set() => {
            let _ = INITIALIZED.set(());
            Ok(())
        }
        Err(e) => Err(LoggingError::InitError(e.to_string())),
    }
}
