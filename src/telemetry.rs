//! Tracing subscriber setup.

use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Directives appended to the configured level to quiet chatty dependencies.
const QUIET_DEPENDENCIES: &str = "hyper=warn,tower_http=info,redis=warn";

static INITIALIZED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Tracing subscriber init failed: {0}")]
    Init(String),
}

/// Builds the filter: `RUST_LOG` when set, else the configured level plus
/// the quiet dependency defaults.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},{}", config.level, QUIET_DEPENDENCIES)))
        .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))
}

/// Installs the global tracing subscriber. Later calls return `Ok(())`
/// without touching the installed one.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let filter = match env_filter(config) {
        Ok(filter) => filter,
        Err(e) => {
            INITIALIZED.store(false, Ordering::SeqCst);
            return Err(e);
        }
    };

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .try_init(),
    };

    // Another subscriber installed outside this function still counts as set up.
    if let Err(e) = result {
        tracing::debug!(error = %e, "Global tracing subscriber already installed");
    }

    tracing::info!(format = ?config.format, level = %config.level, "Tracing initialized");
    Ok(())
}
