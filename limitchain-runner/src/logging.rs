//! Structured logging initialization.

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Selects the JSON formatter when set to `json`.
pub const LOG_FORMAT_ENV: &str = "LIMITCHAIN_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info,limitchain=debug";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

/// Initialize structured logging.
///
/// `RUST_LOG` overrides the default filter. JSON output when
/// `LIMITCHAIN_LOG_FORMAT=json`, compact human output otherwise. Logs go
/// to stderr so command output on stdout stays clean.
pub fn init_logging() -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}
