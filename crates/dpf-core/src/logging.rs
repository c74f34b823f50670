//! Logging setup.
//!
//! Installs a global `tracing` subscriber writing to stderr. Verbosity is
//! read from `RUST_LOG` and defaults to `info`.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "info";

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// `RUST_LOG` could not be parsed.
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    /// Another global subscriber is already installed.
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(String),
}

/// Initialize tracing for the process.
///
/// Subsequent calls are no-ops.
pub fn init() -> Result<(), LoggingError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)?,
        _ => EnvFilter::new(DEFAULT_DIRECTIVE),
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|err| LoggingError::SetGlobal(err.to_string()))?;

    let _ = INITIALIZED.set(());
    Ok(())
}
