//! Subscriber installation for hosts that don't bring their own.
//!
//! The crate only emits `tracing` events; nothing is printed unless a
//! subscriber is installed. Every event of a cache instance carries the
//! `cache{backend=...}` span.

use thiserror::Error;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Log to standard error. `RUST_LOG` wins over `default_filter` when set.
pub fn init_stderr(default_filter: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(default_filter)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}

/// Log to an injected sink, e.g. a file or an in-memory buffer.
pub fn init_with_writer<W>(filter: &str, writer: W) -> Result<(), LoggingError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(parse_filter(filter)?)
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}

fn parse_filter(filter: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(filter).map_err(|e| LoggingError::InvalidFilter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })
}
