//! services/api/src/error.rs
//!
//! Errors that stop the sync service from starting or shutting down cleanly.
//! Request-level failures never reach this type; handlers map them to status
//! codes themselves.

use crate::config::ConfigError;
use custodyx_core::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A required variable is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The device's local record file could not be opened.
    #[error("Local storage error: {0}")]
    Port(#[from] PortError),

    /// Connecting to Postgres or applying the schema migrations failed.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Binding the listen address or serving requests failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The auth event listener panicked instead of stopping on shutdown.
    #[error("Auth listener failed: {0}")]
    Listener(#[from] tokio::task::JoinError),
}
