//! Error types for Tailor.
//!
//! Library crates use [`TailorError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Tailor operations.
#[derive(Debug, thiserror::Error)]
pub enum TailorError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Job store (database) error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Optimistic version check lost against a concurrent writer.
    #[error("version conflict: {message}")]
    Conflict { message: String },

    /// Object store (artifact/input document) error.
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// Network/HTTP error while talking to a capability provider.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Illegal job state transition or unknown job.
    #[error("job state error: {message}")]
    JobState { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TailorError>;

impl TailorError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a job state error from any displayable message.
    pub fn job_state(msg: impl Into<String>) -> Self {
        Self::JobState {
            message: msg.into(),
        }
    }

    /// Create a version conflict error from any displayable message.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
