//! Error types for playgate-core operations.
//!
//! Every variant is recoverable. Callers retry on the next natural trigger
//! (sweep, focus, next request) instead of aborting.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to lock store {path}: {source}")]
    StoreLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Input Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Task description is empty")]
    EmptyTask,
}

impl GateError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        GateError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        GateError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using GateError.
pub type Result<T> = std::result::Result<T, GateError>;

impl From<GateError> for String {
    fn from(err: GateError) -> String {
        err.to_string()
    }
}
