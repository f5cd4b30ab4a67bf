// src/infra/errors.rs — Error types for Sparrow

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SparrowError {
    // Backend RPC errors (surfaced as notifications, never retried)
    #[error("Backend call '{operation}' failed: {message}")]
    Backend { operation: String, message: String },

    #[error("Chat session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Session '{id}' is not {expected}")]
    InvalidLifecycle { id: String, expected: &'static str },

    // Stream errors
    #[error("A response is still streaming")]
    StreamInFlight,

    #[error("No model is currently loaded. Please load a model first.")]
    NoModelLoaded,

    #[error("Generation failed: {0}")]
    Generation(String),

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SparrowError {
    pub fn backend(operation: &str, message: impl std::fmt::Display) -> Self {
        SparrowError::Backend {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    /// Errors the user can reasonably retry by resending.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SparrowError::Backend { .. }
                | SparrowError::Generation(_)
                | SparrowError::StreamInFlight
                | SparrowError::Io(_)
        )
    }
}
