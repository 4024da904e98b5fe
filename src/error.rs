//! Error handling for the shareholder registry system
//!
//! This module provides idiomatic Rust error types using thiserror, split
//! along the failure taxonomy of the ingestion pipeline: file/parse errors
//! are fatal before any session state exists, backend errors are retryable
//! per batch, session errors signal invalid lifecycle transitions.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the registry system
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while reading and normalizing registry files.
///
/// These are the only fatal errors of an import run: they fire before a
/// session is created and before any rate-limited quota is consumed.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Unsupported file type '{extension}', expected csv, xlsx or xls")]
    UnsupportedFile { extension: String },

    #[error("No valid shareholder rows found in '{path}' ({dropped} rows dropped)")]
    EmptyFile { path: String, dropped: usize },

    #[error("Missing header row in '{path}'")]
    MissingHeader { path: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(Uuid),

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Session {0} is completed or failed and cannot be resumed")]
    NotRecoverable(Uuid),

    #[error("Session {session_id} belongs to year {actual}, requested year {requested}")]
    YearMismatch {
        session_id: Uuid,
        actual: i32,
        requested: i32,
    },
}

/// Errors from the remote (or in-memory) registry backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether a batch submission hitting this error should be retried.
    ///
    /// Connection failures, timeouts, 429 and 5xx responses are transient;
    /// 4xx responses and session errors are not going to heal on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            BackendError::Unavailable(_) => true,
            BackendError::Decode(_) | BackendError::Session(_) => false,
        }
    }
}

/// Convenience alias used across the crate
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_retryability() {
        assert!(BackendError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(BackendError::Status {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!BackendError::Status {
            status: 400,
            body: "bad request".into()
        }
        .is_retryable());
    }

    #[test]
    fn session_errors_are_not_retryable() {
        let err = BackendError::Session(SessionError::NotFound(Uuid::nil()));
        assert!(!err.is_retryable());
    }
}
