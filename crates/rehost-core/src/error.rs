//! Error types for the rehost migration engine.
//!
//! Errors are split into two families: failures contained to a single asset
//! (permanent-missing HTTP responses) and fatal failures that abort the run
//! with the checkpoint left at the last committed chunk.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the rehost library.
#[derive(Debug, Error)]
pub enum RehostError {
    // Network errors
    #[error("Network error fetching {url}: {message}")]
    Network {
        url: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    // Object storage errors
    #[error("Object storage rejected {key} with status {status}")]
    ObjectStoreStatus { key: String, status: u16 },

    #[error("Object storage error for {key}: {message}")]
    ObjectStore { key: String, message: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Datastore unavailable after reconnect: {message}")]
    DatastoreUnavailable { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Serialized metadata error at byte {offset}: {message}")]
    Codec { offset: usize, message: String },

    #[error("Invalid id list at line {line}: {message}")]
    InvalidIdList { line: usize, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Scheduling errors
    #[error("Asset worker failed: {message}")]
    Worker { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for rehost operations.
pub type Result<T> = std::result::Result<T, RehostError>;

impl From<std::io::Error> for RehostError {
    fn from(err: std::io::Error) -> Self {
        RehostError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RehostError {
    fn from(err: serde_json::Error) -> Self {
        RehostError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for RehostError {
    fn from(err: rusqlite::Error) -> Self {
        RehostError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for RehostError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        RehostError::Network {
            url,
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RehostError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        RehostError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error should trigger a retry of the fetch.
    ///
    /// Connection-level failures, server errors, request timeouts and rate
    /// limiting are transient. Everything else is settled on first sight.
    pub fn is_retryable(&self) -> bool {
        match self {
            RehostError::Network { .. } => true,
            RehostError::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Check if this error means the asset is gone for good.
    pub fn is_permanent_missing(&self) -> bool {
        matches!(
            self,
            RehostError::HttpStatus { status, .. } if is_permanent_missing_status(*status)
        )
    }

    /// Check if this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        !self.is_permanent_missing()
    }
}

/// HTTP statuses worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..600).contains(&status)
}

/// HTTP statuses that mark an asset as permanently unavailable.
pub fn is_permanent_missing_status(status: u16) -> bool {
    matches!(status, 400 | 401 | 403 | 404)
}
