//! Error types for listing-ingest
//!
//! This module provides the error handling for the library:
//! - A top-level [`Error`] with contextual variants (config, database, fetch, backup, ...)
//! - [`DatabaseError`] for sink failures with a description of the failed step
//! - [`FailureKind`], the pipeline's failure taxonomy, used for statistics and logs
//!
//! Only [`Error::Config`] is fatal to a session. Every other failure is
//! counted and the session continues.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for listing-ingest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for listing-ingest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "flush_threshold")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Page could not be retrieved
    #[error("fetch error for page {page}: {message}")]
    Fetch {
        /// Page number that failed
        page: u32,
        /// What went wrong
        message: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backup batch could not be written
    #[error("backup write failed at {path}: {reason}")]
    Backup {
        /// Target file of the failed write
        path: PathBuf,
        /// The reason the write failed
        reason: String,
    },

    /// Session state file could not be read or written
    #[error("session state error: {0}")]
    State(String),

    /// A worker-private fetch context could not be created
    #[error("worker {worker_id} could not acquire a fetch context: {message}")]
    ResourceAcquisition {
        /// Worker that failed to start
        worker_id: usize,
        /// Underlying failure
        message: String,
    },

    /// Operation stopped by the shutdown signal
    #[error("cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Failure categories reported by the pipeline
///
/// Every category except [`FailureKind::Config`] is recovered from locally:
/// the record, page, flush or worker is skipped and counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Record malformed; skipped
    Validation,
    /// Page could not be fetched; page skipped
    Fetch,
    /// Page had no recognisable structure; treated as zero records
    Parse,
    /// Bulk write rejected; batch routed to backup
    Sink,
    /// Backup or state file could not be written or read
    Persistence,
    /// Worker-private context could not be created; that worker exits
    ResourceAcquisition,
    /// Invalid startup configuration; the only fatal category
    Config,
    /// Session interrupted
    Cancelled,
    /// Anything else
    Other,
}

impl FailureKind {
    /// Machine-readable code used in log fields
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation_failure",
            FailureKind::Fetch => "fetch_failure",
            FailureKind::Parse => "parse_failure",
            FailureKind::Sink => "sink_failure",
            FailureKind::Persistence => "persistence_failure",
            FailureKind::ResourceAcquisition => "resource_acquisition_failure",
            FailureKind::Config => "config_error",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Other => "other",
        }
    }

    /// Whether this failure must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::Config)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl Error {
    /// Classify this error into the pipeline's failure taxonomy
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Config { .. } => FailureKind::Config,
            Error::Database(_) => FailureKind::Sink,
            Error::Fetch { .. } => FailureKind::Fetch,
            Error::Backup { .. } | Error::State(_) => FailureKind::Persistence,
            Error::Serialization(_) => FailureKind::Parse,
            Error::ResourceAcquisition { .. } => FailureKind::ResourceAcquisition,
            Error::Cancelled => FailureKind::Cancelled,
            Error::Other(_) => FailureKind::Other,
        }
    }

    /// Shorthand for a configuration error tied to a config key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
