//! Error types for replaybuffer.
//!
//! This module defines all error types used throughout the replaybuffer crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for replaybuffer operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Segment Buffer Errors ===
    /// The shared segment directory is missing or unreadable.
    #[error("segment directory {path} is unavailable: {source}")]
    DirectoryUnavailable {
        /// Path to the segment directory.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Fewer complete segments exist than the window requires.
    #[error("not enough complete segments yet: have {available}, need {required}")]
    InsufficientData {
        /// Number of complete segments on disk.
        available: usize,
        /// Number of segments the window requires.
        required: usize,
    },

    /// Another assembly already holds the assembly flag.
    #[error("an assembly is already in progress")]
    AssemblyInProgress,

    // === External Tool Errors ===
    /// The muxer could not be launched or exited unsuccessfully.
    #[error("muxer '{muxer}' failed: {message}")]
    MuxerFailure {
        /// Name of the muxer.
        muxer: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// The segment producer could not be started or supervised.
    #[error("segment producer failed: {message}")]
    Producer {
        /// Description of what went wrong.
        message: String,
    },

    /// A trigger source failed.
    #[error("trigger source '{name}' failed: {message}")]
    Trigger {
        /// Name of the trigger source.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// A remote store command failed.
    #[error("remote store '{store}' failed to {operation}: {message}")]
    Remote {
        /// Name of the remote store.
        store: &'static str,
        /// The operation that failed.
        operation: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === Ledger Errors ===
    /// Failed to open or create the upload ledger.
    #[error("failed to open upload ledger at {path}: {source}")]
    LedgerOpen {
        /// Path to the ledger file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A ledger query failed.
    #[error("upload ledger query failed: {0}")]
    LedgerQuery(#[from] rusqlite::Error),

    /// Failed to run ledger migrations.
    #[error("upload ledger migration failed: {message}")]
    LedgerMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// External tool output was not the expected JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for replaybuffer operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a muxer failure error.
    #[must_use]
    pub fn muxer(muxer: &'static str, message: impl Into<String>) -> Self {
        Self::MuxerFailure {
            muxer,
            message: message.into(),
        }
    }

    /// Create a producer error.
    #[must_use]
    pub fn producer(message: impl Into<String>) -> Self {
        Self::Producer {
            message: message.into(),
        }
    }

    /// Create a trigger source error.
    #[must_use]
    pub fn trigger(name: &'static str, message: impl Into<String>) -> Self {
        Self::Trigger {
            name,
            message: message.into(),
        }
    }

    /// Create a remote store error.
    #[must_use]
    pub fn remote(store: &'static str, operation: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            store,
            operation,
            message: message.into(),
        }
    }

    /// Check if this error only means the buffer has not filled yet.
    #[must_use]
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }

    /// Check if this error means the trigger was dropped because an
    /// assembly was already running.
    #[must_use]
    pub fn is_assembly_in_progress(&self) -> bool {
        matches!(self, Self::AssemblyInProgress)
    }
}
