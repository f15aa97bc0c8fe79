//! Error types for flyover.
//!
//! This module defines all error types used throughout the flyover crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for flyover operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
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

    // === Feed Errors ===
    /// Failed to connect to the position feed.
    #[error("failed to connect to feed at {address}: {source}")]
    FeedConnect {
        /// Address of the feed (`host:port` or file path).
        address: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Input Errors ===
    /// A report was well-formed JSON but is unusable.
    #[error("invalid report: {reason}")]
    InvalidReport {
        /// Why the report was rejected.
        reason: String,
    },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

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

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for flyover operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new invalid report error.
    #[must_use]
    pub fn invalid_report(reason: impl Into<String>) -> Self {
        Self::InvalidReport {
            reason: reason.into(),
        }
    }

    /// Create a new configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a feed connection error.
    #[must_use]
    pub fn feed_connect(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::FeedConnect {
            address: address.into(),
            source,
        }
    }

    /// Check if this error means a single report was skipped.
    #[must_use]
    pub fn is_invalid_report(&self) -> bool {
        matches!(self, Self::InvalidReport { .. } | Self::Json(_))
    }

    /// Check if this error comes from the feed connection.
    #[must_use]
    pub fn is_feed_error(&self) -> bool {
        matches!(self, Self::FeedConnect { .. } | Self::Io(_))
    }
}
