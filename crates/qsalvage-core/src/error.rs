//! Error types for the qsalvage-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate,
//! with detailed error variants for different failure modes.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for qsalvage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all qsalvage operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read a segment file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to list the segment directory
    #[error("failed to read directory '{path}': {source}")]
    DirectoryRead {
        /// Path to the directory that failed to list
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Segment directory does not exist or is not a directory
    #[error("'{path}' is not a readable directory")]
    NotADirectory {
        /// The offending path
        path: PathBuf,
    },

    /// Invalid publish target configuration
    #[error("invalid publish target: {0}")]
    InvalidTarget(String),

    /// Invalid scanner configuration (e.g. empty marker pattern)
    #[error("invalid scanner configuration: {0}")]
    InvalidScannerConfig(String),

    /// Broker transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new directory read error
    pub fn directory_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new not-a-directory error
    pub fn not_a_directory(path: impl Into<PathBuf>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// Creates a new invalid target error
    pub fn invalid_target(msg: impl Into<String>) -> Self {
        Self::InvalidTarget(msg.into())
    }

    /// Creates a new invalid scanner configuration error
    pub fn invalid_scanner_config(msg: impl Into<String>) -> Self {
        Self::InvalidScannerConfig(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Failure modes of the broker transport.
///
/// The distinction matters for retry policy: [`TransportError::Transient`]
/// and [`TransportError::Nacked`] are retried per payload, while
/// [`TransportError::Connection`] triggers a bounded reconnect and, if
/// that fails too, aborts the whole session.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Unable to establish or keep the broker connection
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// A single publish timed out or was refused under flow control
    #[error("publish did not complete: {0}")]
    Transient(String),

    /// The broker negatively acknowledged a confirmed publish
    #[error("broker rejected the message (nack)")]
    Nacked,
}

impl TransportError {
    /// Creates a new connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a new transient publish error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Returns true if retrying the same publish on the same connection
    /// may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Nacked)
    }
}
