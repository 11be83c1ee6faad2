//! Unified error types for simstore.
//!
//! Every store operation reports failures through [`Error`]. Variants are
//! grouped into a small taxonomy by [`Error::kind`] so callers can decide how
//! to react without matching on backend details:
//! - [`ErrorKind::NotFound`]: a requested record id is not held by the store
//! - [`ErrorKind::Corrupt`]: a snapshot is missing, unreadable or incompatible
//! - [`ErrorKind::Configuration`]: a config mapping failed to build a store
//! - [`ErrorKind::InvalidInput`]: malformed embeddings or mismatched batches

use std::fmt;
use std::path::PathBuf;

use serde_json::Value;

use crate::record::RecordId;

/// Result type alias for simstore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for simstore.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested record id is not held by the store.
    #[error("record {id} not found")]
    NotFound {
        /// The missing id.
        id: RecordId,
    },

    /// A snapshot could not be read back.
    #[error("corrupt snapshot at {}: {reason}", .path.display())]
    Corrupt {
        /// Location of the snapshot.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A config mapping could not be turned into a store.
    #[error("error when deserializing '{backend}' using config={config}: {source}")]
    Config {
        /// Name of the backend that rejected the mapping.
        backend: &'static str,
        /// The mapping as it was supplied.
        config: Value,
        /// The underlying construction failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Caller supplied malformed input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Embedding length does not match the store's fixed dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured on the store.
        expected: usize,
        /// Length of the rejected embedding.
        actual: usize,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error.
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row read back from the storage engine could not be decoded.
    #[error("malformed stored record: {0}")]
    Malformed(String),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// A lock was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    Lock(String),
}

/// Coarse categories of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Unknown record id.
    NotFound,
    /// Missing, unreadable or incompatible snapshot.
    Corrupt,
    /// Config mapping rejected by a backend.
    Configuration,
    /// Malformed embeddings or mismatched batch columns.
    InvalidInput,
    /// Storage engine, I/O or runtime failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::Corrupt => "corrupt",
            Self::Configuration => "configuration",
            Self::InvalidInput => "invalid input",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Create a not-found error for `id`.
    #[must_use]
    pub const fn not_found(id: RecordId) -> Self {
        Self::NotFound { id }
    }

    /// Create a corrupt-snapshot error.
    #[must_use]
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Wrap a construction failure together with the offending config.
    #[must_use]
    pub fn config<E>(backend: &'static str, config: Value, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            backend,
            config,
            source: Box::new(source),
        }
    }

    /// The taxonomy bucket this error falls into.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::Config { .. } => ErrorKind::Configuration,
            Self::InvalidInput(_) | Self::DimensionMismatch { .. } => ErrorKind::InvalidInput,
            _ => ErrorKind::Internal,
        }
    }

    /// Returns `true` for [`ErrorKind::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }
}
