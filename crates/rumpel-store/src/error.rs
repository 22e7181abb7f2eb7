//! Error types for rumpel-store.

use std::path::PathBuf;

/// Result type for rumpel-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rumpel-store.
///
/// Any of these is a `StorageError` from the caller's point of view: the
/// operation that produced it is dropped and nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Sample rejected before it reached the database.
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    /// A previous holder of the connection lock panicked.
    #[error("Store lock poisoned")]
    LockPoisoned,
}
