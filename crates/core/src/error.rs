//! Error types for the relata engine.
//!
//! A single `Error` enum covers every public failure; `thiserror` provides
//! the `Display` and `Error` implementations. `Error::kind()` classifies a
//! failure into the coarse [`ErrorKind`] categories callers branch on
//! (missing file, log full, corruption, ...).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for relata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the relata storage engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Database file does not exist (open with `must_exist`)
    #[error("no such database: {0}")]
    NotFound(PathBuf),

    /// Database file already exists (open with `create_new`)
    #[error("database already exists: {0}")]
    Exists(PathBuf),

    /// The write-ahead log file could not be opened or created
    #[error("cannot open log file {path}: {source}")]
    LogOpen {
        /// Path of the log file
        path: PathBuf,
        /// Underlying I/O failure
        source: io::Error,
    },

    /// This process already holds an open handle for the database
    #[error("database is already open in this process: {0}")]
    AlreadyOpen(PathBuf),

    /// Another process holds the advisory lock on the database
    #[error("database is in use by another process: {0}")]
    InUse(PathBuf),

    /// The log cannot accept a record without overwriting live data
    ///
    /// Returned by commit when the ring buffer is full. Callers retry
    /// after the next checkpoint frees space.
    #[error("log full: record needs {needed} bytes, {available} available before checkpoint")]
    LogFull {
        /// Size of the refused record in bytes
        needed: u64,
        /// Free bytes ahead of the last checkpoint
        available: u64,
    },

    /// The write-ahead log or snapshot contains invalid data
    #[error("corrupt log: {0}")]
    CorruptLog(String),

    /// The handle was latched read-only after a log write failure
    #[error("database is read-only after a log write failure")]
    ReadOnlyDatabase,

    /// A write operation was issued on a read-only transaction
    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    /// Delete of a relationship that is not in the store
    ///
    /// The whole transaction rolls back; no partial state survives.
    #[error("no such relationship: ({key_a} {val_a}, {key_b} {val_b}) from {rel_source}")]
    MissingTuple {
        /// First key, resolved form
        key_a: String,
        /// First value, display form
        val_a: String,
        /// Second key, resolved form
        key_b: String,
        /// Second value, display form
        val_b: String,
        /// Source that was required to match
        rel_source: String,
    },

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::CorruptLog(e.to_string())
    }
}

/// Coarse error categories mirroring the engine's public error contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing database file or missing relationship
    NotFound,
    /// Database file already exists
    Exists,
    /// Log file could not be opened
    LogOpen,
    /// Handle already open in this process
    Open,
    /// Advisory lock held elsewhere
    InUse,
    /// Ring buffer full ahead of the checkpoint
    LogFull,
    /// Invalid log or snapshot contents
    CorruptLog,
    /// Handle or transaction refuses writes
    ReadOnly,
    /// Underlying I/O failure
    Io,
}

impl Error {
    /// Classify this error into its [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) | Error::MissingTuple { .. } => ErrorKind::NotFound,
            Error::Exists(_) => ErrorKind::Exists,
            Error::LogOpen { .. } => ErrorKind::LogOpen,
            Error::AlreadyOpen(_) => ErrorKind::Open,
            Error::InUse(_) => ErrorKind::InUse,
            Error::LogFull { .. } => ErrorKind::LogFull,
            Error::CorruptLog(_) => ErrorKind::CorruptLog,
            Error::ReadOnlyDatabase | Error::ReadOnlyTransaction => ErrorKind::ReadOnly,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Check whether retrying after a checkpoint can succeed.
    pub fn is_log_full(&self) -> bool {
        matches!(self, Error::LogFull { .. })
    }

    /// Check whether this error indicates on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CorruptLog(_))
    }
}
