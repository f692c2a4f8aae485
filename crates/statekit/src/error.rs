//! Error types for state handles and locks.

use crate::types::LockInfo;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading, writing or locking state.
#[derive(Debug, Error)]
pub enum Error {
    /// The lock is already held by another operation
    #[error("state already locked\n{info}")]
    LockHeld {
        /// Annotation of the current lock holder
        info: Box<LockInfo>,
    },

    /// Unlock was called with an id that does not match the held lock
    #[error("lock id {given:?} does not match existing lock {held:?}")]
    LockIdMismatch {
        /// Id passed to unlock
        given: String,
        /// Id of the lock currently held
        held: String,
    },

    /// State file could not be read or written
    #[error("failed to access state file {path}: {source}")]
    StateFile {
        /// Path of the state file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// State could not be encoded or decoded
    #[error("failed to encode state: {0}")]
    Encode(String),

    /// Nothing has been written yet, so there is nothing to persist
    #[error("no state has been written to persist")]
    NothingToPersist,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means another operation holds the lock.
    pub fn is_lock_held(&self) -> bool {
        matches!(self, Self::LockHeld { .. })
    }

    /// The holder's lock annotation, if this is a contention error.
    pub fn lock_info(&self) -> Option<&LockInfo> {
        match self {
            Self::LockHeld { info } => Some(info),
            _ => None,
        }
    }
}

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, Error>;
