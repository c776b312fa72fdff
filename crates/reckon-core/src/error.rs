use thiserror::Error;

/// Errors surfaced by the issue store and the semaphore.
///
/// Absent keys, partitions and lock rows are never errors; they produce empty
/// results. Lock contention is a successful `Lock` with `acquired == false`.
#[derive(Debug, Error)]
pub enum ReckonError {
    /// The KV engine or the coordination store could not be reached or queried.
    #[error("storage unavailable during {operation}: {message}")]
    StorageUnavailable {
        operation: &'static str,
        message: String,
    },

    /// A persisted row exists but could not be decoded.
    #[error("corrupt {what}: {message}")]
    Corrupt { what: &'static str, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ReckonError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn corrupt(what: &'static str, message: impl Into<String>) -> Self {
        Self::Corrupt {
            what,
            message: message.into(),
        }
    }

    /// Poisoned in-process locks are reported like an unreachable backend.
    pub(crate) fn poisoned(operation: &'static str) -> Self {
        Self::storage(operation, "lock poisoned by a panicking writer")
    }

    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }
}

impl From<rusqlite::Error> for ReckonError {
    fn from(err: rusqlite::Error) -> Self {
        ReckonError::storage("sqlite", err.to_string())
    }
}

impl From<serde_json::Error> for ReckonError {
    fn from(err: serde_json::Error) -> Self {
        ReckonError::corrupt("json payload", err.to_string())
    }
}

impl From<tokio::task::JoinError> for ReckonError {
    fn from(err: tokio::task::JoinError) -> Self {
        ReckonError::storage("blocking task", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReckonError>;
