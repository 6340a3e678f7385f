//! Error types for idealog-core

use thiserror::Error;

/// Result type alias using idealog-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in idealog-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Storage failure reported as text (shared by every waiter of a failed batch)
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error from the local storage medium
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Required field missing or malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network, auth, or quota failure from the remote store driver
    #[error("Remote store error: {message}")]
    Remote {
        /// Human readable failure description
        message: String,
        /// Whether retrying the same call may succeed
        retryable: bool,
    },

    /// Additive sync was requested while local changes are still unpushed
    #[error("Cannot sync: push {pending} pending local change(s) first")]
    PreconditionFailed {
        /// Number of records still waiting for a push
        pending: usize,
    },

    /// No user is signed in
    #[error("No authenticated user")]
    NotAuthenticated,

    /// The engine's background tasks are no longer running
    #[error("Sync engine has been shut down")]
    Shutdown,
}

impl Error {
    /// Build a remote failure.
    pub fn remote(message: impl Into<String>, retryable: bool) -> Self {
        Self::Remote {
            message: message.into(),
            retryable,
        }
    }

    /// Whether a caller may retry the failed operation as-is.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Remote {
                retryable: true,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_message_names_pending_count() {
        let error = Error::PreconditionFailed { pending: 3 };
        assert!(error.to_string().contains('3'));
    }

    #[test]
    fn only_retryable_remote_errors_are_retryable() {
        assert!(Error::remote("timeout", true).is_retryable());
        assert!(!Error::remote("forbidden", false).is_retryable());
        assert!(!Error::Validation("title".into()).is_retryable());
    }
}
