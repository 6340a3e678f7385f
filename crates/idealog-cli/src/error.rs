use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] idealog_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No draft content provided")]
    EmptyContent,
    #[error("Idea title cannot be empty")]
    EmptyTitle,
    #[error("Invalid record id: {0}")]
    InvalidId(String),
    #[error("Invalid date '{0}': expected YYYY-MM-DD, an RFC 3339 timestamp, or Unix milliseconds")]
    InvalidDate(String),
    #[error("{collection} {id} not found")]
    RecordNotFound { collection: &'static str, id: String },
    #[error("Nothing to change: pass at least one field to update")]
    EmptyEdit,
    #[error(
        "Remote store is not configured. Set IDEALOG_REMOTE_URL (and IDEALOG_REMOTE_TOKEN if the backend requires one)."
    )]
    RemoteNotConfigured,
    #[error("Refusing to replace local data without confirmation. Re-run with --yes.")]
    ConfirmationRequired,
}
