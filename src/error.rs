//! Error types for SES Intake.

use std::time::Duration;

use crate::form::state::FormStep;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Photo error: {0}")]
    Photo(#[from] PhotoError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to download file on channel {name}: {reason}")]
    DownloadFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Outcome of a failed attempt to persist a confirmed draft.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Submitter {submitter_id} already submitted; cooldown ends in {remaining:?}")]
    Duplicate {
        submitter_id: i64,
        remaining: Duration,
    },

    #[error("Draft is missing required field: {field}")]
    Incomplete { field: &'static str },

    #[error("Storage failure: {0}")]
    Storage(#[from] DatabaseError),
}

/// An inbound event that does not fit the session's current step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unexpected {input} while {step}")]
pub struct MalformedInput {
    pub step: FormStep,
    pub input: String,
}

/// Photo retrieval/storage errors.
#[derive(Debug, thiserror::Error)]
pub enum PhotoError {
    #[error("Could not fetch photo {file_id}: {source}")]
    Fetch {
        file_id: String,
        #[source]
        source: ChannelError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Report export errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("{format} rendering failed: {reason}")]
    Render { format: String, reason: String },

    #[error("Storage failure: {0}")]
    Storage(#[from] DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
