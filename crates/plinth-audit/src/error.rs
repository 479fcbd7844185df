//! Error types for the audit crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during audit operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open the audit sink.
    #[error("failed to initialize audit log at {path}: {source}")]
    InitializationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to append or sync a record.
    #[error("failed to write audit record: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// Failed to read records back.
    #[error("failed to query audit records: {0}")]
    QueryFailed(String),

    /// The audit log was already closed.
    #[error("audit log is closed")]
    Closed,

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
