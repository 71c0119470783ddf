//! Error types for the entity codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding, decoding or storing entities.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Path or key could not be mapped.
    #[error("invalid entity key: {0}")]
    InvalidKey(#[from] reposync_types::Error),

    /// Repository content is not a valid entity payload.
    #[error("invalid payload at {path}: {source}")]
    InvalidPayload {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// A registered field transform rejected a value.
    #[error("transform for {entity} field {field:?} failed: {message}")]
    Transform {
        entity: String,
        field: String,
        message: String,
    },

    /// A table row is missing one of its key columns.
    #[error("row of {table} is missing key column {column:?}")]
    MissingKeyColumn { table: String, column: String },

    /// The host content store failed.
    #[error("entity source error: {0}")]
    Source(String),

    /// Canonical serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
