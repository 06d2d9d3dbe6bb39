//! Error types for the FieldSync engine.

use crate::{CollectionName, LocalId, SchemaVersion};
use thiserror::Error;

/// All possible errors from the FieldSync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("field '{field}' references unknown {collection} record '{reference}'")]
    DanglingReference {
        field: String,
        collection: CollectionName,
        reference: String,
    },

    // Local integrity errors
    #[error("record not found: {0}")]
    RecordNotFound(LocalId),

    #[error("record already exists: {0}")]
    RecordAlreadyExists(LocalId),

    #[error("invalid state for record {local_id}: {reason}")]
    InvalidState { local_id: LocalId, reason: String },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },
}

impl Error {
    /// Whether this error reports an inconsistency in local state rather than
    /// bad input.
    pub fn is_local_integrity(&self) -> bool {
        matches!(
            self,
            Error::RecordNotFound(_) | Error::RecordAlreadyExists(_) | Error::InvalidState { .. }
        )
    }

    pub(crate) fn invalid_state(local_id: &LocalId, reason: impl Into<String>) -> Self {
        Error::InvalidState {
            local_id: local_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
