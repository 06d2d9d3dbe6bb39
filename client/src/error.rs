//! Unified error handling for the client.

use crate::config::ConfigError;
use crate::remote::RemoteError;
use fieldsync_engine::LocalId;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Engine error: {0}")]
    Engine(#[from] fieldsync_engine::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Corrupt stored record {local_id}: {reason}")]
    Corrupt { local_id: LocalId, reason: String },
}

impl ClientError {
    /// Local store inconsistencies the caller must see, such as an update to
    /// a record that does not exist.
    pub fn is_local_integrity(&self) -> bool {
        match self {
            ClientError::Engine(e) => e.is_local_integrity(),
            ClientError::Corrupt { .. } => true,
            _ => false,
        }
    }

    /// Whether the remote store could not be reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Remote(e) if e.is_transient())
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
