//! Remote repository adapter.
//!
//! The remote store is the system of record. The client only needs three
//! calls from it and a two-way classification of failures: `Unreachable`
//! never marks a record failed, `Rejected` always does.

mod memory;

pub use memory::{InMemoryRemote, RemoteCalls};

use async_trait::async_trait;
use fieldsync_engine::{Fields, Filter, RemoteId, RemoteRecord};

/// Why a remote call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Network or connectivity failure; the outcome is unknown
    #[error("remote store unreachable: {0}")]
    Unreachable(String),

    /// The remote store refused the write (authorization, validation)
    #[error("rejected by remote store: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Transient failures are retried on the next pass without marking
    /// anything failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_))
    }
}

/// Create, update and list records in the remote store.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Create a record and return the identity the remote store assigned.
    async fn create_remote(&self, collection: &str, fields: &Fields)
        -> Result<RemoteId, RemoteError>;

    /// Overwrite the fields of an existing remote record.
    async fn update_remote(
        &self,
        collection: &str,
        remote_id: &RemoteId,
        fields: &Fields,
    ) -> Result<(), RemoteError>;

    /// List remote records of a collection matching a field filter.
    async fn list_remote(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<RemoteRecord>, RemoteError>;
}
