//! In-memory remote store for tests and local development.

use super::{RemoteError, RemoteRepository};
use async_trait::async_trait;
use dashmap::DashMap;
use fieldsync_engine::{CollectionName, Fields, Filter, RemoteId, RemoteRecord};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

/// Number of calls the remote store has received, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCalls {
    pub create: usize,
    pub update: usize,
    pub list: usize,
}

impl RemoteCalls {
    /// Calls that carry a write.
    pub fn writes(&self) -> usize {
        self.create + self.update
    }
}

#[derive(Debug, Clone)]
struct StoredRemote {
    collection: CollectionName,
    fields: Fields,
}

/// A remote store held in memory.
///
/// Failures can be scripted: [`InMemoryRemote::fail_next`] queues errors for
/// the next calls, [`InMemoryRemote::set_reachable`] makes every call fail as
/// unreachable, and [`InMemoryRemote::pause`] holds calls until the returned
/// guard is dropped.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    records: DashMap<RemoteId, StoredRemote>,
    next_id: AtomicU64,
    scripted_ids: Mutex<VecDeque<RemoteId>>,
    scripted_failures: Mutex<VecDeque<RemoteError>>,
    unreachable: AtomicBool,
    gate: Arc<RwLock<()>>,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl InMemoryRemote {
    /// Create an empty remote store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty remote store wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Identities to hand out to the next creates, in order. Once used up,
    /// identities are generated.
    pub fn script_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<RemoteId>,
    {
        if let Ok(mut scripted) = self.scripted_ids.lock() {
            scripted.extend(ids.into_iter().map(Into::into));
        }
    }

    /// Fail the next call with `error`. Queued failures apply in order.
    pub fn fail_next(&self, error: RemoteError) {
        if let Ok(mut scripted) = self.scripted_failures.lock() {
            scripted.push_back(error);
        }
    }

    /// Make every call succeed or fail as unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Hold every call until the returned guard is dropped.
    pub async fn pause(&self) -> OwnedRwLockWriteGuard<()> {
        self.gate.clone().write_owned().await
    }

    /// Insert a record directly, as if another client had created it.
    pub fn seed(&self, collection: impl Into<CollectionName>, fields: Fields) -> RemoteId {
        let remote_id = self.assign_id();
        self.records.insert(
            remote_id.clone(),
            StoredRemote {
                collection: collection.into(),
                fields,
            },
        );
        remote_id
    }

    /// Overwrite a record directly, as if another client had edited it.
    pub fn overwrite(&self, remote_id: &RemoteId, fields: Fields) -> bool {
        match self.records.get_mut(remote_id) {
            Some(mut stored) => {
                stored.fields = fields;
                true
            }
            None => false,
        }
    }

    /// Get a stored record.
    pub fn get(&self, remote_id: &RemoteId) -> Option<Fields> {
        self.records.get(remote_id).map(|r| r.fields.clone())
    }

    /// All records of a collection, ordered by remote ID.
    pub fn records(&self, collection: &str) -> Vec<RemoteRecord> {
        let mut records: Vec<RemoteRecord> = self
            .records
            .iter()
            .filter(|entry| entry.value().collection == collection)
            .map(|entry| {
                RemoteRecord::new(
                    entry.key().clone(),
                    entry.value().collection.clone(),
                    entry.value().fields.clone(),
                )
            })
            .collect();
        records.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        records
    }

    /// Total number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Calls received so far.
    pub fn calls(&self) -> RemoteCalls {
        RemoteCalls {
            create: self.create_calls.load(Ordering::SeqCst),
            update: self.update_calls.load(Ordering::SeqCst),
            list: self.list_calls.load(Ordering::SeqCst),
        }
    }

    fn assign_id(&self) -> RemoteId {
        let scripted = self
            .scripted_ids
            .lock()
            .ok()
            .and_then(|mut ids| ids.pop_front());
        scripted.unwrap_or_else(|| {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            RemoteId::from(format!("R-{}", n))
        })
    }

    async fn admit(&self) -> Result<(), RemoteError> {
        let _gate = self.gate.read().await;
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("remote store offline".into()));
        }
        let scripted = self
            .scripted_failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.pop_front());
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteRepository for InMemoryRemote {
    async fn create_remote(
        &self,
        collection: &str,
        fields: &Fields,
    ) -> Result<RemoteId, RemoteError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;

        let remote_id = self.seed(collection, fields.clone());
        tracing::debug!(collection, remote_id = %remote_id, "remote record created");
        Ok(remote_id)
    }

    async fn update_remote(
        &self,
        collection: &str,
        remote_id: &RemoteId,
        fields: &Fields,
    ) -> Result<(), RemoteError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;

        match self.records.get_mut(remote_id) {
            Some(mut stored) if stored.collection == collection => {
                stored.fields = fields.clone();
                Ok(())
            }
            _ => Err(RemoteError::Rejected(format!(
                "no {} record {}",
                collection, remote_id
            ))),
        }
    }

    async fn list_remote(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;

        Ok(self
            .records(collection)
            .into_iter()
            .filter(|record| filter.matches_fields(&record.fields))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn create_uses_scripted_ids_first() {
        let remote = InMemoryRemote::new();
        remote.script_ids(["C-100"]);

        let first = remote
            .create_remote("courses", &fields(json!({"name": "A"})))
            .await
            .unwrap();
        let second = remote
            .create_remote("courses", &fields(json!({"name": "B"})))
            .await
            .unwrap();

        assert_eq!(first, RemoteId::from("C-100"));
        assert_eq!(second, RemoteId::from("R-1"));
        assert_eq!(remote.len(), 2);
        assert_eq!(remote.calls().create, 2);
    }

    #[tokio::test]
    async fn scripted_failure_applies_once() {
        let remote = InMemoryRemote::new();
        remote.fail_next(RemoteError::Rejected("duplicate name".into()));

        let result = remote.create_remote("courses", &Fields::new()).await;
        assert_eq!(result, Err(RemoteError::Rejected("duplicate name".into())));
        assert!(remote.is_empty());

        assert!(remote.create_remote("courses", &Fields::new()).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_until_restored() {
        let remote = InMemoryRemote::new();
        remote.set_reachable(false);
        let result = remote.list_remote("courses", &Filter::new()).await;
        assert!(matches!(result, Err(RemoteError::Unreachable(_))));

        remote.set_reachable(true);
        assert!(remote.list_remote("courses", &Filter::new()).await.is_ok());
        assert_eq!(remote.calls().list, 2);
    }

    #[tokio::test]
    async fn update_unknown_record_is_rejected() {
        let remote = InMemoryRemote::new();
        let result = remote
            .update_remote("courses", &RemoteId::from("C-404"), &Fields::new())
            .await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
    }

    #[tokio::test]
    async fn list_filters_by_field() {
        let remote = InMemoryRemote::new();
        remote.seed("hazards", fields(json!({"courseId": "C-1"})));
        remote.seed("hazards", fields(json!({"courseId": "C-2"})));
        remote.seed("courses", fields(json!({"name": "A"})));

        let listed = remote
            .list_remote("hazards", &Filter::new().field_eq("courseId", "C-2"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].fields["courseId"], "C-2");
    }

    #[tokio::test]
    async fn pause_holds_calls() {
        let remote = Arc::new(InMemoryRemote::new());
        let guard = remote.pause().await;

        let pending = tokio::spawn({
            let remote = remote.clone();
            async move { remote.create_remote("courses", &Fields::new()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        assert!(remote.is_empty());

        drop(guard);
        assert!(pending.await.unwrap().is_ok());
        assert_eq!(remote.len(), 1);
    }
}
