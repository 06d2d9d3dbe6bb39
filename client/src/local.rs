//! Durable local record store.
//!
//! Wraps the engine's in-memory [`Store`] behind a read/write lock and writes
//! every changed record through to SQLite before the write lock is released.
//! All writers, repositories and the reconciler alike, go through the same
//! lock, so no two writers ever interleave on a record.

use crate::db::{self, Pool};
use crate::error::Result;
use fieldsync_engine::{
    plan_replay, Confirmed, FailedRecord, Fields, Filter, LocalId, MergeReport, Record, RemoteId,
    RemoteRecord, ReplayAttempt, ReplayPlan, ReplayStart, Schema, Store, StoreSnapshot,
    SyncStatus, SyncSummary,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Local record store shared by repositories and the reconciler.
#[derive(Debug, Clone)]
pub struct LocalStore {
    store: Arc<RwLock<Store>>,
    pool: Pool,
}

impl LocalStore {
    /// Open the store, loading every persisted record.
    pub async fn open(schema: Schema, pool: Pool) -> Result<Self> {
        schema.check_references()?;
        let store = load_store(schema, &pool).await?;
        tracing::info!(records = store.len(), "local store opened");

        Ok(Self {
            store: Arc::new(RwLock::new(store)),
            pool,
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Run a read-only closure against the store.
    pub async fn read<T>(&self, f: impl FnOnce(&Store) -> T) -> T {
        let store = self.store.read().await;
        f(&*store)
    }

    pub async fn get(&self, id: &LocalId) -> Option<Record> {
        self.read(|store| store.get(id).cloned()).await
    }

    /// Records of a collection matching `filter`, oldest first.
    pub async fn list(&self, collection: &str, filter: &Filter) -> Result<Vec<Record>> {
        let records = self
            .read(|store| {
                store
                    .list(collection, filter)
                    .map(|records| records.into_iter().cloned().collect())
            })
            .await?;
        Ok(records)
    }

    /// Create a pending record under a fresh local ID.
    pub async fn create(&self, collection: &str, fields: Fields) -> Result<Record> {
        let local_id = LocalId::generate();
        let timestamp = now_millis();
        self.write(|store| {
            let record = store.create(local_id, collection, fields, timestamp)?;
            Ok((record.clone(), vec![record]))
        })
        .await
    }

    pub async fn update(&self, id: &LocalId, patch: &Fields) -> Result<Record> {
        let timestamp = now_millis();
        self.write(|store| {
            let record = store.update(id, patch, timestamp)?;
            Ok((record.clone(), vec![record]))
        })
        .await
    }

    /// Remove an unsynced record; it will never be replayed.
    pub async fn remove(&self, id: &LocalId) -> Result<Record> {
        let mut store = self.store.write().await;
        let removed = store.remove(id)?;
        if let Err(e) = db::delete_record(&self.pool, id).await {
            tracing::error!(local_id = %id, error = %e, "failed to delete record");
            store.insert_record(removed)?;
            return Err(e);
        }
        Ok(removed)
    }

    pub async fn plan(&self) -> ReplayPlan {
        self.read(plan_replay).await
    }

    pub async fn begin_replay(&self, id: &LocalId) -> Result<ReplayStart> {
        self.write(|store| {
            let start = store.begin_replay(id)?;
            let changed = match &start {
                ReplayStart::Ready(_) => store.get(id).cloned().into_iter().collect(),
                _ => Vec::new(),
            };
            Ok((start, changed))
        })
        .await
    }

    /// Settle an accepted create. The record and every remapped dependent
    /// are persisted in one transaction.
    pub async fn settle_created(
        &self,
        attempt: &ReplayAttempt,
        remote_id: RemoteId,
        created_by: Option<&str>,
    ) -> Result<Confirmed> {
        let assigned = remote_id.clone();
        self.settle(attempt, Some(assigned), |store| {
            let confirmed = store.settle_created(attempt, remote_id, created_by)?;
            let mut changed = Vec::with_capacity(confirmed.remapped.len() + 1);
            changed.push(confirmed.record.clone());
            changed.extend(confirmed.remapped.iter().cloned());
            Ok((confirmed, changed))
        })
        .await
    }

    pub async fn settle_updated(&self, attempt: &ReplayAttempt) -> Result<Record> {
        self.settle(attempt, None, |store| single(store.settle_updated(attempt)?))
            .await
    }

    pub async fn settle_rejected(&self, attempt: &ReplayAttempt, reason: &str) -> Result<Record> {
        self.settle(attempt, None, |store| {
            single(store.settle_rejected(attempt, reason)?)
        })
        .await
    }

    pub async fn settle_unreachable(&self, attempt: &ReplayAttempt) -> Result<Record> {
        self.settle(attempt, None, |store| single(store.settle_unreachable(attempt)?))
            .await
    }

    /// Settle an attempt. If the outcome cannot be recorded, the record is
    /// put back in the queue rather than left syncing, keeping any remote id
    /// already assigned.
    async fn settle<T, F>(
        &self,
        attempt: &ReplayAttempt,
        remote_id: Option<RemoteId>,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut Store) -> fieldsync_engine::error::Result<(T, Vec<Record>)>,
    {
        let settled = self.write(f).await;
        if settled.is_err() {
            self.release(attempt, remote_id).await;
        }
        settled
    }

    async fn release(&self, attempt: &ReplayAttempt, remote_id: Option<RemoteId>) {
        let mut store = self.store.write().await;
        let record = match store.release_attempt(attempt, remote_id) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(local_id = %attempt.local_id, error = %e, "failed to release replay");
                return;
            }
        };
        tracing::warn!(local_id = %record.local_id, remote_id = ?record.remote_id, "replay outcome not recorded, requeued");

        // On failure the database still says syncing, which recover() resets
        // on the next start.
        if let Err(e) = db::upsert_record(&self.pool, &record).await {
            tracing::error!(local_id = %record.local_id, error = %e, "failed to persist requeued record");
        }
    }

    /// Reset records left syncing by an interrupted run.
    pub async fn recover(&self) -> Result<Vec<Record>> {
        self.write(|store| {
            let reset = store.recover();
            Ok((reset.clone(), reset))
        })
        .await
    }

    pub async fn requeue(&self, id: &LocalId) -> Result<Record> {
        self.write(|store| single(store.requeue(id)?)).await
    }

    pub async fn requeue_failed(&self) -> Result<Vec<Record>> {
        self.write(|store| {
            let requeued = store.requeue_failed();
            Ok((requeued.clone(), requeued))
        })
        .await
    }

    /// Merge a remote listing into the local records.
    pub async fn merge_remote(&self, remote: Vec<RemoteRecord>) -> Result<MergeReport> {
        let timestamp = now_millis();
        self.write(|store| store.merge_remote(remote, timestamp))
            .await
    }

    pub async fn pending_count(&self) -> usize {
        self.read(|store| store.tracker().pending_count()).await
    }

    pub async fn failed_records(&self) -> Vec<FailedRecord> {
        self.read(|store| store.tracker().failed_records()).await
    }

    pub async fn status_of(&self, id: &LocalId) -> Option<SyncStatus> {
        self.read(|store| store.tracker().status_of(id).cloned())
            .await
    }

    pub async fn summary(&self) -> SyncSummary {
        self.read(|store| store.tracker().summary()).await
    }

    pub async fn export_snapshot(&self) -> StoreSnapshot {
        self.read(|store| store.export_state()).await
    }

    /// Apply a store mutation and persist the records it changed while still
    /// holding the write lock. If persisting fails, the in-memory store is
    /// rebuilt from the database so both agree again.
    async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Store) -> fieldsync_engine::error::Result<(T, Vec<Record>)>,
    {
        let mut store = self.store.write().await;
        let (value, changed) = f(&mut *store)?;

        if let Err(e) = db::upsert_records(&self.pool, &changed).await {
            tracing::error!(records = changed.len(), error = %e, "failed to persist records");
            match load_store(store.schema().clone(), &self.pool).await {
                Ok(reloaded) => *store = reloaded,
                Err(reload) => {
                    tracing::error!(error = %reload, "failed to reload local store")
                }
            }
            return Err(e);
        }

        Ok(value)
    }
}

fn single(record: Record) -> fieldsync_engine::error::Result<(Record, Vec<Record>)> {
    Ok((record.clone(), vec![record]))
}

async fn load_store(schema: Schema, pool: &Pool) -> Result<Store> {
    let mut store = Store::new(schema);
    for row in db::load_records(pool).await? {
        store.insert_record(row.to_record()?)?;
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations};
    use fieldsync_engine::{CollectionSchema, FieldDef, FieldType};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(1)
            .with_collection(CollectionSchema::new(
                "courses",
                vec![FieldDef::required("name", FieldType::String)],
            ))
            .with_collection(
                CollectionSchema::new(
                    "tasks",
                    vec![FieldDef::required("courseId", FieldType::String)],
                )
                .with_reference("courseId", "courses"),
            )
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    async fn open() -> LocalStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        LocalStore::open(schema(), pool).await.unwrap()
    }

    #[tokio::test]
    async fn writes_are_durable() {
        let local = open().await;
        let course = local
            .create("courses", fields(json!({"name": "Ganton"})))
            .await
            .unwrap();
        local
            .update(&course.local_id, &fields(json!({"name": "Ganton GC"})))
            .await
            .unwrap();

        let reopened = LocalStore::open(schema(), local.pool().clone())
            .await
            .unwrap();
        let record = reopened.get(&course.local_id).await.unwrap();
        assert_eq!(record.fields["name"], "Ganton GC");
        assert_eq!(record.revision, 2);
        assert_eq!(reopened.pending_count().await, 1);
    }

    #[tokio::test]
    async fn settle_created_persists_remapped_dependents() {
        let local = open().await;
        let course = local
            .create("courses", fields(json!({"name": "Ganton"})))
            .await
            .unwrap();
        let task = local
            .create(
                "tasks",
                fields(json!({"courseId": course.local_id.as_str()})),
            )
            .await
            .unwrap();

        let ReplayStart::Ready(attempt) = local.begin_replay(&course.local_id).await.unwrap()
        else {
            panic!("expected ready attempt");
        };
        local
            .settle_created(&attempt, RemoteId::from("C-100"), Some("user-7"))
            .await
            .unwrap();

        let reopened = LocalStore::open(schema(), local.pool().clone())
            .await
            .unwrap();
        let task = reopened.get(&task.local_id).await.unwrap();
        assert_eq!(task.fields["courseId"], "C-100");
        let course = reopened.get(&course.local_id).await.unwrap();
        assert_eq!(course.created_by.as_deref(), Some("user-7"));
        assert_eq!(course.sync, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn unrecorded_create_goes_back_in_queue() {
        let local = open().await;
        let course = local
            .create("courses", fields(json!({"name": "Ganton"})))
            .await
            .unwrap();

        // Another row already claims the remote id, so the settle cannot be
        // written.
        let mut mirror = Record::new(
            LocalId::from("mirror"),
            "courses",
            fields(json!({"name": "Ganton"})),
            1,
        );
        mirror.remote_id = Some(RemoteId::from("C-100"));
        mirror.sync = SyncStatus::Synced;
        db::upsert_record(local.pool(), &mirror).await.unwrap();

        let ReplayStart::Ready(attempt) = local.begin_replay(&course.local_id).await.unwrap()
        else {
            panic!("expected ready attempt");
        };
        let result = local
            .settle_created(&attempt, RemoteId::from("C-100"), None)
            .await;
        assert!(result.is_err());

        let record = local.get(&course.local_id).await.unwrap();
        assert_eq!(record.sync, SyncStatus::Pending);
        assert_eq!(record.remote_id, Some(RemoteId::from("C-100")));
        assert!(local.plan().await.order.contains(&course.local_id));
    }

    #[tokio::test]
    async fn recover_persists_reset() {
        let local = open().await;
        let course = local
            .create("courses", fields(json!({"name": "Ganton"})))
            .await
            .unwrap();
        local.begin_replay(&course.local_id).await.unwrap();

        // A fresh open sees the interrupted attempt.
        let restarted = LocalStore::open(schema(), local.pool().clone())
            .await
            .unwrap();
        assert_eq!(
            restarted.status_of(&course.local_id).await,
            Some(SyncStatus::Syncing)
        );

        let reset = restarted.recover().await.unwrap();
        assert_eq!(reset.len(), 1);
        let again = LocalStore::open(schema(), local.pool().clone())
            .await
            .unwrap();
        assert_eq!(again.summary().await.pending, 1);
    }

    #[tokio::test]
    async fn remove_deletes_row() {
        let local = open().await;
        let course = local
            .create("courses", fields(json!({"name": "Ganton"})))
            .await
            .unwrap();
        local.remove(&course.local_id).await.unwrap();

        assert!(local.get(&course.local_id).await.is_none());
        assert!(db::load_records(local.pool()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_write_is_not_persisted() {
        let local = open().await;
        let result = local
            .create("tasks", fields(json!({"courseId": "nowhere"})))
            .await;
        assert!(result.is_err());
        assert!(db::load_records(local.pool()).await.unwrap().is_empty());
    }
}
