//! Read-only sync status views over the store.

use crate::{CollectionName, LocalId, Store, SyncStatus};
use serde::{Deserialize, Serialize};

/// A record the remote store refused, with the reason it gave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecord {
    pub local_id: LocalId,
    pub collection: CollectionName,
    pub reason: String,
}

/// Record counts by sync state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
}

impl SyncSummary {
    /// Records still waiting for replay.
    pub fn queued(&self) -> usize {
        self.pending + self.failed
    }

    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.synced + self.failed
    }
}

/// Answers status questions about a store without touching it.
#[derive(Debug, Clone, Copy)]
pub struct SyncTracker<'a> {
    store: &'a Store,
}

impl<'a> SyncTracker<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Number of records waiting for replay, failed ones included.
    pub fn pending_count(&self) -> usize {
        self.store.records().filter(|r| r.is_queued()).count()
    }

    /// Failed records, oldest first.
    pub fn failed_records(&self) -> Vec<FailedRecord> {
        let mut failed: Vec<_> = self
            .store
            .records()
            .filter_map(|r| {
                r.sync.failure_reason().map(|reason| {
                    (
                        r.created_at,
                        FailedRecord {
                            local_id: r.local_id.clone(),
                            collection: r.collection.clone(),
                            reason: reason.to_string(),
                        },
                    )
                })
            })
            .collect();
        failed.sort_by(|a, b| (a.0, &a.1.local_id).cmp(&(b.0, &b.1.local_id)));
        failed.into_iter().map(|(_, record)| record).collect()
    }

    pub fn status_of(&self, id: &LocalId) -> Option<&'a SyncStatus> {
        self.store.get(id).map(|r| &r.sync)
    }

    pub fn summary(&self) -> SyncSummary {
        self.store
            .records()
            .fold(SyncSummary::default(), |mut summary, record| {
                match record.sync {
                    SyncStatus::Pending => summary.pending += 1,
                    SyncStatus::Syncing => summary.syncing += 1,
                    SyncStatus::Synced => summary.synced += 1,
                    SyncStatus::Failed { .. } => summary.failed += 1,
                }
                summary
            })
    }
}

impl Store {
    /// Status view over this store.
    pub fn tracker(&self) -> SyncTracker<'_> {
        SyncTracker::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ReplayStart;
    use crate::schema::{CollectionSchema, FieldDef, FieldType};
    use crate::{Fields, RemoteId, Schema};
    use serde_json::json;

    fn store_with_courses(names: &[(&str, u64)]) -> Store {
        let mut store = Store::new(Schema::new(1).with_collection(CollectionSchema::new(
            "courses",
            vec![FieldDef::required("name", FieldType::String)],
        )));
        for (i, (name, at)) in names.iter().enumerate() {
            let fields: Fields = json!({ "name": name }).as_object().cloned().unwrap();
            store
                .create(LocalId::from(format!("c{}", i + 1)), "courses", fields, *at)
                .unwrap();
        }
        store
    }

    fn start(store: &mut Store, id: &str) -> crate::ReplayAttempt {
        match store.begin_replay(&LocalId::from(id)).unwrap() {
            ReplayStart::Ready(attempt) => attempt,
            other => panic!("expected ready attempt, got {:?}", other),
        }
    }

    #[test]
    fn empty_store_summary() {
        let store = store_with_courses(&[]);
        assert_eq!(store.tracker().summary(), SyncSummary::default());
        assert_eq!(store.tracker().pending_count(), 0);
    }

    #[test]
    fn summary_counts_each_state() {
        let mut store = store_with_courses(&[("A", 1), ("B", 2), ("C", 3), ("D", 4)]);

        let attempt = start(&mut store, "c1");
        store.settle_created(&attempt, RemoteId::from("C-1"), None).unwrap();
        let attempt = start(&mut store, "c2");
        store.settle_rejected(&attempt, "duplicate name").unwrap();
        start(&mut store, "c3");

        let summary = store.tracker().summary();
        assert_eq!(
            summary,
            SyncSummary {
                pending: 1,
                syncing: 1,
                synced: 1,
                failed: 1,
            }
        );
        assert_eq!(summary.queued(), 2);
        assert_eq!(summary.total(), 4);
        assert_eq!(store.tracker().pending_count(), 2);
    }

    #[test]
    fn failed_records_carry_reason() {
        let mut store = store_with_courses(&[("A", 20), ("B", 10)]);
        for id in ["c1", "c2"] {
            let attempt = start(&mut store, id);
            store.settle_rejected(&attempt, "duplicate name").unwrap();
        }

        let failed = store.tracker().failed_records();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].local_id.as_str(), "c2");
        assert_eq!(failed[0].reason, "duplicate name");
        assert_eq!(failed[0].collection, "courses");
    }

    #[test]
    fn status_of_known_and_unknown() {
        let store = store_with_courses(&[("A", 1)]);
        let tracker = store.tracker();
        assert_eq!(tracker.status_of(&LocalId::from("c1")), Some(&SyncStatus::Pending));
        assert_eq!(tracker.status_of(&LocalId::from("ghost")), None);
    }
}
