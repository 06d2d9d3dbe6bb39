//! Record types for storing field data.

use crate::{CollectionName, Fields, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-generated identity of a record. Assigned once at creation and never
/// rewritten, even after the remote store confirms the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Generate a fresh random (UUID v4) identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LocalId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity assigned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RemoteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Replication state of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SyncStatus {
    /// Waiting for the next reconciliation pass
    Pending,
    /// A replay attempt is in flight
    Syncing,
    /// Confirmed by the remote store
    Synced,
    /// The remote store refused the last attempt
    Failed { reason: String },
}

impl SyncStatus {
    /// Queued records are the implicit mutation queue.
    pub fn is_queued(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Failed { .. })
    }

    /// Short lowercase name, also used as the persisted tag.
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed { .. } => "failed",
        }
    }

    /// The rejection reason for failed records.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            SyncStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Failed { reason } => write!(f, "failed: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// A locally stored entity with local and optional remote identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable client-side identity
    pub local_id: LocalId,
    /// Remote identity, once confirmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    /// Collection this record belongs to
    pub collection: CollectionName,
    /// Field values (JSON object)
    pub fields: Fields,
    /// Replication state
    pub sync: SyncStatus,
    /// Principal stamped when the record was first replayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Incremented on every local write
    pub revision: u64,
    /// When the record was created (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the record was last changed (milliseconds since epoch)
    pub updated_at: Timestamp,
}

impl Record {
    /// Create a new pending record.
    pub fn new(
        local_id: LocalId,
        collection: impl Into<CollectionName>,
        fields: Fields,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            local_id,
            remote_id: None,
            collection: collection.into(),
            fields,
            sync: SyncStatus::Pending,
            created_by: None,
            revision: 1,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Create a record mirroring an already confirmed remote record.
    pub fn from_remote(
        local_id: LocalId,
        remote_id: RemoteId,
        collection: impl Into<CollectionName>,
        fields: Fields,
        timestamp: Timestamp,
    ) -> Self {
        let mut record = Self::new(local_id, collection, fields, timestamp);
        record.remote_id = Some(remote_id);
        record.sync = SyncStatus::Synced;
        record
    }

    pub fn is_queued(&self) -> bool {
        self.sync.is_queued()
    }

    pub fn is_synced(&self) -> bool {
        self.sync == SyncStatus::Synced
    }

    /// A synced record always carries its remote identity.
    pub fn is_consistent(&self) -> bool {
        !(self.is_synced() && self.remote_id.is_none())
    }

    /// The identifier other records should use to reference this one.
    pub fn reference(&self) -> &str {
        match &self.remote_id {
            Some(remote_id) => remote_id.as_str(),
            None => self.local_id.as_str(),
        }
    }

    /// Whether `value` names this record by either identity.
    pub fn is_named_by(&self, value: &str) -> bool {
        self.local_id.as_str() == value
            || self.remote_id.as_ref().is_some_and(|r| r.as_str() == value)
    }

    /// Read a string field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    /// Shallow-merge a patch into the fields. A `null` value removes the key.
    ///
    /// A synced or failed record becomes pending again. An in-flight record
    /// stays `Syncing`; the revision bump is noticed when the attempt settles.
    pub fn apply_patch(&mut self, patch: &Fields, timestamp: Timestamp) {
        for (key, value) in patch {
            if value.is_null() {
                self.fields.remove(key);
            } else {
                self.fields.insert(key.clone(), value.clone());
            }
        }
        self.touch(timestamp);
        if matches!(self.sync, SyncStatus::Synced | SyncStatus::Failed { .. }) {
            self.sync = SyncStatus::Pending;
        }
    }

    /// Mark as in flight, returning the status it had before.
    pub fn mark_syncing(&mut self) -> SyncStatus {
        std::mem::replace(&mut self.sync, SyncStatus::Syncing)
    }

    /// Settle a successful attempt started at `attempted_revision`.
    pub fn confirm(&mut self, remote_id: Option<RemoteId>, attempted_revision: u64) {
        if self.remote_id.is_none() {
            self.remote_id = remote_id;
        }
        self.sync = if self.revision == attempted_revision {
            SyncStatus::Synced
        } else {
            SyncStatus::Pending
        };
    }

    /// Settle a rejected attempt. An edit made while in flight counts as a
    /// fresh write and requeues the record instead.
    pub fn fail(&mut self, reason: impl Into<String>, attempted_revision: u64) {
        self.sync = if self.revision == attempted_revision {
            SyncStatus::Failed {
                reason: reason.into(),
            }
        } else {
            SyncStatus::Pending
        };
    }

    /// Settle an attempt whose outcome is unknown or was never sent.
    pub fn restore(&mut self, previous: SyncStatus, attempted_revision: u64) {
        self.sync = if self.revision == attempted_revision {
            previous
        } else {
            SyncStatus::Pending
        };
    }

    /// Requeue a failed record. Returns `false` if it was not failed.
    pub fn requeue(&mut self) -> bool {
        if matches!(self.sync, SyncStatus::Failed { .. }) {
            self.sync = SyncStatus::Pending;
            true
        } else {
            false
        }
    }

    /// Reset an attempt interrupted by a restart. Returns `true` if the
    /// record was `Syncing`.
    pub fn reset_interrupted(&mut self) -> bool {
        if self.sync == SyncStatus::Syncing {
            self.sync = SyncStatus::Pending;
            true
        } else {
            false
        }
    }

    fn touch(&mut self, timestamp: Timestamp) {
        self.revision += 1;
        self.updated_at = timestamp.max(self.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn course() -> Record {
        Record::new(
            LocalId::from("c1"),
            "courses",
            fields(json!({"name": "Ganton"})),
            1000,
        )
    }

    #[test]
    fn create_record() {
        let record = course();

        assert_eq!(record.local_id.as_str(), "c1");
        assert_eq!(record.collection, "courses");
        assert_eq!(record.sync, SyncStatus::Pending);
        assert_eq!(record.revision, 1);
        assert!(record.remote_id.is_none());
        assert!(record.is_queued());
        assert!(record.is_consistent());
        assert_eq!(record.reference(), "c1");
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = LocalId::generate();
        let b = LocalId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn confirm_assigns_remote_id_once() {
        let mut record = course();
        let previous = record.mark_syncing();
        assert_eq!(previous, SyncStatus::Pending);

        record.confirm(Some(RemoteId::from("C-100")), 1);
        assert_eq!(record.sync, SyncStatus::Synced);
        assert_eq!(record.reference(), "C-100");
        assert!(record.is_named_by("c1"));
        assert!(record.is_named_by("C-100"));

        record.confirm(Some(RemoteId::from("C-999")), 1);
        assert_eq!(record.remote_id, Some(RemoteId::from("C-100")));
    }

    #[test]
    fn edit_while_syncing_requeues_after_confirm() {
        let mut record = course();
        record.mark_syncing();
        let attempted = record.revision;

        record.apply_patch(&fields(json!({"name": "Ganton Links"})), 2000);
        assert_eq!(record.sync, SyncStatus::Syncing);

        record.confirm(Some(RemoteId::from("C-100")), attempted);
        assert_eq!(record.sync, SyncStatus::Pending);
        assert_eq!(record.remote_id, Some(RemoteId::from("C-100")));
    }

    #[test]
    fn patch_demotes_synced_record() {
        let mut record = course();
        record.mark_syncing();
        record.confirm(Some(RemoteId::from("C-100")), 1);

        record.apply_patch(&fields(json!({"name": "Renamed", "par": 72})), 3000);
        assert_eq!(record.sync, SyncStatus::Pending);
        assert_eq!(record.revision, 2);
        assert_eq!(record.updated_at, 3000);
        assert_eq!(record.fields["par"], 72);
    }

    #[test]
    fn patch_null_removes_field() {
        let mut record = course();
        record.apply_patch(&fields(json!({"note": "wet"})), 1500);
        record.apply_patch(&fields(json!({"note": null})), 1600);
        assert!(!record.fields.contains_key("note"));
    }

    #[test]
    fn fail_and_requeue() {
        let mut record = course();
        record.mark_syncing();
        record.fail("duplicate name", 1);

        assert_eq!(record.sync.failure_reason(), Some("duplicate name"));
        assert!(record.is_queued());
        assert!(record.requeue());
        assert_eq!(record.sync, SyncStatus::Pending);
        assert!(!record.requeue());
    }

    #[test]
    fn restore_keeps_previous_failure() {
        let mut record = course();
        record.sync = SyncStatus::Failed {
            reason: "denied".into(),
        };
        let previous = record.mark_syncing();
        record.restore(previous, 1);
        assert_eq!(record.sync.failure_reason(), Some("denied"));
    }

    #[test]
    fn reset_interrupted_attempt() {
        let mut record = course();
        record.mark_syncing();
        assert!(record.reset_interrupted());
        assert_eq!(record.sync, SyncStatus::Pending);
        assert!(!record.reset_interrupted());
    }

    #[test]
    fn status_serialization() {
        let failed = SyncStatus::Failed {
            reason: "denied".into(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json, json!({"state": "failed", "reason": "denied"}));

        let parsed: SyncStatus = serde_json::from_value(json!({"state": "pending"})).unwrap();
        assert_eq!(parsed, SyncStatus::Pending);
        assert_eq!(failed.to_string(), "failed: denied");
    }
}
