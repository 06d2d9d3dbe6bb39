//! Snapshot types for exporting and restoring store state.
//!
//! A snapshot is the full record table, including queued and failed records,
//! so a restored store resumes replay exactly where the exported one stopped.

use crate::{error::Result, CollectionName, Error, LocalId, Record, Schema, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the store state.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of snapshot
    pub schema_version: SchemaVersion,
    /// All records organized by collection, then by local ID
    pub collections: BTreeMap<CollectionName, BTreeMap<LocalId, Record>>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(schema_version: SchemaVersion) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            collections: BTreeMap::new(),
        }
    }

    /// Add a record to the snapshot.
    pub fn add_record(&mut self, record: Record) {
        self.collections
            .entry(record.collection.clone())
            .or_default()
            .insert(record.local_id.clone(), record);
    }

    /// Get a record from the snapshot.
    pub fn get_record(&self, collection: &str, id: &LocalId) -> Option<&Record> {
        self.collections.get(collection)?.get(id)
    }

    /// Count total records across all collections.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// Count records still waiting for replay.
    pub fn queued_count(&self) -> usize {
        self.collections
            .values()
            .flat_map(|c| c.values())
            .filter(|r| r.is_queued())
            .count()
    }

    /// Validate the snapshot against a schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.schema_version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }

        for (collection_name, records) in &self.collections {
            let collection_schema = schema.collection(collection_name)?;
            for (local_id, record) in records {
                if local_id != &record.local_id || &record.collection != collection_name {
                    return Err(Error::InvalidSnapshot(format!(
                        "record {} filed under {}/{}",
                        record.local_id, collection_name, local_id
                    )));
                }
                collection_schema.validate_fields(&record.fields)?;
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub schema_version: SchemaVersion,
    /// Total record count
    pub record_count: usize,
    /// Pending plus failed records
    pub queued_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            schema_version: snapshot.schema_version,
            record_count: snapshot.record_count(),
            queued_count: snapshot.queued_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, FieldDef, FieldType};
    use crate::{Fields, RemoteId, SyncStatus};
    use serde_json::json;

    fn test_schema() -> Schema {
        Schema::new(1).with_collection(CollectionSchema::new(
            "courses",
            vec![
                FieldDef::required("name", FieldType::String),
                FieldDef::optional("holes", FieldType::Int),
            ],
        ))
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn course(id: &str, name: &str) -> Record {
        Record::new(LocalId::from(id), "courses", fields(json!({"name": name})), 1000)
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = StoreSnapshot::new(1);
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.schema_version, 1);
        assert_eq!(snapshot.record_count(), 0);
    }

    #[test]
    fn add_and_get_record() {
        let mut snapshot = StoreSnapshot::new(1);
        snapshot.add_record(course("c1", "Ganton"));

        assert_eq!(snapshot.record_count(), 1);
        let retrieved = snapshot.get_record("courses", &LocalId::from("c1")).unwrap();
        assert_eq!(retrieved.fields["name"], "Ganton");
    }

    #[test]
    fn json_roundtrip_keeps_sync_state() {
        let mut snapshot = StoreSnapshot::new(1);
        let mut failed = course("c1", "Ganton");
        failed.sync = SyncStatus::Failed {
            reason: "duplicate name".into(),
        };
        snapshot.add_record(failed);
        snapshot.add_record(Record::from_remote(
            LocalId::from("c2"),
            RemoteId::from("C-2"),
            "courses",
            fields(json!({"name": "Fulford"})),
            1000,
        ));

        let json = snapshot.to_json().unwrap();
        let restored = StoreSnapshot::from_json(&json).unwrap();

        assert_eq!(snapshot, restored);
        assert_eq!(restored.queued_count(), 1);
    }

    #[test]
    fn deterministic_serialization() {
        let mut first = StoreSnapshot::new(1);
        let mut second = StoreSnapshot::new(1);

        first.add_record(course("c-a", "Alwoodley"));
        first.add_record(course("c-b", "Moortown"));
        second.add_record(course("c-b", "Moortown"));
        second.add_record(course("c-a", "Alwoodley"));

        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn validate_snapshot_schema_version_mismatch() {
        let snapshot = StoreSnapshot::new(99);
        let result = snapshot.validate(&test_schema());
        assert!(matches!(result, Err(Error::SchemaVersionMismatch { .. })));
    }

    #[test]
    fn validate_snapshot_invalid_fields() {
        let mut snapshot = StoreSnapshot::new(1);
        snapshot.add_record(Record::new(
            LocalId::from("c1"),
            "courses",
            fields(json!({"name": 123})),
            1000,
        ));

        let result = snapshot.validate(&test_schema());
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn validate_snapshot_misfiled_record() {
        let mut snapshot = StoreSnapshot::new(1);
        let record = course("c1", "Ganton");
        snapshot
            .collections
            .entry("courses".to_string())
            .or_default()
            .insert(LocalId::from("c2"), record);

        let result = snapshot.validate(&test_schema());
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn snapshot_metadata() {
        let mut snapshot = StoreSnapshot::new(1);
        snapshot.add_record(course("c1", "Ganton"));

        let metadata: SnapshotMetadata = (&snapshot).into();
        assert_eq!(metadata.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(metadata.record_count, 1);
        assert_eq!(metadata.queued_count, 1);
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "schemaVersion": 1,
            "collections": {}
        }"#;

        let result = StoreSnapshot::from_json(json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }
}
