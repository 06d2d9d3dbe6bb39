//! Merging remote state into the local store.
//!
//! The remote store is the system of record, but a local edit that has not
//! been replayed yet must never be lost. Merging follows three rules:
//!
//! 1. An unknown remote id becomes a new synced record with a fresh local id
//! 2. A known remote id whose local copy is synced takes the remote fields
//! 3. A known remote id whose local copy is queued or in flight keeps the
//!    local fields; the next pass replays them as an update

use crate::{
    error::Result, CollectionName, Error, Fields, LocalId, Record, RemoteId, Store, Timestamp,
};
use serde::{Deserialize, Serialize};

/// A record as listed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub remote_id: RemoteId,
    pub collection: CollectionName,
    pub fields: Fields,
}

impl RemoteRecord {
    pub fn new(
        remote_id: impl Into<RemoteId>,
        collection: impl Into<CollectionName>,
        fields: Fields,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            collection: collection.into(),
            fields,
        }
    }
}

/// How a single remote record was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeAction {
    /// Inserted as a new synced record
    Inserted,
    /// Local synced copy overwritten with remote fields
    Updated,
    /// Local copy has unreplayed edits and was kept
    KeptLocal,
    /// Local copy already matched
    Unchanged,
}

/// Result of merging a remote listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub inserted: Vec<LocalId>,
    pub updated: Vec<LocalId>,
    pub kept_local: Vec<LocalId>,
    pub unchanged: usize,
}

impl MergeReport {
    fn record(&mut self, local_id: &LocalId, action: MergeAction) {
        match action {
            MergeAction::Inserted => self.inserted.push(local_id.clone()),
            MergeAction::Updated => self.updated.push(local_id.clone()),
            MergeAction::KeptLocal => self.kept_local.push(local_id.clone()),
            MergeAction::Unchanged => self.unchanged += 1,
        }
    }
}

impl Store {
    /// Merge one remote record. Returns the action taken and the record as
    /// stored afterwards.
    pub fn merge_remote_record(
        &mut self,
        remote: RemoteRecord,
        timestamp: Timestamp,
    ) -> Result<(MergeAction, Record)> {
        if self.schema().get_collection(&remote.collection).is_none() {
            return Err(Error::CollectionNotFound(remote.collection));
        }

        let existing = self
            .find_by_remote(&remote.collection, remote.remote_id.as_str())
            .map(|r| r.local_id.clone());

        let Some(local_id) = existing else {
            let record = Record::from_remote(
                LocalId::generate(),
                remote.remote_id,
                remote.collection,
                remote.fields,
                timestamp,
            );
            self.put(record.clone());
            return Ok((MergeAction::Inserted, record));
        };

        let record = self.record_mut(&local_id)?;
        let action = if !record.is_synced() {
            MergeAction::KeptLocal
        } else if record.fields == remote.fields {
            MergeAction::Unchanged
        } else {
            record.fields = remote.fields;
            record.updated_at = timestamp.max(record.updated_at);
            MergeAction::Updated
        };
        Ok((action, record.clone()))
    }

    /// Merge a remote listing. Returns the report and every record that
    /// changed locally.
    pub fn merge_remote(
        &mut self,
        remote: Vec<RemoteRecord>,
        timestamp: Timestamp,
    ) -> Result<(MergeReport, Vec<Record>)> {
        let mut report = MergeReport::default();
        let mut changed = Vec::new();

        for item in remote {
            let (action, record) = self.merge_remote_record(item, timestamp)?;
            report.record(&record.local_id, action);
            if matches!(action, MergeAction::Inserted | MergeAction::Updated) {
                changed.push(record);
            }
        }

        Ok((report, changed))
    }
}
