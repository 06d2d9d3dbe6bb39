//! Store - the in-memory Local Record Store.
//!
//! The Store holds every record of every collection, keyed by local id. The
//! set of queued records (pending or failed) is the mutation queue; there is
//! no separate log. All replay state transitions go through the Store so the
//! host only has to persist the records each call hands back.

use crate::replay::{ReplayAttempt, ReplayMode, ReplayStart};
use crate::{
    error::Result, CollectionName, Error, Fields, LocalId, Record, RemoteId, Schema, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A collection of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    records: HashMap<LocalId, Record>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Get a record by local ID.
    pub fn get(&self, id: &LocalId) -> Option<&Record> {
        self.records.get(id)
    }

    /// Get a mutable record by local ID.
    pub fn get_mut(&mut self, id: &LocalId) -> Option<&mut Record> {
        self.records.get_mut(id)
    }

    /// Insert a record.
    pub fn insert(&mut self, record: Record) {
        self.records.insert(record.local_id.clone(), record);
    }

    /// Remove a record.
    pub fn remove(&mut self, id: &LocalId) -> Option<Record> {
        self.records.remove(id)
    }

    /// Check if a record exists.
    pub fn contains(&self, id: &LocalId) -> bool {
        self.records.contains_key(id)
    }

    /// Get all records.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Count of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if collection has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A single predicate of a [`Filter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Condition {
    /// Field equals a JSON value
    Equals {
        field: String,
        value: serde_json::Value,
    },
    /// Foreign-key field names the given record by either of its identities
    RefersTo { field: String, target: LocalId },
}

/// Field-equality filter for listing records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    conditions: Vec<Condition>,
    queued_only: bool,
}

impl Filter {
    /// A filter matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    pub fn field_eq(
        mut self,
        field: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.conditions.push(Condition::Equals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Require the foreign key `field` to name `target`, whether the stored
    /// value is still its local id or already its remote id.
    pub fn refers_to(mut self, field: impl Into<String>, target: LocalId) -> Self {
        self.conditions.push(Condition::RefersTo {
            field: field.into(),
            target,
        });
        self
    }

    /// Only records still waiting for replay.
    pub fn queued(mut self) -> Self {
        self.queued_only = true;
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Match bare field values, as a remote listing would. A reference
    /// condition compares the stored value with the target's local ID, and
    /// the queued flag is ignored.
    pub fn matches_fields(&self, fields: &Fields) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Equals { field, value } => fields.get(field) == Some(value),
            Condition::RefersTo { field, target } => {
                fields.get(field).and_then(|v| v.as_str()) == Some(target.as_str())
            }
        })
    }

    fn matches(&self, store: &Store, record: &Record) -> bool {
        if self.queued_only && !record.is_queued() {
            return false;
        }
        self.conditions.iter().all(|condition| match condition {
            Condition::Equals { field, value } => record.fields.get(field) == Some(value),
            Condition::RefersTo { field, target } => match record.field_str(field) {
                Some(value) => match store.get(target) {
                    Some(target) => target.is_named_by(value),
                    None => value == target.as_str(),
                },
                None => false,
            },
        })
    }
}

/// Records changed by a successful create replay.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmed {
    /// The confirmed record
    pub record: Record,
    /// Other records whose foreign keys were rewritten to the new remote id
    pub remapped: Vec<Record>,
}

/// The local record store.
#[derive(Debug, Clone)]
pub struct Store {
    /// Schema for validation and dependency discovery
    schema: Schema,
    /// Collections by name
    collections: HashMap<CollectionName, Collection>,
    /// Which collection each local id lives in
    index: HashMap<LocalId, CollectionName>,
}

impl Store {
    /// Create an empty store for the given schema.
    pub fn new(schema: Schema) -> Self {
        // Initialize empty collections for all schema-defined collections
        let collections = schema
            .collections
            .keys()
            .map(|name| (name.clone(), Collection::new()))
            .collect();

        Self {
            schema,
            collections,
            index: HashMap::new(),
        }
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Get a record by local ID.
    pub fn get(&self, id: &LocalId) -> Option<&Record> {
        let collection = self.index.get(id)?;
        self.collections.get(collection)?.get(id)
    }

    /// Find a record by its remote ID within a collection.
    pub fn find_by_remote(&self, collection: &str, remote_id: &str) -> Option<&Record> {
        self.collections
            .get(collection)?
            .records()
            .find(|r| r.remote_id.as_ref().is_some_and(|id| id.as_str() == remote_id))
    }

    /// Find the record a foreign-key value names, by local or remote ID.
    pub fn resolve(&self, collection: &str, value: &str) -> Option<&Record> {
        match self.get(&LocalId::from(value)) {
            Some(record) if record.collection == collection => Some(record),
            _ => self.find_by_remote(collection, value),
        }
    }

    /// All records, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.collections.values().flat_map(|c| c.records())
    }

    /// Get a collection by name.
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// Query records in a collection.
    pub fn query(&self, collection: &str) -> Option<QueryBuilder<'_>> {
        self.collections
            .get(collection)
            .map(|c| QueryBuilder::new(self, c))
    }

    /// List records of a collection matching a filter, oldest first.
    pub fn list(&self, collection: &str, filter: &Filter) -> Result<Vec<&Record>> {
        let query = self
            .query(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        Ok(query.filter(filter).all())
    }

    /// The value a new foreign key should hold to reference `id`.
    pub fn reference_for(&self, id: &LocalId) -> Result<String> {
        self.get(id)
            .map(|r| r.reference().to_string())
            .ok_or_else(|| Error::RecordNotFound(id.clone()))
    }

    /// Create a new pending record under a caller-chosen local ID.
    pub fn create(
        &mut self,
        local_id: LocalId,
        collection: &str,
        fields: Fields,
        timestamp: Timestamp,
    ) -> Result<Record> {
        self.schema.validate(collection, &fields)?;
        if self.index.contains_key(&local_id) {
            return Err(Error::RecordAlreadyExists(local_id));
        }
        self.check_references(collection, &fields)?;

        let record = Record::new(local_id, collection, fields, timestamp);
        self.put(record.clone());
        Ok(record)
    }

    /// Apply a field patch to an existing record.
    ///
    /// A synced record is demoted to pending so the edit is replayed as an
    /// update; a failed record is requeued.
    pub fn update(&mut self, id: &LocalId, patch: &Fields, timestamp: Timestamp) -> Result<Record> {
        let current = self
            .get(id)
            .ok_or_else(|| Error::RecordNotFound(id.clone()))?;

        let mut preview = current.clone();
        preview.apply_patch(patch, timestamp);
        self.schema.validate(&preview.collection, &preview.fields)?;
        self.check_references(&preview.collection, &preview.fields)?;

        let record = self.record_mut(id)?;
        *record = preview;
        Ok(record.clone())
    }

    /// Remove a record that was never confirmed remotely. It will never be
    /// replayed.
    pub fn remove(&mut self, id: &LocalId) -> Result<Record> {
        let record = self
            .get(id)
            .ok_or_else(|| Error::RecordNotFound(id.clone()))?;

        if record.remote_id.is_some() {
            return Err(Error::invalid_state(id, "record already exists remotely"));
        }
        if record.sync == crate::SyncStatus::Syncing {
            return Err(Error::invalid_state(id, "replay in flight"));
        }
        let dependents = self.dependents_of(id);
        if !dependents.is_empty() {
            return Err(Error::invalid_state(
                id,
                format!("referenced by {} record(s)", dependents.len()),
            ));
        }

        let collection = self.index.remove(id).unwrap_or_default();
        self.collections
            .get_mut(&collection)
            .and_then(|c| c.remove(id))
            .ok_or_else(|| Error::RecordNotFound(id.clone()))
    }

    /// Local IDs of records whose foreign keys still hold `id` itself.
    pub fn dependents_of(&self, id: &LocalId) -> Vec<LocalId> {
        let mut dependents: Vec<LocalId> = self
            .records()
            .filter(|r| &r.local_id != id)
            .filter(|r| {
                self.schema
                    .get_collection(&r.collection)
                    .is_some_and(|schema| {
                        schema
                            .referenced_values(&r.fields)
                            .any(|(_, value)| value == id.as_str())
                    })
            })
            .map(|r| r.local_id.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Insert a record as-is, e.g. when loading persisted state.
    pub fn insert_record(&mut self, record: Record) -> Result<()> {
        if !self.collections.contains_key(&record.collection) {
            return Err(Error::CollectionNotFound(record.collection));
        }
        if self.index.contains_key(&record.local_id) {
            return Err(Error::RecordAlreadyExists(record.local_id));
        }
        if !record.is_consistent() {
            return Err(Error::invalid_state(
                &record.local_id,
                "synced without a remote id",
            ));
        }
        self.put(record);
        Ok(())
    }

    /// All queued (pending or failed) records.
    pub fn queued(&self) -> Vec<&Record> {
        self.records().filter(|r| r.is_queued()).collect()
    }

    /// Local IDs of the records `record` references that have no remote ID
    /// yet. Values naming no local record are taken as remote IDs.
    pub fn unresolved_references(&self, record: &Record) -> Vec<LocalId> {
        let Some(schema) = self.schema.get_collection(&record.collection) else {
            return Vec::new();
        };

        let mut unresolved = Vec::new();
        for (reference, value) in schema.referenced_values(&record.fields) {
            if value == record.local_id.as_str() {
                continue;
            }
            if let Some(target) = self.resolve(&reference.target, value) {
                if target.remote_id.is_none() && !unresolved.contains(&target.local_id) {
                    unresolved.push(target.local_id.clone());
                }
            }
        }
        unresolved
    }

    /// Start replaying a queued record: mark it `Syncing` and capture what
    /// has to be sent.
    pub fn begin_replay(&mut self, id: &LocalId) -> Result<ReplayStart> {
        let Some(record) = self.get(id) else {
            return Ok(ReplayStart::Skipped);
        };
        if !record.is_queued() {
            return Ok(ReplayStart::Skipped);
        }

        let waiting_on = self.unresolved_references(record);
        if !waiting_on.is_empty() {
            return Ok(ReplayStart::Deferred { waiting_on });
        }

        let fields = self.resolved_fields(record);
        let mode = match &record.remote_id {
            Some(remote_id) => ReplayMode::Update {
                remote_id: remote_id.clone(),
            },
            None => ReplayMode::Create,
        };
        let collection = record.collection.clone();
        let revision = record.revision;

        let record = self.record_mut(id)?;
        let previous = record.mark_syncing();

        Ok(ReplayStart::Ready(ReplayAttempt {
            local_id: id.clone(),
            collection,
            mode,
            fields,
            revision,
            previous,
        }))
    }

    /// Settle a create the remote store accepted, then rewrite every foreign
    /// key still holding this record's local ID.
    pub fn settle_created(
        &mut self,
        attempt: &ReplayAttempt,
        remote_id: RemoteId,
        created_by: Option<&str>,
    ) -> Result<Confirmed> {
        let record = self.record_mut(&attempt.local_id)?;
        if record.created_by.is_none() {
            record.created_by = created_by.map(str::to_string);
        }
        record.confirm(Some(remote_id), attempt.revision);
        let record = record.clone();

        let remapped = self.remap_references(&attempt.local_id);
        Ok(Confirmed { record, remapped })
    }

    /// Settle an update the remote store accepted.
    pub fn settle_updated(&mut self, attempt: &ReplayAttempt) -> Result<Record> {
        let record = self.record_mut(&attempt.local_id)?;
        record.confirm(None, attempt.revision);
        Ok(record.clone())
    }

    /// Settle an attempt the remote store rejected.
    pub fn settle_rejected(&mut self, attempt: &ReplayAttempt, reason: &str) -> Result<Record> {
        let record = self.record_mut(&attempt.local_id)?;
        record.fail(reason, attempt.revision);
        Ok(record.clone())
    }

    /// Settle an attempt that never reached the remote store.
    pub fn settle_unreachable(&mut self, attempt: &ReplayAttempt) -> Result<Record> {
        let record = self.record_mut(&attempt.local_id)?;
        record.restore(attempt.previous.clone(), attempt.revision);
        Ok(record.clone())
    }

    /// Rewrite foreign keys holding `id` to its remote ID. Returns the
    /// rewritten records.
    pub fn remap_references(&mut self, id: &LocalId) -> Vec<Record> {
        let Some(remote_id) = self.get(id).and_then(|r| r.remote_id.clone()) else {
            return Vec::new();
        };

        let mut remapped = Vec::new();
        for dependent in self.dependents_of(id) {
            let Some(collection) = self.index.get(&dependent).cloned() else {
                continue;
            };
            let fields_to_rewrite: Vec<String> = self
                .schema
                .get_collection(&collection)
                .map(|schema| schema.references.iter().map(|r| r.field.clone()).collect())
                .unwrap_or_default();

            if let Some(record) = self
                .collections
                .get_mut(&collection)
                .and_then(|c| c.get_mut(&dependent))
            {
                for field in &fields_to_rewrite {
                    if record.field_str(field) == Some(id.as_str()) {
                        record.fields.insert(
                            field.clone(),
                            serde_json::Value::String(remote_id.to_string()),
                        );
                    }
                }
                remapped.push(record.clone());
            }
        }
        remapped
    }

    /// Reset every record left `Syncing` by an interrupted process.
    pub fn recover(&mut self) -> Vec<Record> {
        let mut reset = Vec::new();
        for collection in self.collections.values_mut() {
            for record in collection.records.values_mut() {
                if record.reset_interrupted() {
                    reset.push(record.clone());
                }
            }
        }
        reset.sort_by(|a, b| a.local_id.cmp(&b.local_id));
        reset
    }

    /// Put an attempt whose settle could not be recorded back in the queue.
    ///
    /// A remote id the remote store already handed out is kept, so the next
    /// replay is an update and never a second create.
    pub fn release_attempt(
        &mut self,
        attempt: &ReplayAttempt,
        remote_id: Option<RemoteId>,
    ) -> Result<Record> {
        let record = self.record_mut(&attempt.local_id)?;
        if record.sync == crate::SyncStatus::Syncing && record.remote_id.is_none() {
            record.remote_id = remote_id;
        }
        record.reset_interrupted();
        Ok(record.clone())
    }

    /// Requeue one failed record.
    pub fn requeue(&mut self, id: &LocalId) -> Result<Record> {
        let record = self.record_mut(id)?;
        if !record.requeue() {
            return Err(Error::invalid_state(
                id,
                format!("cannot retry a {} record", record.sync.label()),
            ));
        }
        Ok(record.clone())
    }

    /// Requeue every failed record.
    pub fn requeue_failed(&mut self) -> Vec<Record> {
        let mut requeued = Vec::new();
        for collection in self.collections.values_mut() {
            for record in collection.records.values_mut() {
                if record.requeue() {
                    requeued.push(record.clone());
                }
            }
        }
        requeued.sort_by(|a, b| a.local_id.cmp(&b.local_id));
        requeued
    }

    /// Export the current store state as a snapshot.
    pub fn export_state(&self) -> crate::snapshot::StoreSnapshot {
        let mut snapshot = crate::snapshot::StoreSnapshot::new(self.schema.version);
        for record in self.records() {
            snapshot.add_record(record.clone());
        }
        snapshot
    }

    /// Import state from a snapshot, replacing the current records.
    pub fn import_state(&mut self, snapshot: crate::snapshot::StoreSnapshot) -> Result<()> {
        snapshot.validate(&self.schema)?;

        for collection in self.collections.values_mut() {
            collection.records.clear();
        }
        self.index.clear();

        for (_, records) in snapshot.collections {
            for (_, record) in records {
                self.insert_record(record)?;
            }
        }

        Ok(())
    }

    /// Get snapshot metadata without full export.
    pub fn snapshot_metadata(&self) -> crate::snapshot::SnapshotMetadata {
        crate::snapshot::SnapshotMetadata {
            format_version: crate::snapshot::SNAPSHOT_FORMAT_VERSION,
            schema_version: self.schema.version,
            record_count: self.len(),
            queued_count: self.records().filter(|r| r.is_queued()).count(),
        }
    }

    pub(crate) fn put(&mut self, record: Record) {
        self.index
            .insert(record.local_id.clone(), record.collection.clone());
        if let Some(collection) = self.collections.get_mut(&record.collection) {
            collection.insert(record);
        }
    }

    pub(crate) fn record_mut(&mut self, id: &LocalId) -> Result<&mut Record> {
        let collection = self
            .index
            .get(id)
            .ok_or_else(|| Error::RecordNotFound(id.clone()))?;
        self.collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| Error::RecordNotFound(id.clone()))
    }

    /// Every foreign key must name an existing record of its target
    /// collection, by local or remote ID.
    fn check_references(&self, collection: &str, fields: &Fields) -> Result<()> {
        let schema = self.schema.collection(collection)?;
        for (reference, value) in schema.referenced_values(fields) {
            if self.resolve(&reference.target, value).is_none() {
                return Err(Error::DanglingReference {
                    field: reference.field.clone(),
                    collection: reference.target.clone(),
                    reference: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Fields with every resolvable local reference swapped for the remote ID.
    fn resolved_fields(&self, record: &Record) -> Fields {
        let mut fields = record.fields.clone();
        if let Some(schema) = self.schema.get_collection(&record.collection) {
            for (reference, value) in schema.referenced_values(&record.fields) {
                if let Some(remote_id) = self
                    .resolve(&reference.target, value)
                    .and_then(|target| target.remote_id.as_ref())
                {
                    fields.insert(
                        reference.field.clone(),
                        serde_json::Value::String(remote_id.to_string()),
                    );
                }
            }
        }
        fields
    }
}

/// Builder for querying records in a collection.
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    store: &'a Store,
    collection: &'a Collection,
    filter: Filter,
}

impl<'a> QueryBuilder<'a> {
    fn new(store: &'a Store, collection: &'a Collection) -> Self {
        Self {
            store,
            collection,
            filter: Filter::new(),
        }
    }

    /// Restrict results to records matching `filter`.
    pub fn filter(mut self, filter: &Filter) -> Self {
        self.filter = filter.clone();
        self
    }

    /// Get all matching records, oldest first.
    pub fn all(self) -> Vec<&'a Record> {
        let mut records: Vec<&Record> = self
            .collection
            .records()
            .filter(|r| self.filter.matches(self.store, r))
            .collect();
        records.sort_by(|a, b| (a.created_at, &a.local_id).cmp(&(b.created_at, &b.local_id)));
        records
    }

    /// Get the first matching record.
    pub fn first(self) -> Option<&'a Record> {
        self.all().into_iter().next()
    }

    /// Count matching records.
    pub fn count(self) -> usize {
        self.collection
            .records()
            .filter(|r| self.filter.matches(self.store, r))
            .count()
    }
}
