//! Typed repositories over the local store.

use crate::context::SyncContext;
use crate::entities::Entity;
use crate::error::Result;
use crate::local::LocalStore;
use crate::reconciler::Reconciler;
use fieldsync_engine::{Error, Fields, Filter, LocalId, Record};
use serde_json::Value;
use std::marker::PhantomData;

/// CRUD over one collection. Writes land locally and never wait on the
/// network; when online, each write asks for a background pass.
pub struct EntityRepository<E> {
    local: LocalStore,
    reconciler: Reconciler,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for EntityRepository<E> {
    fn clone(&self) -> Self {
        Self {
            local: self.local.clone(),
            reconciler: self.reconciler.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> std::fmt::Debug for EntityRepository<E>
where
    E: Entity,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRepository")
            .field("collection", &E::COLLECTION)
            .finish()
    }
}

impl<E: Entity> EntityRepository<E> {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            local: reconciler.local().clone(),
            reconciler,
            _entity: PhantomData,
        }
    }

    /// Store a new entity under a fresh local ID.
    pub async fn create(&self, ctx: &SyncContext, entity: &E) -> Result<Record> {
        let mut fields = match serde_json::to_value(entity)? {
            Value::Object(fields) => fields,
            other => {
                return Err(Error::InvalidPayload(format!(
                    "{} must serialize to an object, got {}",
                    E::COLLECTION,
                    other
                ))
                .into())
            }
        };
        if let Some(field) = E::COURSE_FIELD {
            fill_course(&mut fields, field, ctx)?;
        }

        let record = self.local.create(E::COLLECTION, fields).await?;
        tracing::debug!(local_id = %record.local_id, collection = E::COLLECTION, "record created");
        self.reconciler.request_pass(ctx);
        Ok(record)
    }

    /// Merge `patch` into a record's fields. The record goes back in the
    /// queue.
    pub async fn update(&self, ctx: &SyncContext, id: &LocalId, patch: &Fields) -> Result<Record> {
        self.require(id).await?;
        let record = self.local.update(id, patch).await?;
        tracing::debug!(local_id = %id, collection = E::COLLECTION, revision = record.revision, "record updated");
        self.reconciler.request_pass(ctx);
        Ok(record)
    }

    pub async fn get(&self, id: &LocalId) -> Option<Record> {
        self.local
            .get(id)
            .await
            .filter(|record| record.collection == E::COLLECTION)
    }

    /// Decode a record into the entity type.
    pub async fn get_typed(&self, id: &LocalId) -> Result<Option<(Record, E)>> {
        match self.get(id).await {
            Some(record) => {
                let entity = decode(&record)?;
                Ok(Some((record, entity)))
            }
            None => Ok(None),
        }
    }

    /// Records matching `filter`, oldest first.
    pub async fn list(&self, filter: &Filter) -> Result<Vec<Record>> {
        self.local.list(E::COLLECTION, filter).await
    }

    pub async fn list_typed(&self, filter: &Filter) -> Result<Vec<(Record, E)>> {
        self.list(filter)
            .await?
            .into_iter()
            .map(|record| -> Result<(Record, E)> {
                let entity = decode(&record)?;
                Ok((record, entity))
            })
            .collect()
    }

    /// Drop a record that was never synced; it will not be replayed.
    pub async fn remove(&self, id: &LocalId) -> Result<Record> {
        self.require(id).await?;
        let removed = self.local.remove(id).await?;
        tracing::debug!(local_id = %id, collection = E::COLLECTION, "record removed");
        Ok(removed)
    }

    async fn require(&self, id: &LocalId) -> Result<()> {
        match self.get(id).await {
            Some(_) => Ok(()),
            None => Err(Error::RecordNotFound(id.clone()).into()),
        }
    }
}

fn decode<E: Entity>(record: &Record) -> Result<E> {
    Ok(serde_json::from_value(Value::Object(record.fields.clone()))?)
}

/// Attach the record to the context's course when it names none.
fn fill_course(fields: &mut Fields, field: &str, ctx: &SyncContext) -> Result<()> {
    let named = match fields.get(field) {
        Some(Value::String(course)) => !course.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    };
    if named {
        return Ok(());
    }

    match &ctx.course_scope {
        Some(course) => {
            fields.insert(field.to_string(), Value::String(course.clone()));
            Ok(())
        }
        None => Err(Error::MissingRequiredField(field.to_string()).into()),
    }
}
