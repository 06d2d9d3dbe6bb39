//! Database operations for the records table.

use crate::error::{ClientError, Result};
use fieldsync_engine::{Fields, LocalId, Record, RemoteId, SyncStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};

/// A stored record row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    pub local_id: String,
    pub collection: String,
    pub remote_id: Option<String>,
    pub fields: String,
    pub sync_status: String,
    pub failure_reason: Option<String>,
    pub created_by: Option<String>,
    pub revision: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredRecord {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            local_id: row.try_get("local_id")?,
            collection: row.try_get("collection")?,
            remote_id: row.try_get("remote_id")?,
            fields: row.try_get("fields")?,
            sync_status: row.try_get("sync_status")?,
            failure_reason: row.try_get("failure_reason")?,
            created_by: row.try_get("created_by")?,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredRecord {
    /// Convert a database row to an engine Record.
    pub fn to_record(&self) -> Result<Record> {
        let local_id = LocalId::from(self.local_id.as_str());
        let fields: Fields = serde_json::from_str(&self.fields).map_err(|e| ClientError::Corrupt {
            local_id: local_id.clone(),
            reason: format!("fields: {}", e),
        })?;

        let sync = match self.sync_status.as_str() {
            "pending" => SyncStatus::Pending,
            "syncing" => SyncStatus::Syncing,
            "synced" => SyncStatus::Synced,
            "failed" => SyncStatus::Failed {
                reason: self.failure_reason.clone().unwrap_or_default(),
            },
            other => {
                return Err(ClientError::Corrupt {
                    local_id,
                    reason: format!("unknown sync status '{}'", other),
                })
            }
        };

        Ok(Record {
            local_id,
            remote_id: self.remote_id.as_deref().map(RemoteId::from),
            collection: self.collection.clone(),
            fields,
            sync,
            created_by: self.created_by.clone(),
            revision: self.revision.max(0) as u64,
            created_at: self.created_at.max(0) as u64,
            updated_at: self.updated_at.max(0) as u64,
        })
    }
}

/// Upsert a record (insert or update).
pub async fn upsert_record<'e, E>(executor: E, record: &Record) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let fields = serde_json::to_string(&record.fields)?;

    sqlx::query(
        r#"
        INSERT INTO records (
            local_id, collection, remote_id, fields, sync_status,
            failure_reason, created_by, revision, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (local_id) DO UPDATE SET
            remote_id = EXCLUDED.remote_id,
            fields = EXCLUDED.fields,
            sync_status = EXCLUDED.sync_status,
            failure_reason = EXCLUDED.failure_reason,
            created_by = EXCLUDED.created_by,
            revision = EXCLUDED.revision,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(record.local_id.as_str())
    .bind(&record.collection)
    .bind(record.remote_id.as_ref().map(|id| id.as_str()))
    .bind(fields)
    .bind(record.sync.label())
    .bind(record.sync.failure_reason())
    .bind(record.created_by.as_deref())
    .bind(record.revision as i64)
    .bind(record.created_at as i64)
    .bind(record.updated_at as i64)
    .execute(executor)
    .await?;

    Ok(())
}

/// Upsert several records in one transaction.
pub async fn upsert_records(pool: &SqlitePool, records: &[Record]) -> Result<()> {
    match records {
        [] => Ok(()),
        [record] => upsert_record(pool, record).await,
        _ => {
            let mut tx = pool.begin().await?;
            for record in records {
                upsert_record(&mut *tx, record).await?;
            }
            tx.commit().await?;
            Ok(())
        }
    }
}

/// Delete a record by local ID.
pub async fn delete_record(pool: &SqlitePool, local_id: &LocalId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM records WHERE local_id = ?")
        .bind(local_id.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Get every stored record, oldest first.
pub async fn load_records(pool: &SqlitePool) -> Result<Vec<StoredRecord>> {
    let rows = sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT local_id, collection, remote_id, fields, sync_status,
               failure_reason, created_by, revision, created_at, updated_at
        FROM records
        ORDER BY created_at, local_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
