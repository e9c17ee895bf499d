use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use quiz_core::model::{FieldMap, PendingMutation, UserId};

use super::SqliteCache;
use crate::repository::{ProgressCacheRepository, SnapshotRecord, StorageError};

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn corrupt<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Corrupt(e.to_string())
}

fn position_to_i64(position: usize) -> Result<i64, StorageError> {
    i64::try_from(position).map_err(|_| StorageError::Serialization("position overflow".into()))
}

#[async_trait]
impl ProgressCacheRepository for SqliteCache {
    async fn load_snapshot(&self, user: &UserId) -> Result<Option<SnapshotRecord>, StorageError> {
        let row = sqlx::query("SELECT fields, updated_at FROM snapshots WHERE user_id = ?1")
            .bind(user.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("fields").map_err(conn)?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(conn)?;
        let fields: FieldMap = serde_json::from_str(&raw).map_err(corrupt)?;

        Ok(Some(SnapshotRecord { fields, updated_at }))
    }

    async fn save_snapshot(
        &self,
        user: &UserId,
        record: &SnapshotRecord,
    ) -> Result<(), StorageError> {
        let fields = serde_json::to_string(&record.fields)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO snapshots (user_id, fields, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                fields = excluded.fields,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user.as_str())
        .bind(fields)
        .bind(record.updated_at)
        .execute(self.pool())
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn load_queue(&self, user: &UserId) -> Result<Vec<PendingMutation>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT fields FROM pending_mutations
            WHERE user_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(user.as_str())
        .fetch_all(self.pool())
        .await
        .map_err(conn)?;

        let mut queue = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("fields").map_err(conn)?;
            queue.push(serde_json::from_str(&raw).map_err(corrupt)?);
        }
        Ok(queue)
    }

    async fn replace_queue(
        &self,
        user: &UserId,
        queue: &[PendingMutation],
    ) -> Result<(), StorageError> {
        // Single transaction: an interrupted replacement rolls back to the
        // previous queue, never a truncated one.
        let mut tx = self.pool().begin().await.map_err(conn)?;

        sqlx::query("DELETE FROM pending_mutations WHERE user_id = ?1")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        let queued_at = Utc::now();
        for (position, mutation) in queue.iter().enumerate() {
            let fields = serde_json::to_string(mutation)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            sqlx::query(
                r"
                INSERT INTO pending_mutations (user_id, position, fields, queued_at)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(user.as_str())
            .bind(position_to_i64(position)?)
            .bind(fields)
            .bind(queued_at)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
