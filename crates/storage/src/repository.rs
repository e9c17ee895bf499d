use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use quiz_core::model::{FieldMap, PendingMutation, ProgressSnapshot, SnapshotError, UserId};

/// Errors surfaced by cache adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The persisted record exists but cannot be decoded. Callers fall back
    /// to a zero-valued snapshot rather than failing.
    #[error("cache record corrupt: {0}")]
    Corrupt(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape of a user's progress snapshot: the flat field map plus the
/// time it was written.
///
/// This mirrors the domain `ProgressSnapshot` so repositories can
/// serialize/deserialize without leaking storage concerns into the domain
/// layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub fields: FieldMap,
    pub updated_at: DateTime<Utc>,
}

impl SnapshotRecord {
    #[must_use]
    pub fn from_snapshot(snapshot: &ProgressSnapshot, updated_at: DateTime<Utc>) -> Self {
        Self {
            fields: snapshot.to_fields(),
            updated_at,
        }
    }

    /// Convert the record back into a domain `ProgressSnapshot`.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if any persisted field fails validation.
    pub fn into_snapshot(self) -> Result<ProgressSnapshot, SnapshotError> {
        ProgressSnapshot::from_fields(&self.fields)
    }
}

/// Repository contract for the local progress cache.
///
/// Two named records per user: the last-known-good snapshot and the pending
/// mutation queue. Both must be durable before the call returns, and
/// `replace_queue` must be atomic — after a crash the stored queue is either
/// the old sequence or the new one, never a truncated mix.
#[async_trait]
pub trait ProgressCacheRepository: Send + Sync {
    /// Fetch the cached snapshot, if one has ever been written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupt` if a record exists but cannot be
    /// decoded, or other storage errors.
    async fn load_snapshot(&self, user: &UserId) -> Result<Option<SnapshotRecord>, StorageError>;

    /// Overwrite the cached snapshot, fully durable before return.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn save_snapshot(
        &self,
        user: &UserId,
        record: &SnapshotRecord,
    ) -> Result<(), StorageError>;

    /// Fetch the pending mutations in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupt` if any queued record cannot be
    /// decoded, or other storage errors.
    async fn load_queue(&self, user: &UserId) -> Result<Vec<PendingMutation>, StorageError>;

    /// Atomically replace the stored queue with the given sequence.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the replacement cannot be committed.
    async fn replace_queue(
        &self,
        user: &UserId,
        queue: &[PendingMutation],
    ) -> Result<(), StorageError>;
}

/// Simple in-memory cache implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    snapshots: Arc<Mutex<HashMap<UserId, SnapshotRecord>>>,
    queues: Arc<Mutex<HashMap<UserId, Vec<PendingMutation>>>>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressCacheRepository for InMemoryCache {
    async fn load_snapshot(&self, user: &UserId) -> Result<Option<SnapshotRecord>, StorageError> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(user).cloned())
    }

    async fn save_snapshot(
        &self,
        user: &UserId,
        record: &SnapshotRecord,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(user.clone(), record.clone());
        Ok(())
    }

    async fn load_queue(&self, user: &UserId) -> Result<Vec<PendingMutation>, StorageError> {
        let guard = self
            .queues
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(user).cloned().unwrap_or_default())
    }

    async fn replace_queue(
        &self,
        user: &UserId,
        queue: &[PendingMutation],
    ) -> Result<(), StorageError> {
        let mut guard = self
            .queues
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if queue.is_empty() {
            guard.remove(user);
        } else {
            guard.insert(user.clone(), queue.to_vec());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{Category, StageKey};
    use quiz_core::time::fixed_now;

    fn user(raw: &str) -> UserId {
        UserId::new(raw).unwrap()
    }

    fn sample_snapshot() -> ProgressSnapshot {
        let mut snapshot = ProgressSnapshot::zeroed();
        let stage = StageKey::new(Category::Roadmap, 2).unwrap();
        snapshot
            .apply(&PendingMutation::stage_score(stage, 14))
            .unwrap();
        snapshot
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let cache = InMemoryCache::new();
        let uid = user("u1");

        assert!(cache.load_snapshot(&uid).await.unwrap().is_none());

        let record = SnapshotRecord::from_snapshot(&sample_snapshot(), fixed_now());
        cache.save_snapshot(&uid, &record).await.unwrap();

        let loaded = cache.load_snapshot(&uid).await.unwrap().unwrap();
        assert_eq!(loaded.into_snapshot().unwrap(), sample_snapshot());
    }

    #[tokio::test]
    async fn queue_replace_preserves_order() {
        let cache = InMemoryCache::new();
        let uid = user("u1");
        let stage = StageKey::new(Category::TimeTrial, 1).unwrap();

        let queue = vec![
            PendingMutation::stage_score(stage, 1),
            PendingMutation::stage_score(stage, 2),
            PendingMutation::stage_score(stage, 3),
        ];
        cache.replace_queue(&uid, &queue).await.unwrap();
        assert_eq!(cache.load_queue(&uid).await.unwrap(), queue);

        cache.replace_queue(&uid, &queue[1..]).await.unwrap();
        assert_eq!(cache.load_queue(&uid).await.unwrap(), queue[1..]);

        cache.replace_queue(&uid, &[]).await.unwrap();
        assert!(cache.load_queue(&uid).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let cache = InMemoryCache::new();
        let alpha = user("alpha");
        let beta = user("beta");

        let record = SnapshotRecord::from_snapshot(&sample_snapshot(), fixed_now());
        cache.save_snapshot(&alpha, &record).await.unwrap();

        assert!(cache.load_snapshot(&beta).await.unwrap().is_none());
        assert!(cache.load_queue(&beta).await.unwrap().is_empty());
    }
}
