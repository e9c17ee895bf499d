use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use quiz_core::model::{PendingMutation, UserId};
use storage::repository::{ProgressCacheRepository, StorageError};

use crate::remote::RemoteError;

/// Durable FIFO of not-yet-committed writes.
///
/// The in-memory deque mirrors the cache store's persisted queue; every
/// change is written through before the call returns, so acknowledgment
/// always follows durability. Mutations leave the queue only after a
/// confirmed remote commit and are never reordered — a failed commit leaves
/// the failed mutation at the head for the next drain.
pub struct MutationQueue {
    user: UserId,
    cache: Arc<dyn ProgressCacheRepository>,
    items: VecDeque<PendingMutation>,
}

/// What a drain attempt accomplished.
#[derive(Debug)]
pub struct DrainOutcome {
    /// Mutations confirmed by the remote store and removed from the queue.
    pub committed: usize,
    /// The failure that stopped the drain, if it stopped early.
    pub error: Option<RemoteError>,
}

impl DrainOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

impl MutationQueue {
    /// Loads the persisted queue for a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the stored queue cannot be read.
    pub async fn load(
        user: UserId,
        cache: Arc<dyn ProgressCacheRepository>,
    ) -> Result<Self, StorageError> {
        let items = cache.load_queue(&user).await?.into();
        Ok(Self { user, cache, items })
    }

    /// An empty queue that has nothing persisted yet.
    #[must_use]
    pub fn empty(user: UserId, cache: Arc<dyn ProgressCacheRepository>) -> Self {
        Self {
            user,
            cache,
            items: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pending mutations in enqueue order.
    pub fn items(&self) -> impl Iterator<Item = &PendingMutation> {
        self.items.iter()
    }

    /// Appends a mutation, persisting the updated queue before returning.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the queue cannot be persisted; the in-memory
    /// queue is rolled back so memory and disk stay in step.
    pub async fn enqueue(&mut self, mutation: PendingMutation) -> Result<(), StorageError> {
        self.items.push_back(mutation);
        if let Err(err) = self.persist().await {
            self.items.pop_back();
            return Err(err);
        }
        Ok(())
    }

    /// Drops every pending mutation, persisting the empty queue.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the replacement cannot be committed; the
    /// in-memory queue is left untouched in that case.
    pub async fn clear(&mut self) -> Result<(), StorageError> {
        self.cache.replace_queue(&self.user, &[]).await?;
        self.items.clear();
        Ok(())
    }

    /// Applies mutations head-to-tail, removing each only after `apply`
    /// confirms it.
    ///
    /// Stops at the first failure: the failed mutation stays at the head and
    /// the tail keeps its order, so replay is at-least-once and never
    /// out-of-order. The persisted queue is updated after every removal.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if persisting a removal fails; the committed
    /// mutation has already reached the remote store, and leaving it queued
    /// only costs an idempotent re-merge on the next drain.
    pub async fn drain_in_order<F, Fut>(&mut self, mut apply: F) -> Result<DrainOutcome, StorageError>
    where
        F: FnMut(PendingMutation) -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
    {
        let mut committed = 0;

        while let Some(head) = self.items.front().cloned() {
            match apply(head).await {
                Ok(()) => {
                    self.items.pop_front();
                    self.persist().await?;
                    committed += 1;
                }
                Err(error) => {
                    tracing::debug!(%error, committed, remaining = self.items.len(), "drain stopped");
                    return Ok(DrainOutcome {
                        committed,
                        error: Some(error),
                    });
                }
            }
        }

        Ok(DrainOutcome {
            committed,
            error: None,
        })
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let items: Vec<PendingMutation> = self.items.iter().cloned().collect();
        self.cache.replace_queue(&self.user, &items).await
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
