use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, broadcast, watch};

use quiz_core::model::{
    Category, CategoryBreakdown, FieldKey, FieldValue, PendingMutation, ProgressSnapshot,
    StageKey, UserId,
};
use quiz_core::time::Clock;
use storage::repository::{ProgressCacheRepository, SnapshotRecord};

use crate::error::{ProgressError, SyncFault};
use crate::network::Connectivity;
use crate::queue::MutationQueue;
use crate::remote::ProgressRemote;

//
// ─── RESULTS ───────────────────────────────────────────────────────────────────
//

/// Result of recording a daily-question answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyAnswerOutcome {
    /// The answer was recorded; `scored` is true when it added points.
    Recorded { scored: bool },
    /// An answer was already recorded today; nothing changed.
    AlreadyAnswered,
}

/// How a drain attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// The queue is empty; every pending mutation reached the remote store.
    Drained,
    /// A transient failure stopped the drain; worth retrying with backoff.
    Stalled,
    /// A non-retryable failure stopped the drain; wait for the next
    /// connectivity transition rather than retrying automatically.
    Halted,
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

struct Inner {
    snapshot: ProgressSnapshot,
    queue: MutationQueue,
}

/// The session's progress aggregate: the one writable owner of a user's
/// scores and unlock level.
///
/// Constructed at sign-in and dropped at sign-out; there is no global
/// instance. Every mutation path — user saves, queue drains, refreshes —
/// runs inside one async mutex, so presentation code and background
/// reconciliation can never interleave writes. Readers take snapshot copies
/// through the watch channel and never block writers.
///
/// Saves are optimistic: the published snapshot and the local cache change
/// before any network traffic, and a failed remote write leaves the local
/// value in place and queued for replay.
pub struct ProgressService {
    user: UserId,
    clock: Clock,
    cache: Arc<dyn ProgressCacheRepository>,
    remote: Arc<dyn ProgressRemote>,
    connectivity: watch::Receiver<Connectivity>,
    inner: Mutex<Inner>,
    progress_tx: watch::Sender<ProgressSnapshot>,
    faults_tx: broadcast::Sender<SyncFault>,
    startup_fault: Option<SyncFault>,
    // lets `fetch_aggregate` hand a background refresh its own handle
    self_ref: Weak<Self>,
}

impl ProgressService {
    /// Builds the session aggregate for a signed-in user, loading the cached
    /// snapshot and pending queue.
    ///
    /// An unreadable cache is recorded as the startup fault and replaced with
    /// a zero-valued snapshot — startup never fails on local state.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Unauthenticated` if `user_id` is empty.
    pub async fn sign_in(
        user_id: &str,
        cache: Arc<dyn ProgressCacheRepository>,
        remote: Arc<dyn ProgressRemote>,
        connectivity: watch::Receiver<Connectivity>,
        clock: Clock,
    ) -> Result<Arc<Self>, ProgressError> {
        let user = UserId::new(user_id).map_err(|_| ProgressError::Unauthenticated)?;
        let (faults_tx, _) = broadcast::channel(16);
        let mut startup_fault = None;

        let snapshot = match cache.load_snapshot(&user).await {
            Ok(Some(record)) => match record.into_snapshot() {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    tracing::warn!(%err, "cached snapshot invalid, starting zeroed");
                    startup_fault = Some(SyncFault::CacheUnreadable {
                        detail: err.to_string(),
                    });
                    ProgressSnapshot::zeroed()
                }
            },
            // nothing local yet: the remote client's document cache is
            // instant and may still have this user's last session
            Ok(None) => match remote.read_cached(&user).await {
                Ok(Some(fields)) => match ProgressSnapshot::from_fields(&fields) {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        tracing::warn!(%err, "cached remote document invalid, starting zeroed");
                        ProgressSnapshot::zeroed()
                    }
                },
                _ => ProgressSnapshot::zeroed(),
            },
            Err(err) => {
                tracing::warn!(%err, "cache unreadable, starting zeroed");
                startup_fault = Some(SyncFault::CacheUnreadable {
                    detail: err.to_string(),
                });
                ProgressSnapshot::zeroed()
            }
        };

        let queue = match MutationQueue::load(user.clone(), Arc::clone(&cache)).await {
            Ok(queue) => queue,
            Err(err) => {
                tracing::warn!(%err, "pending queue unreadable, starting empty");
                startup_fault.get_or_insert(SyncFault::CacheUnreadable {
                    detail: err.to_string(),
                });
                MutationQueue::empty(user.clone(), Arc::clone(&cache))
            }
        };

        let (progress_tx, _) = watch::channel(snapshot.clone());

        Ok(Arc::new_cyclic(|self_ref| Self {
            user,
            clock,
            cache,
            remote,
            connectivity,
            inner: Mutex::new(Inner { snapshot, queue }),
            progress_tx,
            faults_tx,
            startup_fault,
            self_ref: self_ref.clone(),
        }))
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Live snapshot stream, pushed on every successful local or remote
    /// mutation. The current value is available immediately.
    #[must_use]
    pub fn observe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    /// One-shot reports of non-transient sync failures.
    #[must_use]
    pub fn observe_faults(&self) -> broadcast::Receiver<SyncFault> {
        self.faults_tx.subscribe()
    }

    /// Fault recorded while loading local state at sign-in, if any. The fault
    /// channel cannot carry it — it has no subscribers that early.
    #[must_use]
    pub fn startup_fault(&self) -> Option<&SyncFault> {
        self.startup_fault.as_ref()
    }

    /// The connectivity stream this service watches.
    #[must_use]
    pub fn subscribe_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.clone()
    }

    /// Number of mutations still awaiting a remote commit.
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    fn is_online(&self) -> bool {
        self.connectivity.borrow().is_online()
    }

    //
    // ─── SAVE OPERATIONS ───────────────────────────────────────────────────
    //

    /// Records a stage score, optimistically and immediately.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScore` if `score` exceeds the category's per-stage
    /// maximum, `InvalidStage` for an unknown stage index, or a storage error
    /// if the update cannot be made durable locally.
    pub async fn save_score(
        &self,
        category: Category,
        stage_index: u8,
        score: u32,
    ) -> Result<(), ProgressError> {
        let stage = StageKey::new(category, stage_index)?;
        if score > stage.max_score() {
            return Err(ProgressError::InvalidScore {
                category,
                stage: stage_index,
                score,
                max: stage.max_score(),
            });
        }

        let mut inner = self.inner.lock().await;
        self.commit_locked(&mut inner, PendingMutation::stage_score(stage, score))
            .await
    }

    /// Moves the unlock level forward.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if `new_level` would regress the current
    /// level; use [`ProgressService::reset_progress`] for the explicit reset.
    pub async fn record_unlock(&self, new_level: u32) -> Result<(), ProgressError> {
        let mut inner = self.inner.lock().await;
        let current = inner.snapshot.unlocked_stages();
        if new_level < current {
            return Err(ProgressError::InvalidTransition {
                current,
                requested: new_level,
            });
        }
        if new_level == current {
            return Ok(());
        }
        self.commit_locked(&mut inner, PendingMutation::unlock(new_level))
            .await
    }

    /// Records a completed stage run: the score, plus the unlock bump to the
    /// following stage when the run was on the roadmap. One mutation carries
    /// both fields so replay cannot separate them.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`ProgressService::save_score`].
    pub async fn record_stage_completion(
        &self,
        category: Category,
        stage_index: u8,
        score: u32,
    ) -> Result<(), ProgressError> {
        let stage = StageKey::new(category, stage_index)?;
        if score > stage.max_score() {
            return Err(ProgressError::InvalidScore {
                category,
                stage: stage_index,
                score,
                max: stage.max_score(),
            });
        }

        let mut inner = self.inner.lock().await;
        let mut mutation = PendingMutation::stage_score(stage, score);
        if category == Category::Roadmap {
            let next = u32::from(stage_index) + 1;
            if next > inner.snapshot.unlocked_stages() {
                mutation.set(FieldKey::UnlockedStages, FieldValue::Int(next));
            }
        }
        self.commit_locked(&mut inner, mutation).await
    }

    /// Records the daily-question answer, at most once per calendar day.
    /// A correct answer adds two points to the daily counter.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update cannot be made durable locally.
    pub async fn record_daily_answer(
        &self,
        correct: bool,
    ) -> Result<DailyAnswerOutcome, ProgressError> {
        let today = self.clock.today();
        let mut inner = self.inner.lock().await;
        if inner.snapshot.last_daily_answer() == Some(today) {
            return Ok(DailyAnswerOutcome::AlreadyAnswered);
        }

        let new_score = correct.then(|| inner.snapshot.daily_score().saturating_add(2));
        self.commit_locked(&mut inner, PendingMutation::daily_answer(today, new_score))
            .await?;
        Ok(DailyAnswerOutcome::Recorded { scored: correct })
    }

    /// Adjusts the freestyle counter: up one for a correct answer, down one
    /// (never below zero) otherwise. Returns the new counter value.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update cannot be made durable locally.
    pub async fn record_freestyle_answer(&self, correct: bool) -> Result<u32, ProgressError> {
        let mut inner = self.inner.lock().await;
        let current = inner.snapshot.freestyle_score();
        let updated = if correct {
            current.saturating_add(1)
        } else {
            current.saturating_sub(1)
        };
        if updated != current {
            self.commit_locked(&mut inner, PendingMutation::freestyle_score(updated))
                .await?;
        }
        Ok(updated)
    }

    /// The explicit reset: zeroes every recorded score, returns the unlock
    /// level to 1, and discards queued writes (they predate the reset, and
    /// replaying them afterwards would undo it).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the cleared state cannot be made durable.
    pub async fn reset_progress(&self) -> Result<(), ProgressError> {
        let mut inner = self.inner.lock().await;
        inner.queue.clear().await?;

        let mut mutation = PendingMutation::unlock(1);
        for category in Category::ALL {
            for (stage, _) in inner.snapshot.category_scores(category) {
                mutation.set(FieldKey::Stage(stage), FieldValue::Int(0));
            }
        }
        mutation.set(FieldKey::DailyScore, FieldValue::Int(0));
        mutation.set(FieldKey::FreestyleScore, FieldValue::Int(0));

        let previous = inner.snapshot.clone();
        inner.snapshot = ProgressSnapshot::zeroed();
        let record = SnapshotRecord::from_snapshot(&inner.snapshot, self.clock.now());
        if let Err(err) = self.cache.save_snapshot(&self.user, &record).await {
            inner.snapshot = previous;
            return Err(err.into());
        }
        self.publish(&inner.snapshot);
        self.push_or_enqueue(&mut inner, mutation).await?;
        Ok(())
    }

    //
    // ─── FETCH OPERATIONS ──────────────────────────────────────────────────
    //

    /// Cached-then-refreshed view of the user's progress.
    ///
    /// Returns the current snapshot immediately; when online, also triggers a
    /// background authoritative refresh, so observers may see a second,
    /// updated emission moments later.
    pub async fn fetch_aggregate(&self) -> ProgressSnapshot {
        let snapshot = self.inner.lock().await.snapshot.clone();
        if self.is_online() {
            if let Some(service) = self.self_ref.upgrade() {
                tokio::spawn(async move {
                    service.refresh_from_remote().await;
                });
            }
        }
        snapshot
    }

    /// Current snapshot copy without triggering a refresh.
    pub async fn snapshot(&self) -> ProgressSnapshot {
        self.inner.lock().await.snapshot.clone()
    }

    /// Summed score for one category against its fixed maximum.
    pub async fn category_breakdown(&self, category: Category) -> CategoryBreakdown {
        self.inner.lock().await.snapshot.breakdown(category)
    }

    /// Summed score across all categories against the combined maximum.
    pub async fn overall_breakdown(&self) -> CategoryBreakdown {
        self.inner.lock().await.snapshot.overall_breakdown()
    }

    //
    // ─── SYNC INTERNALS ────────────────────────────────────────────────────
    //

    /// Replays queued mutations against the remote store, head first.
    pub async fn drain_pending(&self) -> DrainStatus {
        let mut inner = self.inner.lock().await;
        if inner.queue.is_empty() {
            return DrainStatus::Drained;
        }

        let remote = Arc::clone(&self.remote);
        let user = self.user.clone();
        let result = inner
            .queue
            .drain_in_order(move |mutation| {
                let remote = Arc::clone(&remote);
                let user = user.clone();
                async move { remote.write_partial(&user, mutation.fields()).await }
            })
            .await;

        match result {
            Ok(outcome) => {
                if outcome.committed > 0 {
                    tracing::debug!(committed = outcome.committed, "drained pending mutations");
                }
                match outcome.error {
                    None => DrainStatus::Drained,
                    Some(err) if err.is_transient() => DrainStatus::Stalled,
                    Some(err) => {
                        self.report_remote_fault(&err);
                        DrainStatus::Halted
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to persist drained queue");
                DrainStatus::Stalled
            }
        }
    }

    /// Overwrites local state from an authoritative read.
    ///
    /// Still-queued mutations are replayed over the fetched base and the
    /// unlock level never moves backwards, so a refresh cannot revert an
    /// optimistic update. On any failure the stale-but-valid snapshot is
    /// kept. Returns whether the refresh landed.
    pub async fn refresh_from_remote(&self) -> bool {
        let fields = match self.remote.read_authoritative(&self.user).await {
            Ok(fields) => fields,
            Err(err) => {
                if err.is_transient() {
                    tracing::debug!(%err, "authoritative read unavailable, keeping cached state");
                } else {
                    self.report_remote_fault(&err);
                }
                return false;
            }
        };

        let mut fresh = match ProgressSnapshot::from_fields(&fields) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.report_fault(SyncFault::RemoteDocumentInvalid {
                    detail: err.to_string(),
                });
                return false;
            }
        };

        let mut inner = self.inner.lock().await;

        for mutation in inner.queue.items() {
            if let Err(err) = fresh.apply(mutation) {
                tracing::warn!(%err, "queued mutation no longer applies");
            }
        }
        if fresh.unlocked_stages() < inner.snapshot.unlocked_stages() {
            let keep = PendingMutation::unlock(inner.snapshot.unlocked_stages());
            let _ = fresh.apply(&keep);
        }

        if fresh == inner.snapshot {
            return true;
        }

        let record = SnapshotRecord::from_snapshot(&fresh, self.clock.now());
        if let Err(err) = self.cache.save_snapshot(&self.user, &record).await {
            tracing::warn!(%err, "failed to cache refreshed snapshot");
        }
        inner.snapshot = fresh;
        self.publish(&inner.snapshot);
        true
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────
    //

    /// Applies a validated mutation: update the snapshot, make it durable,
    /// publish it, then hand the mutation to the sync path. Rolls the
    /// snapshot back if local persistence fails.
    async fn commit_locked(
        &self,
        inner: &mut Inner,
        mutation: PendingMutation,
    ) -> Result<(), ProgressError> {
        let previous = inner.snapshot.clone();
        inner.snapshot.apply(&mutation)?;

        let record = SnapshotRecord::from_snapshot(&inner.snapshot, self.clock.now());
        if let Err(err) = self.cache.save_snapshot(&self.user, &record).await {
            inner.snapshot = previous;
            return Err(err.into());
        }

        self.publish(&inner.snapshot);
        self.push_or_enqueue(inner, mutation).await
    }

    /// Online with an empty queue: try one immediate write and skip the
    /// queue entirely on success. Anything else goes to the tail of the
    /// queue — writing ahead of queued mutations would reorder commits for
    /// fields both touch.
    async fn push_or_enqueue(
        &self,
        inner: &mut Inner,
        mutation: PendingMutation,
    ) -> Result<(), ProgressError> {
        if self.is_online() && inner.queue.is_empty() {
            match self.remote.write_partial(&self.user, mutation.fields()).await {
                Ok(()) => {
                    tracing::debug!(fields = mutation.len(), "committed immediately");
                    return Ok(());
                }
                Err(err) if err.is_transient() => {
                    tracing::debug!(%err, "immediate write failed, queuing for replay");
                }
                Err(err) => {
                    // surfaced once, not retried automatically; the optimistic
                    // local value stays in place
                    self.report_remote_fault(&err);
                    return Ok(());
                }
            }
        }
        inner.queue.enqueue(mutation).await?;
        Ok(())
    }

    fn publish(&self, snapshot: &ProgressSnapshot) {
        self.progress_tx.send_replace(snapshot.clone());
    }

    fn report_remote_fault(&self, err: &crate::remote::RemoteError) {
        if let Some(fault) = SyncFault::from_remote(err) {
            self.report_fault(fault);
        }
    }

    fn report_fault(&self, fault: SyncFault) {
        tracing::warn!(?fault, "sync fault");
        let _ = self.faults_tx.send(fault);
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::time::fixed_clock;
    use storage::repository::InMemoryCache;

    use crate::remote::InMemoryRemote;

    async fn offline_service() -> Arc<ProgressService> {
        // sender dropped on purpose: borrow() keeps returning Offline
        let (_tx, rx) = watch::channel(Connectivity::Offline);
        ProgressService::sign_in(
            "uid-1",
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryRemote::new()),
            rx,
            fixed_clock(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn sign_in_requires_a_user() {
        let (_tx, rx) = watch::channel(Connectivity::Offline);
        let result = ProgressService::sign_in(
            "",
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryRemote::new()),
            rx,
            fixed_clock(),
        )
        .await;
        assert!(matches!(result, Err(ProgressError::Unauthenticated)));
    }

    #[tokio::test]
    async fn save_score_rejects_out_of_range() {
        let service = offline_service().await;
        let err = service.save_score(Category::Roadmap, 3, 21).await.unwrap_err();
        assert!(matches!(
            err,
            ProgressError::InvalidScore { max: 20, score: 21, .. }
        ));

        let err = service.save_score(Category::Roadmap, 16, 5).await.unwrap_err();
        assert!(matches!(err, ProgressError::InvalidStage(_)));
    }

    #[tokio::test]
    async fn unlock_cannot_regress() {
        let service = offline_service().await;
        service.record_unlock(5).await.unwrap();

        let err = service.record_unlock(2).await.unwrap_err();
        assert!(matches!(
            err,
            ProgressError::InvalidTransition {
                current: 5,
                requested: 2
            }
        ));
        assert_eq!(service.snapshot().await.unlocked_stages(), 5);

        // same level is an idempotent no-op, not an error
        service.record_unlock(5).await.unwrap();
    }

    #[tokio::test]
    async fn freestyle_counter_floors_at_zero() {
        let service = offline_service().await;
        assert_eq!(service.record_freestyle_answer(false).await.unwrap(), 0);
        assert_eq!(service.record_freestyle_answer(true).await.unwrap(), 1);
        assert_eq!(service.record_freestyle_answer(false).await.unwrap(), 0);
    }
}
