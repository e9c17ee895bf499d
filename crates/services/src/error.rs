//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::{Category, FieldError, SnapshotError};
use storage::repository::StorageError;

use crate::remote::RemoteError;

/// Errors returned synchronously by `ProgressService` operations.
///
/// Transient remote failures never appear here — they are absorbed into the
/// pending queue and retried by reconciliation. What does appear is local
/// validation, storage trouble, and the absence of a signed-in user.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("no signed-in user")]
    Unauthenticated,

    #[error("score {score} for {category} stage {stage} is outside 0..={max}")]
    InvalidScore {
        category: Category,
        stage: u8,
        score: u32,
        max: u32,
    },

    #[error("unlock level cannot regress from {current} to {requested}")]
    InvalidTransition { current: u32, requested: u32 },

    #[error(transparent)]
    InvalidStage(#[from] FieldError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Non-transient sync failures, reported once over the service's fault
/// channel for the display layer to surface. None of these halt subsequent
/// operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFault {
    /// The remote store rejected our credentials; writes will not be retried
    /// automatically.
    Unauthorized,
    /// The remote store reported a write conflict. Unexpected under the
    /// single-writer-per-user model, so it is surfaced rather than resolved.
    Conflict,
    /// The local cache could not be read; the session started from a
    /// zero-valued snapshot.
    CacheUnreadable { detail: String },
    /// The authoritative document could not be interpreted; the existing
    /// snapshot was kept.
    RemoteDocumentInvalid { detail: String },
}

impl SyncFault {
    /// Classifies a remote error, returning `None` for transient failures
    /// that should stay on the retry path.
    #[must_use]
    pub fn from_remote(err: &RemoteError) -> Option<Self> {
        match err {
            RemoteError::Unavailable(_) => None,
            RemoteError::Unauthorized => Some(SyncFault::Unauthorized),
            RemoteError::Conflict => Some(SyncFault::Conflict),
            RemoteError::Malformed(detail) => Some(SyncFault::RemoteDocumentInvalid {
                detail: detail.clone(),
            }),
        }
    }
}
