use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::network::Connectivity;
use crate::service::{DrainStatus, ProgressService};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Background reconciliation loop: idle until connectivity comes back, then
/// drain the pending queue and refresh local state from an authoritative
/// read.
///
/// A transient drain failure schedules a retry with exponential backoff (it
/// never busy-loops); a non-retryable failure parks the engine until the next
/// transition. The loop runs for the life of the session — dropping the
/// engine at sign-out stops it. The queue is durable and replay idempotent,
/// so stopping mid-drain is safe.
pub struct ReconcileEngine {
    handle: JoinHandle<()>,
}

impl ReconcileEngine {
    #[must_use]
    pub fn spawn(service: Arc<ProgressService>) -> Self {
        let connectivity = service.subscribe_connectivity();
        let handle = tokio::spawn(run(service, connectivity));
        Self { handle }
    }
}

impl Drop for ReconcileEngine {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// The default backoff config is fine apart from `max_elapsed_time`: left at
// its default the retries would give up after fifteen minutes, but a session
// can stay offline far longer than that.
fn drain_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        max_interval: MAX_RETRY_DELAY,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

async fn run(service: Arc<ProgressService>, mut connectivity: watch::Receiver<Connectivity>) {
    let mut backoff = drain_backoff();
    let mut retry_in: Option<Duration> = None;

    // a queue left over from a previous session drains as soon as we start
    // online; otherwise the first transition kicks things off
    if connectivity.borrow_and_update().is_online() {
        retry_in = sync_cycle(&service, &mut backoff).await;
    }

    loop {
        let transitioned = if let Some(delay) = retry_in.take() {
            tokio::select! {
                changed = connectivity.changed() => match changed {
                    Ok(()) => true,
                    Err(_) => break,
                },
                () = tokio::time::sleep(delay) => false,
            }
        } else {
            match connectivity.changed().await {
                Ok(()) => true,
                Err(_) => break,
            }
        };

        let online = connectivity.borrow_and_update().is_online();
        if transitioned {
            backoff.reset();
            if !online {
                tracing::debug!("connectivity lost, reconciliation idle");
                continue;
            }
        } else if !online {
            // retry timer fired while offline; wait for the next transition
            continue;
        }

        retry_in = sync_cycle(&service, &mut backoff).await;
    }

    tracing::debug!("reconciliation engine stopped");
}

/// One Draining → Refreshing pass. Returns the delay before the next attempt
/// when the drain stalled on a transient failure.
async fn sync_cycle(
    service: &ProgressService,
    backoff: &mut ExponentialBackoff,
) -> Option<Duration> {
    tracing::debug!("draining pending mutations");
    match service.drain_pending().await {
        DrainStatus::Drained => {
            tracing::debug!("refreshing from authoritative read");
            service.refresh_from_remote().await;
            backoff.reset();
            None
        }
        DrainStatus::Stalled => {
            let delay = backoff.next_backoff().unwrap_or(MAX_RETRY_DELAY);
            tracing::debug!(?delay, "drain stalled, retrying after backoff");
            Some(delay)
        }
        DrainStatus::Halted => {
            tracing::warn!("drain halted on a non-retryable failure");
            None
        }
    }
}
