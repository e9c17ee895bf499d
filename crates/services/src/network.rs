use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Reachability of the remote store, owned exclusively by the monitor.
/// Everything else only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    #[must_use]
    pub fn is_online(self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

//
// ─── PROBE ─────────────────────────────────────────────────────────────────────
//

/// Source of truth the monitor polls. The HTTP probe backs production;
/// tests drive a [`ManualProbe`] instead.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> Connectivity;
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes reachability with a HEAD request; any response, including an error
/// status, means the path is up.
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> Connectivity {
        let result = self
            .client
            .head(&self.url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(_) => Connectivity::Online,
            Err(_) => Connectivity::Offline,
        }
    }
}

/// Probe whose answer is flipped from the outside; for tests and demos.
#[derive(Clone, Default)]
pub struct ManualProbe {
    online: Arc<AtomicBool>,
}

impl ManualProbe {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let probe = Self::default();
        probe.online.store(online, Ordering::SeqCst);
        probe
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for ManualProbe {
    async fn check(&self) -> Connectivity {
        if self.online.load(Ordering::SeqCst) {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }
}

//
// ─── MONITOR ───────────────────────────────────────────────────────────────────
//

/// Background reachability monitor.
///
/// Polls the probe on a fixed interval and publishes over a watch channel,
/// but only on transitions — subscribers see each offline→online or
/// online→offline edge exactly once via `changed()`, never a repeat of the
/// same state. Starts `Offline` until the first probe lands, so a reachable
/// network always produces an initial online transition.
///
/// The polling task lives as long as the monitor; dropping it (at sign-out)
/// stops the task.
pub struct ConnectivityMonitor {
    rx: watch::Receiver<Connectivity>,
    handle: JoinHandle<()>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn spawn(probe: Arc<dyn ConnectivityProbe>, poll_interval: Duration) -> Self {
        let (tx, rx) = watch::channel(Connectivity::Offline);

        let handle = tokio::spawn(async move {
            loop {
                let observed = probe.check().await;
                let transitioned = tx.send_if_modified(|current| {
                    if *current == observed {
                        false
                    } else {
                        *current = observed;
                        true
                    }
                });
                if transitioned {
                    tracing::debug!(state = ?observed, "connectivity transition");
                }
                tokio::time::sleep(poll_interval).await;
            }
        });

        Self { rx, handle }
    }

    #[must_use]
    pub fn current(&self) -> Connectivity {
        *self.rx.borrow()
    }

    /// A receiver that yields one `changed()` per transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.rx.clone()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_for(rx: &mut watch::Receiver<Connectivity>, want: Connectivity) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while *rx.borrow_and_update() != want {
                rx.changed().await.expect("monitor alive");
            }
        })
        .await
        .expect("expected transition");
    }

    #[tokio::test]
    async fn monitor_reports_transitions_once() {
        let probe = ManualProbe::new(false);
        let monitor = ConnectivityMonitor::spawn(
            Arc::new(probe.clone()),
            Duration::from_millis(5),
        );
        let mut rx = monitor.subscribe();

        assert_eq!(monitor.current(), Connectivity::Offline);

        probe.set_online(true);
        wait_for(&mut rx, Connectivity::Online).await;

        // repeated identical polls publish nothing further
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!rx.has_changed().expect("monitor alive"));

        probe.set_online(false);
        wait_for(&mut rx, Connectivity::Offline).await;
    }
}
