use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::checker::Prober;
use super::registry::{MonitorId, MonitorRegistry};
use super::types::ProbeResult;
use crate::database::TargetStore;

/// Probe loop for one target: probe, emit, sleep, until cancelled.
///
/// Probe failures are results, not errors; the loop only ends through its
/// cancellation token, when the result channel is gone, or on a panic. Every
/// exit drops the task's own registry entry, if it still holds one.
pub struct ProbeTask {
    id: MonitorId,
    url: String,
    interval: Duration,
    prober: Arc<dyn Prober>,
    store: Arc<dyn TargetStore>,
    results: mpsc::Sender<ProbeResult>,
    registry: Arc<MonitorRegistry>,
    cancel: CancellationToken,
}

impl ProbeTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: MonitorId,
        url: String,
        interval: Duration,
        prober: Arc<dyn Prober>,
        store: Arc<dyn TargetStore>,
        results: mpsc::Sender<ProbeResult>,
        registry: Arc<MonitorRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self { id, url, interval, prober, store, results, registry, cancel }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let _registration = Registration { registry: self.registry.clone(), url: self.url.clone(), id: self.id };
        info!(url = %self.url, interval = ?self.interval, "Probe task started");

        while !self.cancel.is_cancelled() {
            let result = probe_once(self.prober.as_ref(), &self.url).await;

            // Stop was requested while the request was in flight; the result
            // must not be emitted after the stop.
            if self.cancel.is_cancelled() {
                break;
            }

            info!(
                url = %result.url,
                status = %result.status,
                response_time = ?result.response_time,
                "Probed target"
            );

            match self.results.try_send(result) {
                Ok(()) => {}
                Err(TrySendError::Full(result)) => {
                    warn!(url = %result.url, "Result publisher is backed up, dropping result");
                }
                Err(TrySendError::Closed(_)) => {
                    error!(url = %self.url, "Result channel closed, stopping probe task");
                    return;
                }
            }

            self.refresh_interval().await;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        debug!(url = %self.url, "Probe task cancelled");
    }

    /// Pick up interval changes made since the last cycle. On a failed or
    /// empty lookup the previous interval stays in effect.
    async fn refresh_interval(&mut self) {
        match self.store.interval_seconds(&self.url).await {
            Ok(Some(seconds)) => {
                let interval = Duration::from_secs(seconds);
                if interval != self.interval {
                    info!(url = %self.url, old = ?self.interval, new = ?interval, "Probe interval changed");
                    self.interval = interval;
                }
            }
            Ok(None) => debug!(url = %self.url, "Target no longer stored, awaiting stop"),
            Err(e) => warn!(url = %self.url, "Failed to re-read interval, keeping {:?}: {}", self.interval, e),
        }
    }
}

/// Removes the registry entry of a task when it exits, unwinding included.
/// After a regular stop the entry is already gone and this is a no-op.
struct Registration {
    registry: Arc<MonitorRegistry>,
    url: String,
    id: MonitorId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.deregister(&self.url, self.id) {
            warn!(url = %self.url, "Probe task exited on its own, deregistered");
        }
    }
}

/// One probe, timed whatever the outcome.
pub async fn probe_once(prober: &dyn Prober, url: &str) -> ProbeResult {
    let start = Instant::now();
    let outcome = prober.probe(url).await;
    let response_time = start.elapsed();

    match outcome {
        Ok(status_line) => ProbeResult::response(url, status_line, response_time),
        Err(e) => ProbeResult::failure(url, e, response_time),
    }
}
