//! The periodic liveness prober.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::balancer::{BalancerError, Selector, Transition};
use crate::health::ProbeClient;
use crate::observability::metrics;

/// Background task probing every known backend and toggling its
/// membership in the selector.
pub struct HealthProber {
    selector: Arc<dyn Selector>,
    probe: ProbeClient,
    interval: Duration,
    fatal_tx: mpsc::Sender<BalancerError>,
}

impl HealthProber {
    pub fn new(
        selector: Arc<dyn Selector>,
        interval: Duration,
        fatal_tx: mpsc::Sender<BalancerError>,
    ) -> Self {
        Self {
            selector,
            probe: ProbeClient::new(),
            interval,
            fatal_tx,
        }
    }

    /// Run until the shutdown signal fires or an emptying transition is
    /// reported as fatal.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "health prober started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("health prober stopping");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            if self.sweep().await.is_err() {
                return;
            }
        }
    }

    /// Probe every record once and apply the observed transitions.
    /// Returns `Err(())` after reporting an all-backends-down fatal.
    pub async fn sweep(&self) -> Result<(), ()> {
        for record in self.selector.records() {
            let url = record.backend.health_check_url();
            let alive = self.probe.is_host_alive(&url).await;

            if alive {
                if self.selector.mark_up(record.index) == Transition::Applied {
                    tracing::info!(
                        addr = %record.backend.url,
                        "server is live again, adding back to load balancer"
                    );
                    metrics::record_backend_health(&record.backend.url, true);
                }
                continue;
            }

            match self.selector.mark_down(record.index) {
                Ok(Transition::Applied) => {
                    tracing::info!(
                        addr = %record.backend.url,
                        "server is down, removing from load balancer"
                    );
                    metrics::record_backend_health(&record.backend.url, false);
                }
                Ok(Transition::Unchanged) => {}
                Err(err @ BalancerError::AllBackendsDown) => {
                    tracing::error!(
                        addr = %record.backend.url,
                        "last live backend went down"
                    );
                    let _ = self.fatal_tx.send(err).await;
                    return Err(());
                }
                Err(err) => {
                    tracing::error!(error = %err, "health transition failed");
                }
            }
        }
        Ok(())
    }
}
