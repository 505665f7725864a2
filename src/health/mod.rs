//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (health_checker_time)
//!     → GET http://{addr}{health_check_path} per known backend
//!     → 2xx: alive, anything else (incl. transport error): down
//!     → transitions applied through Selector::mark_down / mark_up
//!     → an emptying transition reported on the fatal channel
//! ```
//!
//! # Design Decisions
//! - One prober task per selector, independent of request serving
//! - The stop signal is observed at the top of every iteration; a 5 s
//!   per-probe timeout bounds how long an in-flight probe can delay it
//! - Backends that failed the initial probe are gone for good; the
//!   prober only sweeps the records the selector was built with

pub mod prober;

pub use prober::HealthProber;

use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client used for liveness probes.
pub struct ProbeClient {
    client: reqwest::Client,
}

impl ProbeClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .no_proxy()
            .build()
            .expect("failed to build the health probe client");
        Self { client }
    }

    /// GET the health-check URL; any 2xx counts as alive.
    pub async fn is_host_alive(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

impl Default for ProbeClient {
    fn default() -> Self {
        Self::new()
    }
}
