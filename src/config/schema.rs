//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! balancer. All types derive Serde traits for deserialization from the
//! YAML config file. Duration-typed fields are integer seconds; zero or
//! absent values are replaced with their defaults in [`Config::normalize`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Balancing policies accepted by the `type` field.
pub const VALID_TYPES: [&str; 6] = [
    "round-robin",
    "w-round-robin",
    "ip-hash",
    "random",
    "least-connection",
    "least-response-time",
];

/// Variables accepted as custom header values.
pub const VALID_HEADER_VARS: [&str; 4] = ["$remote_addr", "$time", "$uuid", "$incremental"];

pub const DEFAULT_MAX_CONNECTION: usize = 512;
pub const DEFAULT_MAX_CONN_WAIT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONN_DURATION_SECS: u64 = 10;
pub const DEFAULT_MAX_IDLE_CONN_SECS: u64 = 10;
pub const DEFAULT_MAX_IDEMPOTENT_ATTEMPTS: usize = 5;
pub const DEFAULT_HEALTH_CHECKER_SECS: u64 = 30;
pub const DEFAULT_MONITORING_PORT: u16 = 8001;
pub const DEFAULT_MAX_IDLE_WORKER_SECS: u64 = 10;
pub const DEFAULT_CONCURRENCY: usize = 256 * 1024;

pub const HTTP1: &str = "http1.1";
pub const HTTP2: &str = "http2";

/// Root configuration for the balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Balancing policy, one of [`VALID_TYPES`]. Defaults to round-robin.
    #[serde(rename = "type")]
    pub balancer_type: String,

    /// Listening host. Defaults to `localhost`.
    pub host: String,

    /// Listening port. Required.
    pub port: u16,

    /// Monitoring endpoint settings.
    pub monitoring: MonitoringConfig,

    /// Seconds between health-check sweeps. `0` means the default (30 s).
    pub health_checker_time: u64,

    /// Headers appended to every forwarded request, keyed by header
    /// name. Values are either literals or one of [`VALID_HEADER_VARS`].
    pub custom_headers: std::collections::HashMap<String, String>,

    /// Inbound transport settings.
    pub server: ServerConfig,

    /// Upstream backend definitions.
    pub backends: Vec<Backend>,

    /// Middleware pipeline, in execution order.
    pub middlewares: Vec<MiddlewareConfig>,

    /// Logging settings.
    pub log: LogConfig,
}

impl Config {
    /// Listening address (`host:port`).
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Interval between health-check sweeps.
    pub fn health_checker_interval(&self) -> Duration {
        Duration::from_secs(self.health_checker_time)
    }

    /// Apply defaults and normalize fields that have documented fallbacks.
    ///
    /// Runs before semantic validation so that rules such as "weight is
    /// required for w-round-robin" observe the effective policy, not the
    /// literal one (a single-backend w-round-robin downgrades here).
    pub fn normalize(&mut self) {
        if self.balancer_type.is_empty() {
            self.balancer_type = "round-robin".to_string();
        }

        if self.balancer_type == "w-round-robin" && self.backends.len() == 1 {
            tracing::warn!("w-round-robin with a single backend, using round-robin");
            self.balancer_type = "round-robin".to_string();
        }

        if self.host.is_empty() {
            self.host = "localhost".to_string();
        }

        if self.health_checker_time == 0 {
            self.health_checker_time = DEFAULT_HEALTH_CHECKER_SECS;
        }

        self.monitoring.normalize();
        self.server.normalize();

        for backend in &mut self.backends {
            backend.normalize();
        }
    }
}

/// Monitoring endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Bind host for the stats endpoint. Defaults to `localhost`.
    pub host: String,

    /// Bind port for the stats endpoint. Defaults to 8001.
    pub port: u16,

    /// Optional bind address for the Prometheus exporter
    /// (e.g. "127.0.0.1:9090"). Disabled when empty.
    pub metrics_address: String,
}

impl MonitoringConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn normalize(&mut self) {
        if self.host.is_empty() {
            self.host = "localhost".to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_MONITORING_PORT;
        }
    }
}

/// Inbound transport settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `http1.1` or `http2`. `http2` requires `cert_file` and `key_file`.
    pub http_version: String,

    /// TLS certificate path (PEM). Enables TLS together with `key_file`.
    pub cert_file: String,

    /// TLS private key path (PEM).
    pub key_file: String,

    /// Seconds an idle client connection is kept before being reclaimed.
    pub max_idle_worker_duration: u64,

    /// TCP keep-alive period in seconds. `0` leaves the OS default.
    pub tcp_keepalive_period: u64,

    /// Maximum concurrently served connections.
    pub concurrency: usize,

    /// Per-request read timeout in seconds. `0` disables.
    pub read_timeout: u64,

    /// Per-request write timeout in seconds. `0` disables.
    pub write_timeout: u64,

    /// Idle connection timeout in seconds. `0` disables.
    pub idle_timeout: u64,

    /// Disable HTTP keep-alive towards clients.
    pub disable_keepalive: bool,

    /// Accepted for config compatibility; hyper never rewrites header
    /// name case, so this has no effect and is logged as such.
    pub disable_header_names_normalizing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_version: HTTP1.to_string(),
            cert_file: String::new(),
            key_file: String::new(),
            max_idle_worker_duration: DEFAULT_MAX_IDLE_WORKER_SECS,
            tcp_keepalive_period: 0,
            concurrency: DEFAULT_CONCURRENCY,
            read_timeout: 0,
            write_timeout: 0,
            idle_timeout: 0,
            disable_keepalive: false,
            disable_header_names_normalizing: false,
        }
    }
}

impl ServerConfig {
    /// Whether TLS termination is configured.
    pub fn tls_enabled(&self) -> bool {
        !self.cert_file.is_empty() && !self.key_file.is_empty()
    }

    fn normalize(&mut self) {
        if self.http_version != HTTP2 {
            self.http_version = HTTP1.to_string();
        }
        if self.max_idle_worker_duration == 0 {
            self.max_idle_worker_duration = DEFAULT_MAX_IDLE_WORKER_SECS;
        }
        if self.concurrency == 0 {
            self.concurrency = DEFAULT_CONCURRENCY;
        }
        if self.disable_header_names_normalizing {
            tracing::warn!("disable_header_names_normalizing has no effect");
        }
    }
}

/// A single upstream backend.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Backend {
    /// Backend address as `host:port`. A leading `http://` or `https://`
    /// is stripped during normalization.
    pub url: String,

    /// Path probed by the health checker. Defaults to `/`.
    pub health_check_path: String,

    /// Relative weight; required (> 0) when the policy is w-round-robin.
    pub weight: u32,

    /// Maximum concurrent connections to this backend.
    pub max_conn: usize,

    /// Seconds to wait for a free connection slot.
    pub max_conn_timeout: u64,

    /// Maximum lifetime of a pooled connection, in seconds.
    pub max_conn_duration: u64,

    /// Maximum idle time of a pooled connection, in seconds.
    pub max_idle_conn_duration: u64,

    /// Retry attempts for idempotent requests.
    pub max_idemponent_call_attempts: usize,
}

impl Backend {
    /// URL probed by the health checker.
    pub fn health_check_url(&self) -> String {
        format!("http://{}{}", self.url, self.health_check_path)
    }

    /// Time to wait for a free connection slot.
    pub fn conn_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.max_conn_timeout)
    }

    /// Idle lifetime applied to pooled connections.
    pub fn idle_conn_duration(&self) -> Duration {
        Duration::from_secs(self.max_idle_conn_duration)
    }

    fn normalize(&mut self) {
        for scheme in ["http://", "https://"] {
            if let Some(rest) = self.url.strip_prefix(scheme) {
                self.url = rest.to_string();
                break;
            }
        }

        if self.health_check_path.is_empty() {
            self.health_check_path = "/".to_string();
        }
        if self.max_conn == 0 {
            self.max_conn = DEFAULT_MAX_CONNECTION;
        }
        if self.max_conn_timeout == 0 {
            self.max_conn_timeout = DEFAULT_MAX_CONN_WAIT_SECS;
        }
        if self.max_conn_duration == 0 {
            self.max_conn_duration = DEFAULT_MAX_CONN_DURATION_SECS;
        }
        if self.max_idle_conn_duration == 0 {
            self.max_idle_conn_duration = DEFAULT_MAX_IDLE_CONN_SECS;
        }
        if self.max_idemponent_call_attempts == 0 {
            self.max_idemponent_call_attempts = DEFAULT_MAX_IDEMPOTENT_ATTEMPTS;
        }
    }
}

/// A middleware pipeline entry.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Registry name of the middleware.
    pub name: String,

    /// Disabled entries are skipped entirely.
    pub disabled: bool,

    /// Inline source text. Exactly one of `code`/`file` must be set
    /// when the entry is enabled.
    pub code: String,

    /// Path to a source file read at startup. Exactly one of
    /// `code`/`file` must be set when the entry is enabled.
    pub file: String,

    /// Free-form settings handed to the middleware factory.
    pub config: serde_yaml::Mapping,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (e.g. "info", "baton=debug").
    pub level: String,

    /// Emit JSON-formatted logs.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
