//! Observability subsystem.
//!
//! # Design Decisions
//! - Structured logging through `tracing`; JSON format is opt-in
//! - Metrics are cheap atomic updates behind the `metrics` facade; the
//!   Prometheus exporter is only installed when an address is configured

pub mod logging;
pub mod metrics;
