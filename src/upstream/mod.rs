//! Upstream client subsystem.
//!
//! # Data Flow
//! ```text
//! Context (buffered request)
//!     → headers.rs (hop-by-hop strip, Host/X-Forwarded-For, custom headers)
//!     → middleware on_request
//!     → client.rs (pooled round-trip, idempotent retries)
//!     → middleware on_response (sees the transport error, may claim it)
//!     → response staged in Context (synthesized 500 if unclaimed error)
//! ```
//!
//! # Design Decisions
//! - One pooled client per backend; counters are inline atomics
//! - No lock is held across network I/O; concurrency is bounded by a
//!   per-backend semaphore with an acquire-wait timeout
//! - A pick is final: there is no retry against a different backend

pub mod client;
pub mod headers;

pub use client::{UpstreamClient, UpstreamStat};

use crate::middleware::MiddlewareError;

/// Outcome classification for a failed forward.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The upstream transport failed (connect, timeout, exhausted
    /// retries, or a broken response body).
    #[error("{0}")]
    Transport(String),

    /// No connection slot became free within the configured wait.
    #[error("timed out waiting for a connection slot to {0}")]
    PoolExhausted(String),

    /// A middleware rejected the request before the upstream call.
    #[error("request rejected by middleware: {0}")]
    Rejected(MiddlewareError),

    /// A middleware claimed the outcome of a failed upstream call.
    #[error("{0}")]
    Handled(MiddlewareError),
}
