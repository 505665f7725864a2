//! Middleware subsystem.
//!
//! # Data Flow
//! ```text
//! config middlewares[]
//!     → registry.rs (resolve name → factory, read file sources)
//!     → pipeline.rs (ordered chain, built once at startup)
//!
//! Per request:
//!     on_request m1..mN   (first failure aborts: no upstream call)
//!     → upstream forward
//!     on_response m1..mN  (first failure = outcome handled, chain stops)
//! ```
//!
//! # Design Decisions
//! - Loading failures abort startup, never a running request
//! - `on_response` observes the transport error without swallowing it;
//!   returning an error claims the outcome and suppresses the default
//!   500 synthesizer
//! - Middlewares are shared across request tasks and must be Sync

pub mod builtin;
pub mod pipeline;
pub mod registry;

use std::net::IpAddr;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};

pub use pipeline::Pipeline;
pub use registry::{MiddlewareLoadError, Registry};

use crate::upstream::ProxyError;

/// Error returned by a middleware hook.
///
/// From `on_request` it aborts the pipeline and becomes the request's
/// outcome. From `on_response` it marks the outcome as handled: later
/// middlewares and the 500 synthesizer are skipped and the response is
/// sent as the middleware left it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct MiddlewareError(pub String);

/// The buffered inbound request, as it will be forwarded.
#[derive(Debug)]
pub struct RequestFrame {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Immediate client address.
    pub client_ip: IpAddr,
}

/// The staged response that will be emitted to the client.
#[derive(Debug)]
pub struct ResponseFrame {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Default for ResponseFrame {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Per-request context handed to every middleware hook.
///
/// Constructed at request entry, emitted to the client at request exit.
#[derive(Debug)]
pub struct Context {
    pub request: RequestFrame,
    pub response: ResponseFrame,
}

impl Context {
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        client_ip: IpAddr,
    ) -> Self {
        Self {
            request: RequestFrame {
                method,
                uri,
                headers,
                body,
                client_ip,
            },
            response: ResponseFrame::default(),
        }
    }
}

impl std::fmt::Debug for dyn Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Middleware")
    }
}

/// An interceptor running before and after the upstream call.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    /// Called before the upstream client forwards. Returning an error
    /// aborts the pipeline and the upstream call.
    async fn on_request(&self, _ctx: &mut Context) -> Result<(), MiddlewareError> {
        Ok(())
    }

    /// Called after the upstream client returns. `upstream_err` is `None`
    /// on success. Returning an error claims the outcome (see
    /// [`MiddlewareError`]).
    async fn on_response(
        &self,
        _ctx: &mut Context,
        _upstream_err: Option<&ProxyError>,
    ) -> Result<(), MiddlewareError> {
        Ok(())
    }
}
