//! The per-backend proxy client.
//!
//! One [`UpstreamClient`] owns the pooled HTTP connection to a single
//! origin. It performs the forwarded-request rewrite, drives the
//! middleware pipeline around the upstream round-trip, and keeps the
//! monotonic counters that feed both selection and the stats surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::body::Bytes;
use axum::http::header::{CONNECTION, CONTENT_TYPE, HOST};
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::sync::Semaphore;

use crate::config::Backend;
use crate::middleware::{Context, Pipeline};
use crate::upstream::headers::{
    apply_custom_headers, parse_custom_headers, strip_hop_headers, HeaderTemplate,
    X_FORWARDED_FOR,
};
use crate::upstream::ProxyError;

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Snapshot of one client's counters for the stats surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UpstreamStat {
    pub addr: String,
    pub total_req_count: u64,
    pub avg_res_time: f64,
    pub last_use_time: String,
    pub conns_count: usize,
}

/// Connection-pooled sender bound to one backend.
pub struct UpstreamClient {
    addr: String,
    backend: Backend,
    /// Swapped out wholesale by [`close`](Self::close); dropping the old
    /// client releases its pooled connections.
    http: ArcSwap<HttpClient>,
    pipeline: Option<Arc<Pipeline>>,
    custom_headers: Vec<(HeaderName, HeaderTemplate)>,
    /// Bounds concurrent upstream calls to `max_conn`.
    limiter: Semaphore,
    /// In-flight requests, including those waiting for a slot.
    pending: AtomicUsize,
    total_request_count: AtomicU64,
    total_response_time_ms: AtomicU64,
    /// Unix millis of the most recent forward; 0 when never used.
    last_use_ms: AtomicU64,
}

impl UpstreamClient {
    pub fn new(
        backend: &Backend,
        custom_headers: &HashMap<String, String>,
        pipeline: Option<Arc<Pipeline>>,
    ) -> Result<Self, String> {
        Ok(Self {
            addr: backend.url.clone(),
            http: ArcSwap::from_pointee(build_http_client(backend)),
            pipeline,
            custom_headers: parse_custom_headers(custom_headers)?,
            limiter: Semaphore::new(backend.max_conn),
            pending: AtomicUsize::new(0),
            total_request_count: AtomicU64::new(0),
            total_response_time_ms: AtomicU64::new(0),
            last_use_ms: AtomicU64::new(0),
            backend: backend.clone(),
        })
    }

    /// Backend address (`host:port`).
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Perform the upstream round-trip for `ctx`, leaving the response
    /// staged in the context. Always stages a response: the backend's on
    /// success, the middleware's when one claimed the outcome, or the
    /// synthesized 500 on an unhandled transport error.
    pub async fn forward(&self, ctx: &mut Context) -> Result<(), ProxyError> {
        let count = self.total_request_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_use_ms
            .store(chrono::Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
        let started = Instant::now();

        self.rewrite_request(ctx, count);

        if let Some(pipeline) = &self.pipeline {
            if let Err(rejection) = pipeline.run_on_request(ctx).await {
                strip_hop_headers(&mut ctx.response.headers);
                return Err(ProxyError::Rejected(rejection));
            }
        }

        let upstream_err = self.send(ctx).await.err();

        if let Some(pipeline) = &self.pipeline {
            if let Err(handled) = pipeline
                .run_on_response(ctx, upstream_err.as_ref())
                .await
            {
                strip_hop_headers(&mut ctx.response.headers);
                return Err(ProxyError::Handled(handled));
            }
        }

        strip_hop_headers(&mut ctx.response.headers);

        match upstream_err {
            Some(err) => {
                tracing::info!(addr = %self.addr, error = %err, "error when proxying the request");
                self.synthesize_error(ctx, &err);
                Err(err)
            }
            None => {
                self.total_response_time_ms
                    .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Strip hop-by-hop headers, pin scheme/Host to this backend, set
    /// X-Forwarded-For, and append the configured custom headers.
    fn rewrite_request(&self, ctx: &mut Context, request_count: u64) {
        strip_hop_headers(&mut ctx.request.headers);

        let headers = &mut ctx.request.headers;
        if let Ok(host) = HeaderValue::from_str(&self.addr) {
            headers.insert(HOST, host);
        }
        if let Ok(client_ip) = HeaderValue::from_str(&ctx.request.client_ip.to_string()) {
            headers.insert(X_FORWARDED_FOR, client_ip);
        }

        apply_custom_headers(
            headers,
            &self.custom_headers,
            ctx.request.client_ip,
            request_count,
        );
    }

    /// One pooled round-trip, retried for idempotent methods.
    async fn send(&self, ctx: &mut Context) -> Result<(), ProxyError> {
        let _pending = PendingGuard::enter(&self.pending);

        let _permit = tokio::time::timeout(
            self.backend.conn_wait_timeout(),
            self.limiter.acquire(),
        )
        .await
        .map_err(|_| ProxyError::PoolExhausted(self.addr.clone()))?
        .expect("upstream limiter is never closed");

        let uri = self.target_uri(&ctx.request.uri)?;
        let attempts = if is_idempotent(&ctx.request.method) {
            self.backend.max_idemponent_call_attempts.max(1)
        } else {
            1
        };

        let mut last_err = None;
        for attempt in 1..=attempts {
            let mut request = Request::builder()
                .method(ctx.request.method.clone())
                .uri(uri.clone())
                .body(Full::new(ctx.request.body.clone()))
                .map_err(|e| ProxyError::Transport(e.to_string()))?;
            *request.headers_mut() = ctx.request.headers.clone();

            match self.http.load().request(request).await {
                Ok(response) => {
                    let (parts, body) = response.into_parts();
                    let bytes = body
                        .collect()
                        .await
                        .map_err(|e| ProxyError::Transport(e.to_string()))?
                        .to_bytes();

                    ctx.response.status = parts.status;
                    ctx.response.headers = parts.headers;
                    ctx.response.body = bytes;
                    return Ok(());
                }
                Err(err) => {
                    if attempt < attempts {
                        tracing::debug!(
                            addr = %self.addr,
                            attempt,
                            error = %err,
                            "retrying idempotent request"
                        );
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(ProxyError::Transport(
            last_err.expect("at least one attempt was made").to_string(),
        ))
    }

    fn target_uri(&self, original: &Uri) -> Result<Uri, ProxyError> {
        let path_and_query = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Uri::builder()
            .scheme("http")
            .authority(self.addr.as_str())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ProxyError::Transport(e.to_string()))
    }

    fn synthesize_error(&self, ctx: &mut Context, err: &ProxyError) {
        let body = serde_json::json!({ "message": err.to_string() }).to_string();
        ctx.response.status = StatusCode::INTERNAL_SERVER_ERROR;
        ctx.response.headers.clear();
        ctx.response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        ctx.response
            .headers
            .insert(CONNECTION, HeaderValue::from_static("close"));
        ctx.response.body = Bytes::from(body);
    }

    /// In-flight request count, including calls waiting for a slot.
    pub fn pending_requests(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Average round-trip time in milliseconds; 0 before any completed
    /// request. Readers may observe a slightly stale ratio.
    pub fn avg_response_time(&self) -> f64 {
        let count = self.total_request_count.load(Ordering::Relaxed);
        let total = self.total_response_time_ms.load(Ordering::Relaxed);
        if count == 0 || total == 0 {
            return 0.0;
        }
        total as f64 / count as f64
    }

    /// Counter snapshot for the stats surface.
    pub fn stat(&self) -> UpstreamStat {
        let last_use_ms = self.last_use_ms.load(Ordering::Relaxed);
        let last_use_time = match chrono::DateTime::from_timestamp_millis(last_use_ms as i64) {
            Some(ts) if last_use_ms > 0 => ts.to_rfc3339(),
            _ => String::new(),
        };

        UpstreamStat {
            addr: self.addr.clone(),
            total_req_count: self.total_request_count.load(Ordering::Relaxed),
            avg_res_time: self.avg_response_time(),
            last_use_time,
            conns_count: self.backend.max_conn - self.limiter.available_permits(),
        }
    }

    /// Release the connection pool. Idempotent; the client stays usable
    /// and will open fresh connections on the next forward.
    pub fn close(&self) {
        self.http
            .store(Arc::new(build_http_client(&self.backend)));
        tracing::debug!(addr = %self.addr, "upstream connection pool released");
    }

    #[cfg(test)]
    pub(crate) fn test_add_pending(&self, n: usize) {
        self.pending.fetch_add(n, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn test_record_response(&self, count: u64, total_ms: u64) {
        self.total_request_count.fetch_add(count, Ordering::Relaxed);
        self.total_response_time_ms
            .fetch_add(total_ms, Ordering::Relaxed);
    }
}

fn build_http_client(backend: &Backend) -> HttpClient {
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(backend.idle_conn_duration())
        .pool_max_idle_per_host(backend.max_conn)
        .build_http()
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE
    )
}

/// RAII guard for the in-flight counter.
struct PendingGuard<'a> {
    pending: &'a AtomicUsize,
}

impl<'a> PendingGuard<'a> {
    fn enter(pending: &'a AtomicUsize) -> Self {
        pending.fetch_add(1, Ordering::Relaxed);
        Self { pending }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
}
