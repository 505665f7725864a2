//! The balancer frontend.
//!
//! # Responsibilities
//! - Accept inbound connections under the configured concurrency cap
//! - Terminate TLS when configured; serve HTTP/1.1 and HTTP/2
//! - Per request: buffer the body, pick one upstream client, drive the
//!   forward, emit the staged response
//! - Drain in-flight connections on shutdown under a 30 s deadline

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::{Service, ServiceExt};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::balancer::{PickContext, Selector};
use crate::config::{Config, ServerConfig};
use crate::http::tls::load_tls_config;
use crate::middleware::Context;
use crate::observability::metrics;

/// How long in-flight connections get to finish after shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Application state injected into the proxy handler.
#[derive(Clone)]
pub struct AppState {
    pub selector: Arc<dyn Selector>,
}

/// HTTP server for the balancer frontend.
pub struct HttpServer {
    config: Arc<Config>,
    selector: Arc<dyn Selector>,
}

impl HttpServer {
    pub fn new(config: Arc<Config>, selector: Arc<dyn Selector>) -> Self {
        Self { config, selector }
    }

    fn build_router(&self) -> Router {
        let state = AppState {
            selector: self.selector.clone(),
        };

        let mut router = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        let timeout = self
            .config
            .server
            .read_timeout
            .max(self.config.server.write_timeout);
        if timeout > 0 {
            router = router.layer(TimeoutLayer::new(Duration::from_secs(timeout)));
        }

        router
    }

    /// Accept and serve connections until the shutdown signal fires,
    /// then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            http_version = %self.config.server.http_version,
            tls = self.config.server.tls_enabled(),
            "balancer listening"
        );

        let tls_acceptor = if self.config.server.tls_enabled() {
            let tls_config = load_tls_config(&self.config.server)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            Some(TlsAcceptor::from(tls_config))
        } else {
            None
        };

        let app = self.build_router();
        let mut make_service = app.into_make_service_with_connect_info::<SocketAddr>();
        let limiter = Arc::new(Semaphore::new(self.config.server.concurrency));
        let mut connections: JoinSet<()> = JoinSet::new();

        loop {
            // Backpressure first: no accept without a free slot.
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = limiter.clone().acquire_owned() => {
                    permit.expect("connection limiter is never closed")
                }
            };

            let (stream, remote_addr) = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                }
            };

            configure_stream(&stream, &self.config.server);

            let service = unwrap_infallible(make_service.call(remote_addr).await);
            let tls_acceptor = tls_acceptor.clone();
            let disable_keepalive = self.config.server.disable_keepalive;

            connections.spawn(async move {
                let _permit = permit;
                match tls_acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            serve_connection(TokioIo::new(tls_stream), service, disable_keepalive)
                                .await
                        }
                        Err(err) => {
                            tracing::debug!(peer = %remote_addr, error = %err, "TLS handshake failed")
                        }
                    },
                    None => {
                        serve_connection(TokioIo::new(stream), service, disable_keepalive).await
                    }
                }
            });
        }

        drop(listener);
        tracing::info!(in_flight = connections.len(), "draining connections");

        let drained = tokio::time::timeout(DRAIN_DEADLINE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!("graceful shutdown deadline reached, forcing shutdown");
            connections.shutdown().await;
        }

        tracing::info!("balancer frontend stopped");
        Ok(())
    }
}

/// Serve one connection with automatic HTTP/1.1 / HTTP/2 detection.
async fn serve_connection<I, S>(io: TokioIo<I>, service: S, disable_keepalive: bool)
where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send,
{
    let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
        service.clone().oneshot(request.map(Body::new))
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    if disable_keepalive {
        builder.http1().keep_alive(false);
    }

    if let Err(err) = builder
        .serve_connection_with_upgrades(io, hyper_service)
        .await
    {
        tracing::debug!(error = %err, "connection error");
    }
}

fn configure_stream(stream: &TcpStream, server: &ServerConfig) {
    let _ = stream.set_nodelay(true);

    if server.tcp_keepalive_period > 0 {
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(server.tcp_keepalive_period));
        if let Err(err) = socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            tracing::debug!(error = %err, "failed to set TCP keep-alive");
        }
    }
}

fn unwrap_infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => match err {},
    }
}

/// Main proxy handler: one pick, one forward, the pick is final.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let client_ip = remote_addr.ip();

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(error = %err, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    let mut ctx = Context::new(parts.method, parts.uri, parts.headers, body, client_ip);

    let upstream = state.selector.pick(&PickContext { client_ip });
    if let Err(err) = upstream.forward(&mut ctx).await {
        tracing::debug!(
            backend = upstream.addr(),
            error = %err,
            "request did not complete cleanly"
        );
    }

    metrics::record_request(
        method.as_str(),
        ctx.response.status.as_u16(),
        upstream.addr(),
        started,
    );

    let mut response = Response::new(Body::from(ctx.response.body));
    *response.status_mut() = ctx.response.status;
    *response.headers_mut() = ctx.response.headers;
    // The body is fully buffered and may have been rewritten by a
    // middleware; let hyper recompute the length.
    response.headers_mut().remove(axum::http::header::CONTENT_LENGTH);
    response
}
