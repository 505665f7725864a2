//! Shared utilities for integration testing.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use baton::config::schema::{Backend, Config};
use baton::{AppError, Application, Shutdown};

/// A programmable raw-TCP mock backend.
///
/// Answers every request with its id in the body, counts hits, captures
/// the headers of the most recent request, and can be made unhealthy or
/// slow at runtime.
pub struct MockBackend {
    pub id: &'static str,
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    pub last_headers: Arc<Mutex<HashMap<String, String>>>,
    healthy: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
    server: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(id: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let last_headers = Arc::new(Mutex::new(HashMap::new()));
        let healthy = Arc::new(AtomicBool::new(true));
        let delay_ms = Arc::new(AtomicU64::new(0));

        let (hits_, headers_, healthy_, delay_) = (
            hits.clone(),
            last_headers.clone(),
            healthy.clone(),
            delay_ms.clone(),
        );
        let server = tokio::spawn(async move {
            let (hits, last_headers, healthy, delay_ms) = (hits_, headers_, healthy_, delay_);
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let hits = hits.clone();
                let last_headers = last_headers.clone();
                let healthy = healthy.clone();
                let delay_ms = delay_ms.clone();

                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    // Read until the end of the request head; the test
                    // traffic is GET-only.
                    loop {
                        match socket.read(&mut chunk).await {
                            Ok(0) => return,
                            Ok(n) => {
                                buf.extend_from_slice(&chunk[..n]);
                                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                            }
                            Err(_) => return,
                        }
                    }

                    let head = String::from_utf8_lossy(&buf);
                    let mut headers = HashMap::new();
                    for line in head.lines().skip(1) {
                        if line.is_empty() {
                            break;
                        }
                        if let Some((name, value)) = line.split_once(':') {
                            headers.insert(
                                name.trim().to_ascii_lowercase(),
                                value.trim().to_string(),
                            );
                        }
                    }
                    let is_health_probe = head.starts_with("GET /healthcheck");

                    let delay = delay_ms.load(Ordering::SeqCst);
                    if delay > 0 && !is_health_probe {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }

                    let response = if healthy.load(Ordering::SeqCst) {
                        if !is_health_probe {
                            hits.fetch_add(1, Ordering::SeqCst);
                            *last_headers.lock().unwrap() = headers;
                        }
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            id.len(),
                            id
                        )
                    } else {
                        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string()
                    };

                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            id,
            addr,
            hits,
            last_headers,
            healthy,
            delay_ms,
            server,
        }
    }

    /// Stop listening entirely; later connections are refused.
    pub fn stop(&self) {
        self.server.abort();
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_delay_ms(&self, delay: u64) {
        self.delay_ms.store(delay, Ordering::SeqCst);
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn backend_config(&self, weight: u32) -> Backend {
        Backend {
            url: self.addr.to_string(),
            health_check_path: "/healthcheck".into(),
            weight,
            max_conn: 64,
            max_conn_timeout: 2,
            max_idemponent_call_attempts: 1,
            ..Backend::default()
        }
    }
}

/// Reserve a free local port. Racy in principle, good enough in tests.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Minimal config over the given backends.
pub fn test_config(policy: &str, backends: Vec<Backend>) -> Config {
    let mut config = Config {
        balancer_type: policy.into(),
        host: "127.0.0.1".into(),
        port: free_port(),
        health_checker_time: 1,
        backends,
        ..Config::default()
    };
    config.monitoring.host = "127.0.0.1".into();
    config.monitoring.port = free_port();
    config.normalize();
    config
}

/// A running application plus the handles the tests need.
pub struct TestApp {
    pub url: String,
    pub monitoring_url: String,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), AppError>>,
}

pub async fn spawn_app(config: Config) -> TestApp {
    let url = format!("http://{}", config.addr());
    let monitoring_url = format!("http://{}", config.monitoring.addr());

    let app = Application::build(config).await.expect("startup failed");
    let shutdown = app.shutdown_handle();
    let handle = tokio::spawn(app.run());

    // Give the listeners a moment to come up.
    tokio::time::sleep(Duration::from_millis(200)).await;

    TestApp {
        url,
        monitoring_url,
        shutdown,
        handle,
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}
