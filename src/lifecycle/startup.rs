//! Application wiring and the run loop.
//!
//! Ordered startup: middleware pipeline → initial probes + selector →
//! listeners → background tasks. Ordered shutdown: stop accepting →
//! drain → release upstream pools.

use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::balancer::{build_selector, BalancerError, Selector};
use crate::config::Config;
use crate::health::HealthProber;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::middleware::{MiddlewareLoadError, Registry};
use crate::monitoring::{self, MonitoringState};
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("middleware: {0}")]
    Middleware(#[from] MiddlewareLoadError),

    #[error("balancer: {0}")]
    Balancer(#[from] BalancerError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully wired balancer, ready to serve.
pub struct Application {
    config: Arc<Config>,
    selector: Arc<dyn Selector>,
    shutdown: Shutdown,
}

impl Application {
    /// Build the pipeline, probe the fleet, and construct the selector.
    /// Fails when any middleware cannot be loaded or when zero backends
    /// pass the initial probe.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let registry = Registry::with_builtins();
        let pipeline = registry.build_pipeline(&config.middlewares)?.map(Arc::new);

        let selector = build_selector(&config, pipeline).await?;

        Ok(Self {
            config: Arc::new(config),
            selector,
            shutdown: Shutdown::new(),
        })
    }

    pub fn selector(&self) -> Arc<dyn Selector> {
        self.selector.clone()
    }

    /// Handle for triggering shutdown from outside the run loop.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Bind the listeners, start the background tasks, and serve until a
    /// shutdown signal or a fatal balancer condition.
    pub async fn run(self) -> Result<(), AppError> {
        let listener = TcpListener::bind(self.config.addr()).await?;
        let monitoring_listener = TcpListener::bind(self.config.monitoring.addr()).await?;

        if !self.config.monitoring.metrics_address.is_empty() {
            match self.config.monitoring.metrics_address.parse() {
                Ok(addr) => metrics::init_metrics(addr),
                Err(_) => tracing::error!(
                    address = %self.config.monitoring.metrics_address,
                    "invalid metrics address, exporter disabled"
                ),
            }
        }

        let monitoring_state = MonitoringState {
            selector: self.selector.clone(),
            started_at: Instant::now(),
        };
        tokio::spawn(monitoring::serve(
            monitoring_listener,
            monitoring_state,
            self.shutdown.subscribe(),
        ));

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<BalancerError>(1);
        let prober = HealthProber::new(
            self.selector.clone(),
            self.config.health_checker_interval(),
            fatal_tx,
        );
        tokio::spawn(prober.run(self.shutdown.subscribe()));

        let server = HttpServer::new(self.config.clone(), self.selector.clone());
        let mut server_task = tokio::spawn(server.run(listener, self.shutdown.subscribe()));

        let mut fatal: Option<BalancerError> = None;
        tokio::select! {
            _ = signals::shutdown_signal() => {
                tracing::info!("shutdown signal received, initiating graceful shutdown");
            }
            err = fatal_rx.recv() => {
                if let Some(err) = err {
                    tracing::error!(error = %err, "fatal balancer condition");
                    fatal = Some(err);
                }
            }
            result = &mut server_task => {
                self.shutdown.trigger();
                match result {
                    Ok(Ok(())) => tracing::info!("frontend stopped"),
                    Ok(Err(err)) => return Err(err.into()),
                    Err(err) => tracing::error!(error = %err, "frontend task panicked"),
                }
                self.selector.close();
                return Ok(());
            }
        }

        self.shutdown.trigger();
        if let Ok(Err(err)) = server_task.await {
            tracing::error!(error = %err, "error while draining the frontend");
        }

        self.selector.close();
        tracing::info!("shutdown completed");

        match fatal {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
