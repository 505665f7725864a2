//! Ordered middleware execution.

use std::fmt;
use std::sync::Arc;

use crate::middleware::{Context, Middleware, MiddlewareError};
use crate::upstream::ProxyError;

/// The ordered middleware chain, built once at startup and shared by
/// every upstream client.
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("len", &self.middlewares.len())
            .finish()
    }
}

impl Pipeline {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run every `on_request` hook in order. The first failure aborts the
    /// chain and is returned as the request outcome.
    pub async fn run_on_request(&self, ctx: &mut Context) -> Result<(), MiddlewareError> {
        for mw in &self.middlewares {
            mw.on_request(ctx).await?;
        }
        Ok(())
    }

    /// Run every `on_response` hook in order, passing the upstream
    /// transport error unchanged down the chain. The first failure marks
    /// the outcome as handled and stops the chain.
    pub async fn run_on_response(
        &self,
        ctx: &mut Context,
        upstream_err: Option<&ProxyError>,
    ) -> Result<(), MiddlewareError> {
        for mw in &self.middlewares {
            mw.on_response(ctx, upstream_err).await?;
        }
        Ok(())
    }
}
