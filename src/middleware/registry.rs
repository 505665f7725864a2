//! Compile-time middleware registry.
//!
//! Middlewares are resolved by name from a registry populated at startup.
//! A config entry may carry inline `code` or a `file` path; whichever is
//! present is loaded here and handed to the factory as the source text,
//! so script-hosting factories can be registered at this seam without
//! touching the pipeline. Any failure aborts startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::MiddlewareConfig;
use crate::middleware::builtin;
use crate::middleware::{Middleware, Pipeline};

/// Error raised while building the pipeline from configuration.
#[derive(Debug, thiserror::Error)]
pub enum MiddlewareLoadError {
    #[error("middleware '{0}' is not registered")]
    UnknownName(String),

    #[error("middleware '{name}': failed to read '{file}': {source}")]
    Source {
        name: String,
        file: String,
        source: std::io::Error,
    },

    #[error("middleware '{name}': {reason}")]
    Factory { name: String, reason: String },
}

/// Everything a factory gets to construct one middleware instance.
pub struct MiddlewareSource<'a> {
    /// The entry's free-form `config` mapping.
    pub config: &'a serde_yaml::Mapping,
    /// Inline `code`, or the contents of `file`, when either was set.
    pub source: Option<&'a str>,
}

impl MiddlewareSource<'_> {
    /// Fetch a string-valued config key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(&serde_yaml::Value::from(key))
            .and_then(|v| v.as_str())
    }

    /// Fetch an integer-valued config key.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.config
            .get(&serde_yaml::Value::from(key))
            .and_then(|v| v.as_u64())
    }
}

type Factory = fn(&MiddlewareSource) -> Result<Arc<dyn Middleware>, String>;

/// Name → factory table.
pub struct Registry {
    factories: HashMap<&'static str, Factory>,
}

impl Registry {
    /// Registry pre-populated with the built-in middlewares.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("request-logger", builtin::request_logger);
        registry.register("header-guard", builtin::header_guard);
        registry.register("error-page", builtin::error_page);
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: Factory) {
        self.factories.insert(name, factory);
    }

    /// Build the pipeline from the ordered config list. Disabled entries
    /// are skipped; an empty result yields `None` so the hot path can
    /// bypass the pipeline entirely.
    pub fn build_pipeline(
        &self,
        configs: &[MiddlewareConfig],
    ) -> Result<Option<Pipeline>, MiddlewareLoadError> {
        let mut middlewares: Vec<Arc<dyn Middleware>> = Vec::new();

        for cfg in configs {
            if cfg.disabled {
                tracing::debug!(middleware = %cfg.name, "middleware disabled, skipping");
                continue;
            }

            let factory = self
                .factories
                .get(cfg.name.as_str())
                .ok_or_else(|| MiddlewareLoadError::UnknownName(cfg.name.clone()))?;

            let file_source = if cfg.file.is_empty() {
                None
            } else {
                Some(std::fs::read_to_string(&cfg.file).map_err(|source| {
                    MiddlewareLoadError::Source {
                        name: cfg.name.clone(),
                        file: cfg.file.clone(),
                        source,
                    }
                })?)
            };

            let source = if !cfg.code.is_empty() {
                Some(cfg.code.as_str())
            } else {
                file_source.as_deref()
            };

            let mw = factory(&MiddlewareSource {
                config: &cfg.config,
                source,
            })
            .map_err(|reason| MiddlewareLoadError::Factory {
                name: cfg.name.clone(),
                reason,
            })?;

            tracing::info!(middleware = %cfg.name, "middleware loaded");
            middlewares.push(mw);
        }

        if middlewares.is_empty() {
            return Ok(None);
        }
        tracing::info!(count = middlewares.len(), "middleware pipeline ready");
        Ok(Some(Pipeline::new(middlewares)))
    }
}
