//! Configuration validation logic.

use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::{Config, HTTP2, VALID_HEADER_VARS, VALID_TYPES};

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a [`Config`] for semantic correctness.
///
/// Expects [`Config::normalize`] to have run first, so rules observe the
/// effective values (defaults applied, scheme prefixes stripped, single
/// backend w-round-robin already downgraded).
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError(
            "at least one backend must be set".to_string(),
        ));
    }

    if config.port == 0 {
        errors.push(ValidationError("please choose a valid port".to_string()));
    }

    if !VALID_TYPES.contains(&config.balancer_type.as_str()) {
        errors.push(ValidationError(format!(
            "'{}' is not a valid balancing type, expected one of {:?}",
            config.balancer_type, VALID_TYPES
        )));
    }

    if config.balancer_type == "w-round-robin" {
        for backend in &config.backends {
            if backend.weight == 0 {
                errors.push(ValidationError(format!(
                    "backend '{}': w-round-robin requires a weight for every backend",
                    backend.url
                )));
            }
        }
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if backend.url.is_empty() {
            errors.push(ValidationError("backend url must be set".to_string()));
        } else if !seen.insert(backend.url.as_str()) {
            errors.push(ValidationError(format!(
                "backend '{}' is configured more than once",
                backend.url
            )));
        }
    }

    for (name, value) in &config.custom_headers {
        if value.starts_with('$') && !VALID_HEADER_VARS.contains(&value.as_str()) {
            errors.push(ValidationError(format!(
                "custom header '{}': '{}' is not a valid variable, expected one of {:?}",
                name, value, VALID_HEADER_VARS
            )));
        }
    }

    validate_server(config, &mut errors);
    validate_middlewares(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_server(config: &Config, errors: &mut Vec<ValidationError>) {
    let server = &config.server;

    if server.http_version == HTTP2 && !server.tls_enabled() {
        errors.push(ValidationError(
            "HTTP/2 can only be served over TLS, please provide cert_file and key_file"
                .to_string(),
        ));
    }

    for path in [&server.cert_file, &server.key_file] {
        if !path.is_empty() && !Path::new(path).exists() {
            errors.push(ValidationError(format!("file '{}' does not exist", path)));
        }
    }
}

fn validate_middlewares(config: &Config, errors: &mut Vec<ValidationError>) {
    for (i, mw) in config.middlewares.iter().enumerate() {
        if mw.name.is_empty() {
            errors.push(ValidationError(format!(
                "middleware at index {}: name is required",
                i
            )));
            continue;
        }
        if mw.disabled {
            continue;
        }
        if !mw.code.is_empty() && !mw.file.is_empty() {
            errors.push(ValidationError(format!(
                "middleware '{}': cannot specify both code and file",
                mw.name
            )));
        } else if mw.code.is_empty() && mw.file.is_empty() {
            errors.push(ValidationError(format!(
                "middleware '{}': either code or file must be specified",
                mw.name
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::*;

    fn base_config() -> Config {
        let mut config = Config {
            port: 8080,
            ..Config::default()
        };
        config.backends.push(Backend {
            url: "127.0.0.1:3000".into(),
            ..Backend::default()
        });
        config.normalize();
        config
    }

    #[test]
    fn valid_config_passes() {
        let config = base_config();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.balancer_type, "round-robin");
    }

    #[test]
    fn missing_backends_rejected() {
        let mut config = Config {
            port: 8080,
            ..Config::default()
        };
        config.normalize();
        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("at least one backend"));
    }

    #[test]
    fn missing_port_rejected() {
        let mut config = Config::default();
        config.backends.push(Backend {
            url: "127.0.0.1:3000".into(),
            ..Backend::default()
        });
        config.normalize();
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("valid port")));
    }

    #[test]
    fn invalid_type_rejected() {
        let mut config = base_config();
        config.balancer_type = "fastest".into();
        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("not a valid balancing type"));
    }

    #[test]
    fn weighted_requires_weights() {
        let mut config = base_config();
        config.backends.push(Backend {
            url: "127.0.0.1:3001".into(),
            weight: 2,
            ..Backend::default()
        });
        config.balancer_type = "w-round-robin".into();
        let errs = validate_config(&config).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].0.contains("requires a weight"));
    }

    #[test]
    fn single_backend_weighted_downgrades() {
        let mut config = Config {
            port: 8080,
            balancer_type: "w-round-robin".into(),
            ..Config::default()
        };
        config.backends.push(Backend {
            url: "127.0.0.1:3000".into(),
            ..Backend::default()
        });
        config.normalize();
        assert_eq!(config.balancer_type, "round-robin");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn http2_requires_tls() {
        let mut config = base_config();
        config.server.http_version = HTTP2.into();
        config.normalize();
        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("HTTP/2"));
    }

    #[test]
    fn unknown_header_variable_rejected() {
        let mut config = base_config();
        config
            .custom_headers
            .insert("X-Custom".into(), "$hostname".into());
        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("not a valid variable"));
    }

    #[test]
    fn literal_header_value_accepted() {
        let mut config = base_config();
        config
            .custom_headers
            .insert("X-Env".into(), "production".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn middleware_code_and_file_exclusive() {
        let mut config = base_config();
        config.middlewares.push(MiddlewareConfig {
            name: "request-logger".into(),
            code: "x".into(),
            file: "y".into(),
            ..MiddlewareConfig::default()
        });
        let errs = validate_config(&config).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].0.contains("both code and file"));
    }

    #[test]
    fn middleware_requires_code_or_file() {
        let mut config = base_config();
        config.middlewares.push(MiddlewareConfig {
            name: "request-logger".into(),
            ..MiddlewareConfig::default()
        });
        let errs = validate_config(&config).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].0.contains("either code or file"));
    }

    #[test]
    fn disabled_middleware_needs_no_source() {
        let mut config = base_config();
        config.middlewares.push(MiddlewareConfig {
            name: "request-logger".into(),
            disabled: true,
            ..MiddlewareConfig::default()
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn scheme_prefix_stripped() {
        let mut config = Config {
            port: 8080,
            ..Config::default()
        };
        config.backends.push(Backend {
            url: "http://127.0.0.1:3000".into(),
            ..Backend::default()
        });
        config.normalize();
        assert_eq!(config.backends[0].url, "127.0.0.1:3000");
    }

    #[test]
    fn duration_defaults_applied() {
        let config = base_config();
        let b = &config.backends[0];
        assert_eq!(b.max_conn, DEFAULT_MAX_CONNECTION);
        assert_eq!(b.max_conn_timeout, DEFAULT_MAX_CONN_WAIT_SECS);
        assert_eq!(b.max_idemponent_call_attempts, DEFAULT_MAX_IDEMPOTENT_ATTEMPTS);
        assert_eq!(config.health_checker_time, DEFAULT_HEALTH_CHECKER_SECS);
        assert_eq!(b.health_check_path, "/");
    }
}
