//! Built-in middlewares shipped with the registry.

use std::sync::Arc;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, StatusCode};

use crate::middleware::registry::MiddlewareSource;
use crate::middleware::{Context, Middleware, MiddlewareError};
use crate::upstream::ProxyError;

/// `request-logger`: logs every request and its outcome. Observes
/// upstream errors without claiming them.
pub fn request_logger(_src: &MiddlewareSource) -> Result<Arc<dyn Middleware>, String> {
    Ok(Arc::new(RequestLogger))
}

struct RequestLogger;

#[async_trait::async_trait]
impl Middleware for RequestLogger {
    async fn on_request(&self, ctx: &mut Context) -> Result<(), MiddlewareError> {
        tracing::info!(
            method = %ctx.request.method,
            path = %ctx.request.uri.path(),
            client = %ctx.request.client_ip,
            "request received"
        );
        Ok(())
    }

    async fn on_response(
        &self,
        ctx: &mut Context,
        upstream_err: Option<&ProxyError>,
    ) -> Result<(), MiddlewareError> {
        match upstream_err {
            Some(err) => tracing::warn!(
                path = %ctx.request.uri.path(),
                error = %err,
                "upstream call failed"
            ),
            None => tracing::info!(
                path = %ctx.request.uri.path(),
                status = ctx.response.status.as_u16(),
                "request completed"
            ),
        }
        Ok(())
    }
}

/// `header-guard`: short-circuits requests carrying a configured header
/// before any backend is contacted.
///
/// Config keys: `header` (required), `value` (optional exact match,
/// absent means any value), `status` (default 403), `message`.
pub fn header_guard(src: &MiddlewareSource) -> Result<Arc<dyn Middleware>, String> {
    let header = src
        .get_str("header")
        .ok_or_else(|| "'header' config key is required".to_string())?;
    let header: HeaderName = header
        .parse()
        .map_err(|_| format!("'{}' is not a valid header name", header))?;

    let value = src.get_str("value").map(str::to_string);
    let status = match src.get_u64("status") {
        Some(code) => StatusCode::from_u16(code as u16)
            .map_err(|_| format!("'{}' is not a valid status code", code))?,
        None => StatusCode::FORBIDDEN,
    };
    let message = src
        .get_str("message")
        .unwrap_or("request blocked")
        .to_string();

    Ok(Arc::new(HeaderGuard {
        header,
        value,
        status,
        message,
    }))
}

struct HeaderGuard {
    header: HeaderName,
    value: Option<String>,
    status: StatusCode,
    message: String,
}

#[async_trait::async_trait]
impl Middleware for HeaderGuard {
    async fn on_request(&self, ctx: &mut Context) -> Result<(), MiddlewareError> {
        let matched = match (ctx.request.headers.get(&self.header), &self.value) {
            (Some(got), Some(want)) => got.to_str().is_ok_and(|got| got == want),
            (Some(_), None) => true,
            (None, _) => false,
        };

        if matched {
            ctx.response.status = self.status;
            ctx.response
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            ctx.response.body = self.message.clone().into();
            return Err(MiddlewareError(self.message.clone()));
        }
        Ok(())
    }
}

/// `error-page`: replaces the outcome of a failed upstream call with a
/// configured page, suppressing the default 500 synthesizer.
///
/// The page body is the entry's `code`/`file` source. Config keys:
/// `status` (default 502), `content_type` (default text/html).
pub fn error_page(src: &MiddlewareSource) -> Result<Arc<dyn Middleware>, String> {
    let status = match src.get_u64("status") {
        Some(code) => StatusCode::from_u16(code as u16)
            .map_err(|_| format!("'{}' is not a valid status code", code))?,
        None => StatusCode::BAD_GATEWAY,
    };
    let content_type = src.get_str("content_type").unwrap_or("text/html");
    let content_type: HeaderValue = content_type
        .parse()
        .map_err(|_| format!("'{}' is not a valid content type", content_type))?;

    let body = src
        .source
        .ok_or_else(|| "an error page requires its body as code or file".to_string())?
        .to_string();

    Ok(Arc::new(ErrorPage {
        status,
        content_type,
        body,
    }))
}

struct ErrorPage {
    status: StatusCode,
    content_type: HeaderValue,
    body: String,
}

#[async_trait::async_trait]
impl Middleware for ErrorPage {
    async fn on_response(
        &self,
        ctx: &mut Context,
        upstream_err: Option<&ProxyError>,
    ) -> Result<(), MiddlewareError> {
        let Some(err) = upstream_err else {
            return Ok(());
        };

        ctx.response.status = self.status;
        ctx.response
            .headers
            .insert(CONTENT_TYPE, self.content_type.clone());
        ctx.response.body = self.body.clone().into();
        Err(MiddlewareError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use axum::body::Bytes;
    use axum::http::{HeaderMap, Method, Uri};

    use super::*;

    fn ctx_with_header(name: &str, value: &str) -> Context {
        let mut headers = HeaderMap::new();
        headers.insert(
            name.parse::<HeaderName>().unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        Context::new(
            Method::GET,
            Uri::from_static("/"),
            headers,
            Bytes::new(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        )
    }

    fn mapping(pairs: &[(&str, &str)]) -> serde_yaml::Mapping {
        let mut m = serde_yaml::Mapping::new();
        for (k, v) in pairs {
            m.insert(serde_yaml::Value::from(*k), serde_yaml::Value::from(*v));
        }
        m
    }

    #[tokio::test]
    async fn header_guard_blocks_matching_request() {
        let config = mapping(&[("header", "X-Block"), ("value", "1")]);
        let guard = header_guard(&MiddlewareSource {
            config: &config,
            source: None,
        })
        .unwrap();

        let mut ctx = ctx_with_header("X-Block", "1");
        assert!(guard.on_request(&mut ctx).await.is_err());
        assert_eq!(ctx.response.status, StatusCode::FORBIDDEN);
        assert_eq!(&ctx.response.body[..], b"request blocked");

        let mut ctx = ctx_with_header("X-Block", "0");
        assert!(guard.on_request(&mut ctx).await.is_ok());

        let mut ctx = ctx_with_header("X-Other", "1");
        assert!(guard.on_request(&mut ctx).await.is_ok());
    }

    #[tokio::test]
    async fn header_guard_requires_header_key() {
        let config = mapping(&[]);
        let err = header_guard(&MiddlewareSource {
            config: &config,
            source: None,
        })
        .unwrap_err();
        assert!(err.contains("required"));
    }

    #[tokio::test]
    async fn error_page_claims_failed_outcome_only() {
        let config = mapping(&[]);
        let page = error_page(&MiddlewareSource {
            config: &config,
            source: Some("<h1>down</h1>"),
        })
        .unwrap();

        let mut ctx = ctx_with_header("X-Any", "x");
        assert!(page.on_response(&mut ctx, None).await.is_ok());

        let err = ProxyError::Transport("connection refused".into());
        assert!(page.on_response(&mut ctx, Some(&err)).await.is_err());
        assert_eq!(ctx.response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(&ctx.response.body[..], b"<h1>down</h1>");
    }

    #[tokio::test]
    async fn error_page_without_source_is_rejected() {
        let config = mapping(&[]);
        let err = error_page(&MiddlewareSource {
            config: &config,
            source: None,
        })
        .unwrap_err();
        assert!(err.contains("code or file"));
    }
}
