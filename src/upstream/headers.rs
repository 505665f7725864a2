//! Forwarded-request header rewriting.

use std::collections::HashMap;
use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

/// Hop-by-hop headers. These are removed when sent to the backend and
/// from the backend's response. As of RFC 7230, hop-by-hop headers are
/// required to appear in the Connection header field; these are the
/// headers defined by the obsoleted RFC 2616 (section 13.5.1) and are
/// kept for backward compatibility.
pub const HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection", // non-standard but still sent by libcurl and rejected by e.g. google
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te", // canonicalized version of "TE"
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Remove every hop-by-hop header in place.
pub fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

/// A parsed custom header value: either a literal or one of the
/// substitution variables.
#[derive(Debug, Clone)]
pub enum HeaderTemplate {
    Literal(HeaderValue),
    RemoteAddr,
    Time,
    Incremental,
    Uuid,
}

/// Parse configured custom headers into applied form. Variable names are
/// validated by the config layer; unknown `$` values cannot reach here.
pub fn parse_custom_headers(
    configured: &HashMap<String, String>,
) -> Result<Vec<(HeaderName, HeaderTemplate)>, String> {
    let mut parsed = Vec::with_capacity(configured.len());

    for (name, value) in configured {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| format!("'{}' is not a valid header name", name))?;

        let template = match value.as_str() {
            "$remote_addr" => HeaderTemplate::RemoteAddr,
            "$time" => HeaderTemplate::Time,
            "$incremental" => HeaderTemplate::Incremental,
            "$uuid" => HeaderTemplate::Uuid,
            literal => HeaderTemplate::Literal(
                HeaderValue::from_str(literal)
                    .map_err(|_| format!("'{}' is not a valid header value", literal))?,
            ),
        };

        parsed.push((name, template));
    }

    Ok(parsed)
}

/// Append custom headers, substituting variables. `request_count` is the
/// forwarding client's total request counter at the time of the call.
pub fn apply_custom_headers(
    headers: &mut HeaderMap,
    templates: &[(HeaderName, HeaderTemplate)],
    client_ip: IpAddr,
    request_count: u64,
) {
    for (name, template) in templates {
        let value = match template {
            HeaderTemplate::Literal(value) => value.clone(),
            HeaderTemplate::RemoteAddr => render(client_ip.to_string()),
            HeaderTemplate::Time => render(
                chrono::Local::now()
                    .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                    .to_string(),
            ),
            HeaderTemplate::Incremental => render(request_count.to_string()),
            HeaderTemplate::Uuid => render(Uuid::new_v4().to_string()),
        };
        headers.insert(name.clone(), value);
    }
}

fn render(value: String) -> HeaderValue {
    // All rendered variables are plain ASCII.
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
}
