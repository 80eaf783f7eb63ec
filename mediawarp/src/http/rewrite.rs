//! Shared plumbing for the response rewriters.
//!
//! Contract: the upstream status line is never altered; a rewriter that
//! cannot make sense of the body forwards the original bytes unchanged;
//! only an unreadable upstream body surfaces as a proxy error.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Uri};
use axum::response::Response;

use super::proxy::{bad_gateway, UpstreamResponse};

/// Query keys rewritten to lowercase before an intercepted route runs,
/// so handlers can read them without case games.
const CASE_NORMALIZED_QUERY_KEYS: &[&str] =
    &["mediasourceid", "api_key", "playsessionid", "static"];

/// Prepare a request for an intercepted route: lowercase the well-known
/// query keys and disable client-advertised compression so upstream
/// bodies arrive rewritable.
pub fn prepare_intercepted(mut req: Request) -> Request {
    req.headers_mut()
        .insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    if let Some(query) = req.uri().query() {
        let normalized: Vec<String> = query
            .split('&')
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                let lower = key.to_ascii_lowercase();
                if CASE_NORMALIZED_QUERY_KEYS.contains(&lower.as_str()) && key != lower {
                    if value.is_empty() && !pair.contains('=') {
                        lower
                    } else {
                        format!("{lower}={value}")
                    }
                } else {
                    pair.to_string()
                }
            })
            .collect();
        let normalized = normalized.join("&");
        if normalized != query {
            let path = req.uri().path().to_string();
            if let Ok(uri) = Uri::try_from(format!("{path}?{normalized}")) {
                *req.uri_mut() = uri;
            }
        }
    }

    req
}

/// Read a single query parameter (expects pre-normalized keys).
pub fn query_param<'a>(uri: &'a Uri, key: &str) -> Option<&'a str> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Ship the upstream response with a replaced body.
///
/// Status and remaining headers are preserved; `Content-Length` is
/// recomputed and `Content-Type` overridden when given.
pub fn ship_rewritten(
    upstream: UpstreamResponse,
    body: Vec<u8>,
    content_type: Option<&'static str>,
) -> Response {
    let mut response = Response::builder().status(upstream.status);
    if let Some(headers) = response.headers_mut() {
        *headers = upstream.headers;
        headers.remove(header::CONTENT_LENGTH);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        if let Some(content_type) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }
    response
        .body(Body::from(body))
        .unwrap_or_else(|_| bad_gateway())
}

/// Ship the upstream response bytes unchanged.
pub fn ship_original(upstream: UpstreamResponse) -> Response {
    let mut response = Response::builder().status(upstream.status);
    if let Some(headers) = response.headers_mut() {
        *headers = upstream.headers;
    }
    response
        .body(Body::from(upstream.body))
        .unwrap_or_else(|_| bad_gateway())
}
