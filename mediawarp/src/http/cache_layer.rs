//! Response cache middleware for images and subtitles.
//!
//! Only GET requests whose path matches the family's cache regex are
//! considered. Hits replay the recorded status, whitelisted headers and
//! body; misses run the chain and record 2xx responses up to the entry
//! size cap. Cache failures never fail the request.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mediawarp_core::cache::{BoundedCache, MAX_ENTRY_SIZE};

/// Query keys excluded from the cache key: session and signature noise
/// that changes without the payload changing.
const IGNORED_QUERY_KEYS: &[&str] = &[
    "api_key",
    "tag",
    "playsessionid",
    "starttimeticks",
    "x-playback-session-id",
];

/// Response headers worth replaying from cache.
const HEADER_WHITELIST: &[HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CACHE_CONTROL,
    header::ETAG,
    header::CONTENT_DISPOSITION,
];

/// One cached response, stored as a JSON envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status_code: u16,
    pub header: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl CacheEntry {
    fn record(status: StatusCode, headers: &axum::http::HeaderMap, body: &Bytes) -> Self {
        let mut header = HashMap::with_capacity(HEADER_WHITELIST.len());
        for name in HEADER_WHITELIST {
            if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
                header.insert(name.to_string(), value.to_string());
            }
        }
        Self {
            status_code: status.as_u16(),
            header,
            body: body.to_vec(),
        }
    }

    fn into_response(self) -> Response {
        let mut response = Response::builder()
            .status(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK));
        if let Some(headers) = response.headers_mut() {
            for (name, value) in &self.header {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
        }
        response
            .body(Body::from(self.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

/// Cache middleware bound to one regex and one cache instance.
#[derive(Clone)]
pub struct ResponseCache {
    name: &'static str,
    pattern: Arc<Regex>,
    cache: BoundedCache,
}

impl ResponseCache {
    pub fn new(name: &'static str, pattern: Regex, cache: BoundedCache) -> Self {
        Self {
            name,
            pattern: Arc::new(pattern),
            cache,
        }
    }

    pub async fn handle(&self, req: Request, next: Next) -> Response {
        if req.method() != Method::GET || !self.pattern.is_match(req.uri().path()) {
            return next.run(req).await;
        }

        let key = cache_key(req.uri());
        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_slice::<CacheEntry>(&raw) {
                Ok(entry) => {
                    debug!(cache = self.name, key = %key, "response cache hit");
                    return entry.into_response();
                }
                Err(err) => {
                    warn!(cache = self.name, key = %key, error = %err, "corrupt cache entry, refetching");
                }
            }
        }

        let response = next.run(req).await;
        let (parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(cache = self.name, error = %err, "failed to buffer response body");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        if parts.status.is_success() {
            if bytes.len() <= MAX_ENTRY_SIZE {
                let entry = CacheEntry::record(parts.status, &parts.headers, &bytes);
                match serde_json::to_vec(&entry) {
                    Ok(raw) => {
                        if let Err(err) = self.cache.insert(key.clone(), Bytes::from(raw)).await {
                            warn!(cache = self.name, key = %key, error = %err, "response cache write failed");
                        } else {
                            debug!(cache = self.name, key = %key, "response cached");
                        }
                    }
                    Err(err) => {
                        warn!(cache = self.name, key = %key, error = %err, "failed to serialize cache entry");
                    }
                }
            } else {
                debug!(
                    cache = self.name,
                    size = bytes.len(),
                    limit = MAX_ENTRY_SIZE,
                    "response too large to cache, skipping"
                );
            }
        } else {
            debug!(cache = self.name, status = %parts.status, "non-2xx response not cached");
        }

        Response::from_parts(parts, Body::from(bytes))
    }
}

/// Cache key: path plus the canonicalized query.
///
/// Ignore-listed keys are dropped (case-insensitive) and the remaining
/// pairs sorted, so the key is stable under parameter reordering.
pub fn cache_key(uri: &Uri) -> String {
    let path = uri.path();
    let Some(query) = uri.query() else {
        return path.to_string();
    };

    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .filter(|(key, _)| !IGNORED_QUERY_KEYS.contains(&key.to_ascii_lowercase().as_str()))
        .collect();
    pairs.sort();

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    format!("{path}{}", serializer.finish())
}
