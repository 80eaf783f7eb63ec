//! Single-host reverse proxy over a dedicated outbound client.

use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::error;
use url::Url;

use mediawarp_core::config::trim_endpoint;
use mediawarp_core::Error;

/// Body of the only proxy-generated error response.
pub const UPSTREAM_UNREACHABLE_BODY: &str =
    r#"{"error":"无法连接到上游服务器，请稍后重试"}"#;

/// 502 response for an unreachable upstream.
pub fn bad_gateway() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        [(header::CONTENT_TYPE, "application/json")],
        UPSTREAM_UNREACHABLE_BODY,
    )
        .into_response()
}

/// A fully-buffered upstream response, for the rewriters.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Reverse proxy to one upstream media server.
///
/// Bodies stream through in both directions on passthrough; rewriter
/// routes use [`ReverseProxy::fetch`] to buffer the response instead.
pub struct ReverseProxy {
    target: Url,
    client: reqwest::Client,
}

impl ReverseProxy {
    pub fn new(addr: &str) -> Result<Self, Error> {
        let target = Url::parse(&trim_endpoint(addr))
            .map_err(|e| Error::InvalidConfig(format!("invalid upstream address {addr:?}: {e}")))?;
        // Long-lived transport: generous connect/idle settings, upstream
        // redirects passed through untouched, no overall deadline so
        // large bodies can stream.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .read_timeout(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build proxy client: {e}")))?;
        Ok(Self { target, client })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Forward a request upstream and stream the response back.
    pub async fn forward(&self, req: Request) -> Response {
        let (parts, body) = req.into_parts();
        let url = self.rebase(&parts.uri);

        let mut builder = self.client.request(parts.method.clone(), url);
        for (name, value) in &parts.headers {
            if is_hop_by_hop(name) || name == header::HOST {
                continue;
            }
            builder = builder.header(name, value);
        }

        let upstream = builder
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        let upstream = match upstream {
            Ok(upstream) => upstream,
            Err(err) => {
                error!(method = %parts.method, path = %parts.uri.path(), error = %err, "proxy request failed");
                return bad_gateway();
            }
        };

        let mut response = Response::builder().status(upstream.status());
        if let Some(headers) = response.headers_mut() {
            for (name, value) in upstream.headers() {
                if !is_hop_by_hop(name) {
                    headers.append(name.clone(), value.clone());
                }
            }
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .unwrap_or_else(|_| bad_gateway())
    }

    /// Call upstream and buffer the whole response for rewriting.
    ///
    /// Errors come back as a ready-made 502 so callers can return them
    /// directly.
    pub async fn fetch(&self, req: Request) -> Result<UpstreamResponse, Response> {
        let (parts, body) = req.into_parts();
        let url = self.rebase(&parts.uri);

        let mut builder = self.client.request(parts.method.clone(), url);
        for (name, value) in &parts.headers {
            if is_hop_by_hop(name) || name == header::HOST {
                continue;
            }
            builder = builder.header(name, value);
        }

        let upstream = builder
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|err| {
                error!(method = %parts.method, path = %parts.uri.path(), error = %err, "proxy request failed");
                bad_gateway()
            })?;

        let status = upstream.status();
        let mut headers = HeaderMap::new();
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        let body = upstream.bytes().await.map_err(|err| {
            error!(path = %parts.uri.path(), error = %err, "failed to read upstream body");
            bad_gateway()
        })?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }

    fn rebase(&self, uri: &axum::http::Uri) -> Url {
        let mut url = self.target.clone();
        url.set_path(uri.path());
        url.set_query(uri.query());
        url
    }
}

/// Hop-by-hop headers are never forwarded in either direction.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebase_keeps_path_and_query() {
        let proxy = ReverseProxy::new("http://emby:8096/").unwrap();
        let uri: axum::http::Uri = "/emby/Items/54/Images/Primary?tag=abc".parse().unwrap();
        assert_eq!(
            proxy.rebase(&uri).as_str(),
            "http://emby:8096/emby/Items/54/Images/Primary?tag=abc"
        );
    }

    #[test]
    fn test_invalid_addr_rejected() {
        assert!(ReverseProxy::new("not a url").is_err());
    }

    #[test]
    fn test_hop_by_hop() {
        assert!(is_hop_by_hop(&HeaderName::from_static("transfer-encoding")));
        assert!(is_hop_by_hop(&HeaderName::from_static("connection")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("content-type")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("etag")));
    }
}
