//! FNTV handler: rewrites the stream envelope so the first direct-link
//! quality points at the resolved STRM URL, with Alist transcode
//! variants appended after it.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};

use mediawarp_core::config::Config;
use mediawarp_core::json_chain::JsonChain;
use mediawarp_core::Error;

use crate::strm::{AlistResolver, HttpResolver, StrmKind, StrmRecognizer};

use super::media_server::MediaServer;
use super::proxy::ReverseProxy;
use super::rewrite::{ship_original, ship_rewritten};
use super::routes::{
    fntv_image_cache_regex, fntv_routes, fntv_subtitle_cache_regex, RegexRoute, RouteKind,
};

pub struct FntvServer {
    proxy: ReverseProxy,
    routes: Vec<RegexRoute>,
    image_regex: Regex,
    subtitle_regex: Regex,
    recognizer: Arc<StrmRecognizer>,
    http_resolver: Arc<HttpResolver>,
    alist_resolver: Arc<AlistResolver>,
}

impl FntvServer {
    pub fn new(
        config: Arc<Config>,
        recognizer: Arc<StrmRecognizer>,
        http_resolver: Arc<HttpResolver>,
        alist_resolver: Arc<AlistResolver>,
    ) -> Result<Self, Error> {
        Ok(Self {
            proxy: ReverseProxy::new(&config.media_server.addr)?,
            routes: fntv_routes(&config),
            image_regex: fntv_image_cache_regex(),
            subtitle_regex: fntv_subtitle_cache_regex(),
            recognizer,
            http_resolver,
            alist_resolver,
        })
    }

    async fn modify_stream(&self, req: Request) -> Response {
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let upstream = match self.proxy.fetch(req).await {
            Ok(upstream) => upstream,
            Err(response) => return response,
        };
        if !upstream.status.is_success() {
            return ship_original(upstream);
        }

        match self.rewrite_stream_body(&upstream.body, &user_agent).await {
            Ok(Some(body)) => ship_rewritten(upstream, body, Some("application/json")),
            Ok(None) => ship_original(upstream),
            Err(err) => {
                warn!(error = %err, "failed to materialize rewritten stream envelope");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    async fn rewrite_stream_body(
        &self,
        body: &[u8],
        user_agent: &str,
    ) -> mediawarp_core::Result<Option<Vec<u8>>> {
        let mut chain = JsonChain::from_slice(body);
        if !chain.is_valid() {
            warn!("stream response is not JSON, forwarding unmodified");
            return Ok(None);
        }

        let Some(code) = chain.get_i64("code") else {
            warn!("stream response has no numeric code field, forwarding unmodified");
            return Ok(None);
        };
        if code != 0 {
            debug!(
                code,
                msg = chain.get_str("msg").unwrap_or_default(),
                "stream envelope carries an error, forwarding unmodified"
            );
            return Ok(None);
        }

        let Some(file_path) = chain.get_str("data.file_stream.path").map(str::to_string)
        else {
            warn!("stream response has no data.file_stream.path, forwarding unmodified");
            return Ok(None);
        };

        match self.recognizer.recognize(&file_path) {
            StrmKind::Http { .. } => {
                let Some(url) = chain
                    .get_str("data.direct_link_qualities.0.url")
                    .map(str::to_string)
                else {
                    warn!("stream response has no direct_link_qualities[0].url, forwarding unmodified");
                    return Ok(None);
                };
                let resolved = self.http_resolver.resolve(&url, user_agent).await;
                chain
                    .set("data.direct_link_qualities.0.resolution", "HTTPStrm 直链")
                    .set("data.direct_link_qualities.0.url", resolved);
            }
            StrmKind::Alist { endpoint, .. } => {
                let Some(remote_path) = chain
                    .get_str("data.direct_link_qualities.0.url")
                    .map(str::to_string)
                else {
                    warn!("stream response has no direct_link_qualities[0].url, forwarding unmodified");
                    return Ok(None);
                };
                let resolved = match self
                    .alist_resolver
                    .resolve(&remote_path, &endpoint, true)
                    .await
                {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        warn!(path = %remote_path, error = %err, "Alist STRM resolution failed, forwarding unmodified");
                        return Ok(None);
                    }
                };

                chain
                    .set("data.direct_link_qualities.0.resolution", "AlistStrm 直链 - 原画")
                    .set("data.direct_link_qualities.0.url", resolved.url.as_str())
                    .set("data.file_stream.size", resolved.file_size);

                for (i, variant) in resolved.variants.iter().enumerate() {
                    let base = format!("data.direct_link_qualities.{}", i + 1);
                    let expires_in = (variant.expires_at - Utc::now()).num_seconds();
                    chain
                        .set(
                            format!("{base}.resolution"),
                            format!("AlistStrm 直链 - 转码 {}", variant.resolution.name),
                        )
                        .set(format!("{base}.url"), variant.url.as_str())
                        .set(format!("{base}.is_m3u8"), variant.is_m3u8)
                        .set(format!("{base}.expire_at"), expires_in);
                }
            }
            StrmKind::Unknown => {
                debug!(path = %file_path, "no STRM kind matched, stream untouched");
                return Ok(None);
            }
        }

        chain.result().map(Some)
    }
}

#[async_trait]
impl MediaServer for FntvServer {
    fn regex_routes(&self) -> &[RegexRoute] {
        &self.routes
    }

    fn image_cache_regex(&self) -> Option<&Regex> {
        Some(&self.image_regex)
    }

    fn subtitle_cache_regex(&self) -> Option<&Regex> {
        Some(&self.subtitle_regex)
    }

    async fn dispatch(&self, kind: RouteKind, req: Request) -> Response {
        match kind {
            RouteKind::Stream => self.modify_stream(req).await,
            _ => self.reverse_proxy(req).await,
        }
    }

    async fn reverse_proxy(&self, req: Request) -> Response {
        self.proxy.forward(req).await
    }
}
