//! PlaybackInfo rewriting and video-byte redirecting, shared by the
//! Emby and Jellyfin handlers.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use tracing::{debug, warn};

use mediawarp_core::json_chain::JsonChain;

use crate::strm::{AlistResolver, HttpResolver, StrmKind, StrmRecognizer, TranscodeVariant};

use super::items::{strip_mediasource_prefix, Item, MediaServerApi, PlaybackInfoResponse};
use super::proxy::ReverseProxy;
use super::rewrite::{query_param, ship_original, ship_rewritten};
use super::routes::video_canonical_regex;

/// Collaborators every Emby-family handler needs.
pub struct PlaybackCore {
    pub api: MediaServerApi,
    pub proxy: ReverseProxy,
    pub recognizer: Arc<StrmRecognizer>,
    pub http_resolver: Arc<HttpResolver>,
    pub alist_resolver: Arc<AlistResolver>,
    canonical: Regex,
}

impl PlaybackCore {
    pub fn new(
        api: MediaServerApi,
        proxy: ReverseProxy,
        recognizer: Arc<StrmRecognizer>,
        http_resolver: Arc<HttpResolver>,
        alist_resolver: Arc<AlistResolver>,
    ) -> Self {
        Self {
            api,
            proxy,
            recognizer,
            http_resolver,
            alist_resolver,
            canonical: video_canonical_regex(),
        }
    }

    /// Rewrite `/Items/{id}/PlaybackInfo` so STRM media sources become
    /// direct-playable targets.
    pub async fn modify_playback_info(&self, req: Request) -> Response {
        let upstream = match self.proxy.fetch(req).await {
            Ok(upstream) => upstream,
            Err(response) => return response,
        };
        if !upstream.status.is_success() {
            return ship_original(upstream);
        }

        match self.rewrite_playback_body(&upstream.body).await {
            Ok(Some(body)) => ship_rewritten(upstream, body, Some("application/json")),
            Ok(None) => ship_original(upstream),
            Err(err) => {
                // Re-encoding an already-parsed document failing is a
                // programmer error, not an upstream condition.
                warn!(error = %err, "failed to materialize rewritten PlaybackInfo");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    /// Returns `Ok(None)` when nothing was modified so the caller ships
    /// the original bytes untouched.
    async fn rewrite_playback_body(
        &self,
        body: &[u8],
    ) -> mediawarp_core::Result<Option<Vec<u8>>> {
        let info: PlaybackInfoResponse = match serde_json::from_slice(body) {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %err, "PlaybackInfo response is not the expected JSON, forwarding unmodified");
                return Ok(None);
            }
        };
        if info.media_sources.is_empty() {
            return Ok(None);
        }

        let mut chain = JsonChain::from_slice(body);
        let mut touched = false;
        let mut append_index = info.media_sources.len();

        for (index, source) in info.media_sources.iter().enumerate() {
            let Some(source_id) = source.id.as_deref() else {
                continue;
            };
            let bare_id = strip_mediasource_prefix(source_id);

            debug!(id = %bare_id, "querying item for media source");
            let items = match self.api.query_item(bare_id, "Path,MediaSources").await {
                Ok(items) => items,
                Err(err) => {
                    warn!(id = %bare_id, error = %err, "item query failed, leaving media source untouched");
                    continue;
                }
            };
            let Some(item) = items.items.first() else {
                continue;
            };
            let Some(content) = strm_content(item, bare_id) else {
                continue;
            };

            let base = format!("MediaSources.{index}");
            match self.recognizer.recognize(&content) {
                StrmKind::Http { .. } => {
                    apply_http_strm(&mut chain, &base, source);
                    touched = true;
                }
                StrmKind::Alist { endpoint, path } => {
                    match self.alist_resolver.resolve(&path, &endpoint, true).await {
                        Ok(resolved) => {
                            apply_alist_strm(&mut chain, &base, &resolved.url, resolved.file_size);
                            for (n, variant) in resolved.variants.iter().enumerate() {
                                append_transcode_source(
                                    &mut chain,
                                    append_index,
                                    source_id,
                                    n,
                                    variant,
                                );
                                append_index += 1;
                            }
                            touched = true;
                        }
                        Err(err) => {
                            warn!(path = %path, error = %err, "Alist STRM resolution failed, leaving media source untouched");
                        }
                    }
                }
                StrmKind::Unknown => {
                    debug!(path = %content, "no STRM kind matched, media source untouched");
                }
            }
        }

        if !touched {
            return Ok(None);
        }
        chain.result().map(Some)
    }

    /// Video byte requests: 302 STRM media sources to their real URL,
    /// pass everything else through.
    pub async fn videos_handler(&self, req: Request, emby_compat: bool) -> Response {
        if req.method() == Method::HEAD {
            debug!("videos handler forwards HEAD requests untouched");
            return self.proxy.forward(req).await;
        }

        if emby_compat {
            if let Some(captures) = self.canonical.captures(req.uri().path()) {
                let canonical = format!("/videos/{}/stream", &captures[1]);
                debug!(from = %req.uri().path(), to = %canonical, "canonicalizing video path");
                return redirect_found(&canonical);
            }
        }

        let Some(media_source_id) =
            query_param(req.uri(), "mediasourceid").map(str::to_string)
        else {
            return self.proxy.forward(req).await;
        };
        let bare_id = strip_mediasource_prefix(&media_source_id).to_string();
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let items = match self.api.query_item(&bare_id, "Path,MediaSources").await {
            Ok(items) => items,
            Err(err) => {
                warn!(id = %bare_id, error = %err, "item query failed, passing video request through");
                return self.proxy.forward(req).await;
            }
        };
        let Some(item) = items.items.first() else {
            return self.proxy.forward(req).await;
        };
        let Some(item_path) = item.path.as_deref() else {
            return self.proxy.forward(req).await;
        };

        if !item_path.to_ascii_lowercase().trim_end().ends_with(".strm") {
            debug!(path = %item_path, "local video, passing through");
            return self.proxy.forward(req).await;
        }

        for source in &item.media_sources {
            let Some(source_id) = source.id.as_deref() else {
                continue;
            };
            if strip_mediasource_prefix(source_id) != bare_id {
                continue;
            }
            let content = source.path.clone().unwrap_or_default();

            match self.recognizer.recognize(&content) {
                StrmKind::Http { url } => {
                    if source.protocol.as_deref() == Some("Http") {
                        let target = self.http_resolver.resolve(&url, &user_agent).await;
                        return redirect_found(&target);
                    }
                }
                StrmKind::Alist { endpoint, path } => {
                    match self.alist_resolver.resolve(&path, &endpoint, false).await {
                        Ok(resolved) => return redirect_found(&resolved.url),
                        Err(err) => {
                            warn!(path = %path, error = %err, "Alist STRM resolution failed, passing video request through");
                            return self.proxy.forward(req).await;
                        }
                    }
                }
                StrmKind::Unknown => {
                    return self.proxy.forward(req).await;
                }
            }
        }

        self.proxy.forward(req).await
    }
}

/// The STRM payload for a media source: its own `Path` (the placeholder
/// content once the server probed it), falling back to the item path.
fn strm_content(item: &Item, bare_id: &str) -> Option<String> {
    item.media_sources
        .iter()
        .find(|source| {
            source
                .id
                .as_deref()
                .is_some_and(|id| strip_mediasource_prefix(id) == bare_id)
        })
        .and_then(|source| source.path.clone())
        .or_else(|| item.path.clone())
}

fn apply_http_strm(
    chain: &mut JsonChain,
    base: &str,
    source: &super::items::MediaSource,
) {
    chain
        .set(format!("{base}.SupportsDirectPlay"), true)
        .set(format!("{base}.SupportsDirectStream"), true)
        .set(format!("{base}.SupportsTranscoding"), true);

    if source
        .direct_stream_url
        .as_deref()
        .map_or(true, str::is_empty)
    {
        let item_id = source
            .item_id
            .as_deref()
            .or(source.id.as_deref())
            .unwrap_or_default();
        let media_source_id = source.id.as_deref().unwrap_or_default();
        chain.set(
            format!("{base}.DirectStreamUrl"),
            format!("/videos/{item_id}/stream?MediaSourceId={media_source_id}&Static=true"),
        );
    }
}

fn apply_alist_strm(chain: &mut JsonChain, base: &str, url: &str, file_size: i64) {
    chain
        .set(format!("{base}.SupportsDirectPlay"), true)
        .set(format!("{base}.SupportsDirectStream"), true)
        .set(format!("{base}.SupportsTranscoding"), false)
        .set(format!("{base}.DirectStreamUrl"), url)
        .set(format!("{base}.Size"), file_size);
}

/// Each transcode variant becomes an extra media source entry.
fn append_transcode_source(
    chain: &mut JsonChain,
    index: usize,
    source_id: &str,
    ordinal: usize,
    variant: &TranscodeVariant,
) {
    let base = format!("MediaSources.{index}");
    chain
        .set(format!("{base}.Id"), format!("{source_id}-transcode-{ordinal}"))
        .set(
            format!("{base}.Name"),
            format!("AlistStrm 直链 - 转码 {}", variant.resolution.name),
        )
        .set(format!("{base}.Path"), variant.url.as_str())
        .set(format!("{base}.DirectStreamUrl"), variant.url.as_str())
        .set(format!("{base}.Protocol"), "Http")
        .set(
            format!("{base}.Container"),
            if variant.is_m3u8 { "m3u8" } else { "mp4" },
        )
        .set(format!("{base}.SupportsDirectPlay"), true)
        .set(format!("{base}.SupportsDirectStream"), true)
        .set(format!("{base}.SupportsTranscoding"), false)
        .set(format!("{base}.IsRemote"), true)
        .set(format!("{base}.Width"), variant.resolution.width)
        .set(format!("{base}.Height"), variant.resolution.height);
}

/// 302 with a `Location` header, the redirect flavor media clients obey.
pub fn redirect_found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (
            StatusCode::FOUND,
            [(header::LOCATION, value)],
        )
            .into_response(),
        Err(err) => {
            warn!(location = %location, error = %err, "redirect target is not a valid header value");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
