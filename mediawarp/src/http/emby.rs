//! Emby handler: PlaybackInfo rewriting, video redirecting, the
//! `basehtmlplayer.js` CORS patch, index head injection and SRT → ASS
//! subtitle conversion.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use regex::Regex;
use tracing::{info, warn};

use mediawarp_core::config::Config;
use mediawarp_core::{subtitle, Error};

use crate::strm::{AlistResolver, HttpResolver, StrmRecognizer};

use super::items::MediaServerApi;
use super::media_server::MediaServer;
use super::playback::PlaybackCore;
use super::proxy::ReverseProxy;
use super::rewrite::{ship_original, ship_rewritten};
use super::routes::{emby_image_cache_regex, emby_routes, emby_subtitle_cache_regex, RegexRoute, RouteKind};

/// The player fragment that pins CORS mode, disabling 302 cross-origin
/// playback unless patched out.
const CORS_FRAGMENT: &[u8] =
    br#"mediaSource.IsRemote&&"DirectPlay"===playMethod?null:"anonymous""#;
const CORS_REPLACEMENT: &[u8] = b"null";

pub struct EmbyServer {
    core: PlaybackCore,
    routes: Vec<RegexRoute>,
    image_regex: Regex,
    subtitle_regex: Regex,
    config: Arc<Config>,
}

impl EmbyServer {
    pub fn new(
        config: Arc<Config>,
        recognizer: Arc<StrmRecognizer>,
        http_resolver: Arc<HttpResolver>,
        alist_resolver: Arc<AlistResolver>,
    ) -> Result<Self, Error> {
        let api = MediaServerApi::new(
            config.media_server.kind,
            &config.media_server.addr,
            &config.media_server.api_key,
        );
        let proxy = ReverseProxy::new(&config.media_server.addr)?;
        Ok(Self {
            core: PlaybackCore::new(api, proxy, recognizer, http_resolver, alist_resolver),
            routes: emby_routes(&config),
            image_regex: emby_image_cache_regex(),
            subtitle_regex: emby_subtitle_cache_regex(),
            config,
        })
    }

    /// Patch `basehtmlplayer.js` so direct-play media sources use CORS
    /// mode `null`, enabling 302 cross-origin playback.
    async fn modify_base_html_player(&self, req: Request) -> Response {
        let upstream = match self.core.proxy.fetch(req).await {
            Ok(upstream) => upstream,
            Err(response) => return response,
        };
        match replace_bytes(&upstream.body, CORS_FRAGMENT, CORS_REPLACEMENT) {
            Some(patched) => ship_rewritten(upstream, patched, None),
            None => ship_original(upstream),
        }
    }

    /// Splice the configured fragments in before `</head>`.
    async fn modify_index(&self, req: Request) -> Response {
        let upstream = match self.core.proxy.fetch(req).await {
            Ok(upstream) => upstream,
            Err(response) => return response,
        };

        let html = if self.config.web.index {
            let path = format!("{}/index.html", self.config.web.custom_dir);
            match tokio::fs::read(&path).await {
                Ok(html) => html,
                Err(err) => {
                    warn!(path = %path, error = %err, "failed to read local index.html, forwarding upstream page");
                    return ship_original(upstream);
                }
            }
        } else {
            upstream.body.to_vec()
        };

        let injection = head_injection(&self.config, "emby");
        match replace_bytes(&html, b"</head>", injection.as_bytes()) {
            Some(patched) => ship_rewritten(upstream, patched, None),
            None => {
                warn!("index.html has no </head>, forwarding unmodified");
                ship_original(upstream)
            }
        }
    }

    /// Convert SRT subtitle payloads to ASS when enabled.
    async fn modify_subtitles(&self, req: Request) -> Response {
        let upstream = match self.core.proxy.fetch(req).await {
            Ok(upstream) => upstream,
            Err(response) => return response,
        };
        if !subtitle::is_srt(&upstream.body) {
            return ship_original(upstream);
        }
        info!("SRT subtitle converted to ASS");
        let ass = subtitle::srt_to_ass(&upstream.body, &self.config.subtitle.ass_style);
        ship_rewritten(upstream, ass, None)
    }
}

#[async_trait]
impl MediaServer for EmbyServer {
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
            RouteKind::Videos => self.core.videos_handler(req, true).await,
            RouteKind::PlaybackInfo => self.core.modify_playback_info(req).await,
            RouteKind::BaseHtmlPlayer => self.modify_base_html_player(req).await,
            RouteKind::Index => self.modify_index(req).await,
            RouteKind::Subtitles => self.modify_subtitles(req).await,
            RouteKind::Stream => self.reverse_proxy(req).await,
        }
    }

    async fn reverse_proxy(&self, req: Request) -> Response {
        self.core.proxy.forward(req).await
    }
}

/// First-occurrence byte replacement; `None` when the needle is absent.
pub(super) fn replace_bytes(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Option<Vec<u8>> {
    let at = haystack
        .windows(needle.len())
        .position(|window| window == needle)?;
    let mut out = Vec::with_capacity(haystack.len() - needle.len() + replacement.len());
    out.extend_from_slice(&haystack[..at]);
    out.extend_from_slice(replacement);
    out.extend_from_slice(&haystack[at + needle.len()..]);
    Some(out)
}

/// Build the HTML block injected before `</head>`.
pub(super) fn head_injection(config: &Config, family: &str) -> String {
    let web = &config.web;
    let mut head = String::new();
    if !web.head.is_empty() {
        head.push_str(&web.head);
        head.push('\n');
    }
    if web.external_player_url {
        head.push_str(r#"<script src="/MediaWarp/static/embyExternalUrl/embyWebAddExternalUrl/embyLaunchPotplayer.js"></script>"#);
        head.push('\n');
    }
    if web.crx {
        head.push_str(&format!(
            r#"<link rel="stylesheet" id="theme-css" href="/MediaWarp/static/{family}-crx/static/css/style.css" type="text/css" media="all" />
    <script src="/MediaWarp/static/{family}-crx/static/js/common-utils.js"></script>
    <script src="/MediaWarp/static/{family}-crx/static/js/jquery-3.6.0.min.js"></script>
    <script src="/MediaWarp/static/{family}-crx/static/js/md5.min.js"></script>
    <script src="/MediaWarp/static/{family}-crx/content/main.js"></script>"#
        ));
        head.push('\n');
    }
    if web.actor_plus {
        head.push_str(r#"<script src="/MediaWarp/static/emby-web-mod/actorPlus/actorPlus.js"></script>"#);
        head.push('\n');
    }
    if web.fanart_show {
        head.push_str(r#"<script src="/MediaWarp/static/emby-web-mod/fanart_show/fanart_show.js"></script>"#);
        head.push('\n');
    }
    if web.danmaku {
        head.push_str(&format!(
            r#"<script src="/MediaWarp/static/{}/ede.js" defer></script>"#,
            if family == "jellyfin" { "jellyfin-danmaku" } else { "dd-danmaku" }
        ));
        head.push('\n');
    }
    if web.video_together {
        head.push_str(r#"<script src="https://2gether.video/release/extension.website.user.js"></script>"#);
        head.push('\n');
    }
    head.push_str("<!-- MediaWarp Web 页面修改功能 -->\n</head>");
    head
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_bytes_cors_fragment() {
        let js = br#"var crossOrigin = mediaSource.IsRemote&&"DirectPlay"===playMethod?null:"anonymous";"#;
        let patched = replace_bytes(js, CORS_FRAGMENT, CORS_REPLACEMENT).unwrap();
        assert_eq!(patched, b"var crossOrigin = null;".to_vec());
    }

    #[test]
    fn test_replace_bytes_absent_needle() {
        assert!(replace_bytes(b"nothing here", CORS_FRAGMENT, CORS_REPLACEMENT).is_none());
    }

    #[test]
    fn test_head_injection_contains_configured_fragments() {
        let mut config = Config::default();
        config.web.enable = true;
        config.web.head = r#"<meta name="x" content="y">"#.to_string();
        config.web.danmaku = true;
        let head = head_injection(&config, "emby");
        assert!(head.starts_with(r#"<meta name="x" content="y">"#));
        assert!(head.contains("dd-danmaku/ede.js"));
        assert!(head.ends_with("</head>"));

        let jellyfin_head = head_injection(&config, "jellyfin");
        assert!(jellyfin_head.contains("jellyfin-danmaku/ede.js"));
    }

    #[test]
    fn test_head_injection_splices_into_html() {
        let mut config = Config::default();
        config.web.head = "<script>1</script>".to_string();
        let html = b"<html><head><title>t</title></head><body></body></html>";
        let injection = head_injection(&config, "emby");
        let patched = replace_bytes(html, b"</head>", injection.as_bytes()).unwrap();
        let patched = String::from_utf8(patched).unwrap();
        assert!(patched.contains("<script>1</script>"));
        // The head is still closed exactly once.
        assert_eq!(patched.matches("</head>").count(), 1);
    }
}
