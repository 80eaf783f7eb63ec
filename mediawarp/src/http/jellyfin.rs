//! Jellyfin handler. Same playback semantics as Emby minus the player
//! patch and subtitle conversion; media-source ids carry no prefix and
//! video paths have no canonical-redirect quirk.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use regex::Regex;
use tracing::warn;

use mediawarp_core::config::Config;
use mediawarp_core::Error;

use crate::strm::{AlistResolver, HttpResolver, StrmRecognizer};

use super::emby::{head_injection, replace_bytes};
use super::items::MediaServerApi;
use super::media_server::MediaServer;
use super::playback::PlaybackCore;
use super::proxy::ReverseProxy;
use super::rewrite::{ship_original, ship_rewritten};
use super::routes::{
    jellyfin_image_cache_regex, jellyfin_routes, jellyfin_subtitle_cache_regex, RegexRoute,
    RouteKind,
};

pub struct JellyfinServer {
    core: PlaybackCore,
    routes: Vec<RegexRoute>,
    image_regex: Regex,
    subtitle_regex: Regex,
    config: Arc<Config>,
}

impl JellyfinServer {
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
            routes: jellyfin_routes(&config),
            image_regex: jellyfin_image_cache_regex(),
            subtitle_regex: jellyfin_subtitle_cache_regex(),
            config,
        })
    }

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

        let injection = head_injection(&self.config, "jellyfin");
        match replace_bytes(&html, b"</head>", injection.as_bytes()) {
            Some(patched) => ship_rewritten(upstream, patched, None),
            None => {
                warn!("index.html has no </head>, forwarding unmodified");
                ship_original(upstream)
            }
        }
    }
}

#[async_trait]
impl MediaServer for JellyfinServer {
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
            RouteKind::Videos => self.core.videos_handler(req, false).await,
            RouteKind::PlaybackInfo => self.core.modify_playback_info(req).await,
            RouteKind::Index => self.modify_index(req).await,
            _ => self.reverse_proxy(req).await,
        }
    }

    async fn reverse_proxy(&self, req: Request) -> Response {
        self.core.proxy.forward(req).await
    }
}
