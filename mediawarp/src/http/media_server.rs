//! The capability set a media-server family exposes to the router.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use regex::Regex;

use mediawarp_alist::AlistRegistry;
use mediawarp_core::config::{Config, MediaServerKind};
use mediawarp_core::Error;

use crate::strm::{AlistResolver, HttpResolver, StrmRecognizer};

use super::emby::EmbyServer;
use super::fntv::FntvServer;
use super::jellyfin::JellyfinServer;
use super::routes::{RegexRoute, RouteKind};

/// What the router and middleware need from a media-server family; they
/// stay unaware of the concrete variant behind it.
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// Ordered intercept table; first match wins.
    fn regex_routes(&self) -> &[RegexRoute];

    fn image_cache_regex(&self) -> Option<&Regex>;

    fn subtitle_cache_regex(&self) -> Option<&Regex>;

    /// Run one intercepted route.
    async fn dispatch(&self, kind: RouteKind, req: Request) -> Response;

    /// Plain passthrough to the upstream server.
    async fn reverse_proxy(&self, req: Request) -> Response;
}

/// Build the handler for the configured family.
pub fn build_media_server(
    config: &Arc<Config>,
    registry: Arc<AlistRegistry>,
) -> Result<Arc<dyn MediaServer>, Error> {
    let recognizer = Arc::new(StrmRecognizer::new(config));
    let http_resolver = Arc::new(HttpResolver::new(config));
    let alist_resolver = Arc::new(AlistResolver::new(config, registry));

    let server: Arc<dyn MediaServer> = match config.media_server.kind {
        MediaServerKind::Emby => Arc::new(EmbyServer::new(
            config.clone(),
            recognizer,
            http_resolver,
            alist_resolver,
        )?),
        MediaServerKind::Jellyfin => Arc::new(JellyfinServer::new(
            config.clone(),
            recognizer,
            http_resolver,
            alist_resolver,
        )?),
        MediaServerKind::Fntv => Arc::new(FntvServer::new(
            config.clone(),
            recognizer,
            http_resolver,
            alist_resolver,
        )?),
    };
    Ok(server)
}
