//! HTTP layer: router assembly, regex dispatch and management routes.

pub mod cache_layer;
pub mod client_filter;
pub mod emby;
pub mod fntv;
pub mod items;
pub mod jellyfin;
pub mod media_server;
pub mod playback;
pub mod proxy;
pub mod rewrite;
pub mod routes;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use mediawarp_alist::AlistRegistry;
use mediawarp_core::cache::maybe_cache;
use mediawarp_core::config::Config;
use mediawarp_core::{Error, VERSION};

use cache_layer::ResponseCache;
use client_filter::ClientFilter;
use media_server::{build_media_server, MediaServer};
use rewrite::prepare_intercepted;

/// Shared application state: everything is built once at startup and
/// read-only afterwards.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub server: Arc<dyn MediaServer>,
}

impl AppState {
    pub fn new(config: Arc<Config>, registry: Arc<AlistRegistry>) -> Result<Self, Error> {
        let server = build_media_server(&config, registry)?;
        Ok(Self { config, server })
    }
}

/// Assemble the full router: management routes, cache and filter
/// middleware, and the regex dispatcher as the fallback.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new().route("/MediaWarp/version", get(version));

    if state.config.web.enable {
        if state.config.web.custom {
            info!(dir = %state.config.web.custom_dir, "serving custom static directory");
            router = router.nest_service(
                "/MediaWarp/custom",
                ServeDir::new(&state.config.web.custom_dir),
            );
        }
        if !state.config.web.robots.is_empty() {
            router = router.route("/robots.txt", get(robots));
        }
    }

    let mut router = router.fallback(dispatch);

    if state.config.cache.enable {
        if let Some(pattern) = state.server.subtitle_cache_regex() {
            if let Some(cache) = maybe_cache(&state.config.cache, state.config.cache.subtitle_ttl)
            {
                info!(ttl = state.config.cache.subtitle_ttl, "subtitle cache middleware enabled");
                let layer = ResponseCache::new("subtitle", pattern.clone(), cache);
                router = router.layer(middleware::from_fn(move |req: Request, next: Next| {
                    let layer = layer.clone();
                    async move { layer.handle(req, next).await }
                }));
            }
        }
        if let Some(pattern) = state.server.image_cache_regex() {
            if let Some(cache) = maybe_cache(&state.config.cache, state.config.cache.image_ttl) {
                info!(ttl = state.config.cache.image_ttl, "image cache middleware enabled");
                let layer = ResponseCache::new("image", pattern.clone(), cache);
                router = router.layer(middleware::from_fn(move |req: Request, next: Next| {
                    let layer = layer.clone();
                    async move { layer.handle(req, next).await }
                }));
            }
        }
    } else {
        info!("caching disabled, no cache middleware installed");
    }

    if state.config.client_filter.enable {
        info!("client filter middleware enabled");
        let filter = ClientFilter::new(&state.config.client_filter);
        router = router.layer(middleware::from_fn(move |req: Request, next: Next| {
            let filter = filter.clone();
            async move { filter.handle(req, next).await }
        }));
    }

    router
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("same-origin"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// First-match regex dispatch in front of the reverse proxy.
///
/// The table is walked against the path only (query excluded); no match
/// means plain passthrough.
async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    for route in state.server.regex_routes() {
        if route.pattern.is_match(&path) {
            debug!(path = %path, pattern = %route.pattern, "request intercepted");
            let req = prepare_intercepted(req);
            return state.server.dispatch(route.kind, req).await;
        }
    }
    state.server.reverse_proxy(req).await
}

async fn version() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "MediaWarp",
        "version": VERSION,
    }))
}

async fn robots(State(state): State<AppState>) -> String {
    state.config.web.robots.clone()
}
