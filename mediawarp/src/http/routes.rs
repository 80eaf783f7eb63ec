//! Ordered regex route tables, one per media-server family.
//!
//! Built at startup and read-only afterwards; the dispatcher walks the
//! table in order and the first match wins.

use regex::Regex;

use mediawarp_core::config::Config;

/// What an intercepted route does; dispatch happens on the concrete
/// media-server handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Video byte requests, candidate for a 302 redirect.
    Videos,
    /// Emby / Jellyfin PlaybackInfo manifest rewrite.
    PlaybackInfo,
    /// `basehtmlplayer.js` CORS patch.
    BaseHtmlPlayer,
    /// `index.html` head injection.
    Index,
    /// SRT → ASS subtitle conversion.
    Subtitles,
    /// FNTV stream envelope rewrite.
    Stream,
}

pub struct RegexRoute {
    pub pattern: Regex,
    pub kind: RouteKind,
}

fn route(pattern: &str, kind: RouteKind) -> RegexRoute {
    RegexRoute {
        pattern: Regex::new(pattern).expect("invalid route regex"),
        kind,
    }
}

pub fn emby_routes(config: &Config) -> Vec<RegexRoute> {
    let mut routes = vec![
        route(r"(?i)^(/emby)?/videos/[^/]+/(stream|original)(\.\w+)?$", RouteKind::Videos),
        route(r"(?i)^(/emby)?/items/[^/]+/playbackinfo$", RouteKind::PlaybackInfo),
        route(
            r"(?i)^(/emby)?/web/modules/htmlvideoplayer/basehtmlplayer\.js$",
            RouteKind::BaseHtmlPlayer,
        ),
    ];
    if config.web.wants_index_rewrite() {
        routes.push(route(r"(?i)^(/web)?/index\.html$|^/web/?$|^/$", RouteKind::Index));
    }
    if config.subtitle.enable && config.subtitle.srt2ass {
        routes.push(route(
            r"(?i)^(/emby)?/videos/[^/]+/[^/]+/subtitles/.*$",
            RouteKind::Subtitles,
        ));
    }
    routes
}

pub fn jellyfin_routes(config: &Config) -> Vec<RegexRoute> {
    let mut routes = vec![
        route(r"(?i)^/items/[^/]+/playbackinfo$", RouteKind::PlaybackInfo),
        route(r"(?i)^/videos/[^/]+/(stream|original)(\.\w+)?$", RouteKind::Videos),
    ];
    if config.web.wants_index_rewrite() {
        routes.push(route(r"(?i)^(/web)?/index\.html$|^/web/?$|^/$", RouteKind::Index));
    }
    routes
}

pub fn fntv_routes(_config: &Config) -> Vec<RegexRoute> {
    vec![route(r"(?i)^/v/api/v1/stream", RouteKind::Stream)]
}

pub fn emby_image_cache_regex() -> Regex {
    Regex::new(r"(?i)^(/emby)?/items/[^/]+/images/").expect("invalid cache regex")
}

pub fn emby_subtitle_cache_regex() -> Regex {
    Regex::new(r"(?i)^(/emby)?/videos/[^/]+/[^/]+/subtitles/").expect("invalid cache regex")
}

pub fn jellyfin_image_cache_regex() -> Regex {
    Regex::new(r"(?i)^/items/[^/]+/images/").expect("invalid cache regex")
}

pub fn jellyfin_subtitle_cache_regex() -> Regex {
    Regex::new(r"(?i)^/videos/[^/]+/[^/]+/subtitles/").expect("invalid cache regex")
}

pub fn fntv_image_cache_regex() -> Regex {
    Regex::new(r"(?i)^/v/api/v1/img/").expect("invalid cache regex")
}

pub fn fntv_subtitle_cache_regex() -> Regex {
    Regex::new(r"(?i)^/v/api/v1/subtitle/").expect("invalid cache regex")
}

/// `/videos/{id}/original.ext` → canonical `/videos/{id}/stream`.
pub fn video_canonical_regex() -> Regex {
    Regex::new(r"(?i)^(?:/emby)?/videos/([^/]+)/original\.\w+$").expect("invalid canonical regex")
}
