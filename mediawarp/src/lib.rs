//! MediaWarp: a reverse proxy in front of Emby / Jellyfin / FNTV that
//! rewrites playback manifests so STRM placeholder files resolve to real
//! streaming URLs, 302-redirects video byte requests, and caches
//! bandwidth-heavy responses.

pub mod http;
pub mod strm;
