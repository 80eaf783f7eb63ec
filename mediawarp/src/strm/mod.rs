//! STRM recognition and resolution.
//!
//! A STRM placeholder carries either an HTTP(S) URL or a path inside an
//! Alist-mounted storage. The recognizer classifies the payload string;
//! the resolvers turn it into a final playable URL.

mod alist_resolver;
mod http_resolver;

pub use alist_resolver::{AlistResolver, ResolvedStrm, Resolution, TranscodeVariant};
pub use http_resolver::HttpResolver;

use mediawarp_core::config::{trim_endpoint, Config};

/// Classification of a STRM payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrmKind {
    /// An HTTP(S) URL, playable after optionally following redirects.
    Http { url: String },
    /// A path inside an Alist mount, resolved via the Alist API.
    Alist { endpoint: String, path: String },
    Unknown,
}

/// Recognizes STRM payloads against the configured mounts.
///
/// Built once at startup; read-only afterwards.
pub struct StrmRecognizer {
    http_enabled: bool,
    alist_enabled: bool,
    /// (library prefix, alist endpoint) pairs, checked in order.
    mounts: Vec<(String, String)>,
}

impl StrmRecognizer {
    pub fn new(config: &Config) -> Self {
        let mounts = config
            .alist_strm
            .list
            .iter()
            .flat_map(|upstream| {
                let endpoint = trim_endpoint(&upstream.addr);
                upstream
                    .prefix_list
                    .iter()
                    .map(move |prefix| (prefix.clone(), endpoint.clone()))
            })
            .collect();
        Self {
            http_enabled: config.http_strm.enable,
            alist_enabled: config.alist_strm.enable,
            mounts,
        }
    }

    /// Classify a STRM payload string.
    ///
    /// The payload is trimmed first: media servers keep the trailing
    /// newline of the placeholder file.
    pub fn recognize(&self, content: &str) -> StrmKind {
        let content = content.trim();
        if content.is_empty() {
            return StrmKind::Unknown;
        }

        if self.http_enabled {
            let lower = content.to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                return StrmKind::Http {
                    url: content.to_string(),
                };
            }
        }

        if self.alist_enabled {
            for (prefix, endpoint) in &self.mounts {
                if content.starts_with(prefix.as_str()) {
                    return StrmKind::Alist {
                        endpoint: endpoint.clone(),
                        path: content.to_string(),
                    };
                }
            }
        }

        StrmKind::Unknown
    }
}
