use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

use mediawarp_alist::{AlistError, AlistRegistry};
use mediawarp_core::config::Config;

/// A resolved Alist STRM: the direct URL plus optional pre-rendered
/// transcode variants.
#[derive(Debug, Clone)]
pub struct ResolvedStrm {
    pub url: String,
    pub file_size: i64,
    pub variants: Vec<TranscodeVariant>,
}

#[derive(Debug, Clone)]
pub struct TranscodeVariant {
    pub url: String,
    pub is_m3u8: bool,
    /// Taken from the `x-oss-expires` query parameter of the signed URL.
    pub expires_at: DateTime<Utc>,
    pub resolution: Resolution,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
    pub name: String,
}

/// Resolves Alist STRM payloads via the endpoint registry.
pub struct AlistResolver {
    registry: Arc<AlistRegistry>,
    raw_url: bool,
}

impl AlistResolver {
    pub fn new(config: &Config, registry: Arc<AlistRegistry>) -> Self {
        Self {
            registry,
            raw_url: config.alist_strm.raw_url,
        }
    }

    /// Resolve a remote path on an Alist endpoint to a playable URL.
    ///
    /// Transcode variants are only fetched when asked for, and a preview
    /// failure is non-fatal: the basic result is still returned.
    pub async fn resolve(
        &self,
        path: &str,
        endpoint: &str,
        want_variants: bool,
    ) -> Result<ResolvedStrm, AlistError> {
        let client = self.registry.get(endpoint).await?;
        let file = client.fs_get(path, 1).await?;

        let url = if self.raw_url {
            file.raw_url
        } else {
            client.signed_file_url(path, &file.sign)
        };
        info!(url = %url, "Alist STRM resolved");

        let mut resolved = ResolvedStrm {
            url,
            file_size: file.size,
            variants: Vec::new(),
        };

        if want_variants {
            match client.video_preview(path, "").await {
                Ok(preview) => {
                    let tasks = preview
                        .video_preview_play_info
                        .map(|info| info.live_transcoding_task_list)
                        .unwrap_or_default();
                    for task in tasks {
                        if task.url.is_empty() {
                            continue;
                        }
                        match parse_variant(&task) {
                            Some(variant) => resolved.variants.push(variant),
                            None => {
                                warn!(url = %task.url, "transcode variant skipped: missing or invalid x-oss-expires");
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(path = %path, error = %err, "video preview unavailable, returning direct URL only");
                }
            }
        }

        Ok(resolved)
    }
}

fn parse_variant(task: &mediawarp_alist::types::TranscodingTask) -> Option<TranscodeVariant> {
    let url = url::Url::parse(&task.url).ok()?;
    let expires: i64 = url
        .query_pairs()
        .find(|(key, _)| key == "x-oss-expires")?
        .1
        .parse()
        .ok()?;
    let expires_at = Utc.timestamp_opt(expires, 0).single()?;
    Some(TranscodeVariant {
        url: task.url.clone(),
        is_m3u8: url.path().ends_with(".m3u8"),
        expires_at,
        resolution: Resolution {
            width: task.template_width,
            height: task.template_height,
            name: task.template_name.clone(),
        },
    })
}
