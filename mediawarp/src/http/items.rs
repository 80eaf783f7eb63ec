//! Typed Items queries against the upstream media server.
//!
//! Rewriters and the videos handler need the real library path and media
//! sources of an item; both come from the `Items` endpoint with
//! `Fields=Path,MediaSources`.

use serde::{Deserialize, Serialize};

use mediawarp_core::config::{trim_endpoint, MediaServerKind};
use mediawarp_core::http_client;

/// Emby sends its API key as a query parameter, Jellyfin as a header.
pub struct MediaServerApi {
    endpoint: String,
    api_key: String,
    kind: MediaServerKind,
    http: reqwest::Client,
}

impl MediaServerApi {
    pub fn new(kind: MediaServerKind, addr: &str, api_key: &str) -> Self {
        Self {
            endpoint: trim_endpoint(addr),
            api_key: api_key.to_string(),
            kind,
            http: http_client::client(),
        }
    }

    /// Query one item by id with the given `Fields` selection.
    pub async fn query_item(&self, id: &str, fields: &str) -> Result<ItemsResponse, reqwest::Error> {
        let path = match self.kind {
            MediaServerKind::Emby => "/emby/Items",
            _ => "/Items",
        };
        let url = format!("{}{}", self.endpoint, path);

        let mut request = self
            .http
            .get(&url)
            .query(&[("Ids", id), ("Fields", fields), ("Limit", "1"), ("Recursive", "true")]);
        request = match self.kind {
            MediaServerKind::Emby => request.query(&[("api_key", self.api_key.as_str())]),
            _ => request.header("X-Emby-Token", self.api_key.as_str()),
        };

        request
            .send()
            .await?
            .error_for_status()?
            .json::<ItemsResponse>()
            .await
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ItemsResponse {
    pub items: Vec<Item>,
    pub total_record_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub path: Option<String>,
    pub media_sources: Vec<MediaSource>,
}

/// One playable variant of an item inside PlaybackInfo / Items.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaSource {
    pub id: Option<String>,
    pub item_id: Option<String>,
    pub path: Option<String>,
    pub protocol: Option<String>,
    pub container: Option<String>,
    pub size: Option<i64>,
    pub direct_stream_url: Option<String>,
    pub supports_direct_play: Option<bool>,
    pub supports_direct_stream: Option<bool>,
    pub supports_transcoding: Option<bool>,
    pub is_remote: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlaybackInfoResponse {
    pub media_sources: Vec<MediaSource>,
    pub play_session_id: Option<String>,
}

/// EmbyServer ≥ 4.9 prefixes media-source ids; Items queries and
/// comparisons want the bare id.
pub fn strip_mediasource_prefix(id: &str) -> &str {
    id.strip_prefix("mediasource_").unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_info_deserialize() {
        let json = r#"{
            "MediaSources": [
                {
                    "Id": "mediasource_31",
                    "ItemId": "31",
                    "Path": "/media/movie.strm",
                    "Protocol": "File",
                    "Container": "strm",
                    "Size": 120,
                    "SupportsDirectPlay": false
                }
            ],
            "PlaySessionId": "abc"
        }"#;
        let info: PlaybackInfoResponse = serde_json::from_str(json).unwrap();
        assert_eq!(info.media_sources.len(), 1);
        let source = &info.media_sources[0];
        assert_eq!(source.id.as_deref(), Some("mediasource_31"));
        assert_eq!(source.protocol.as_deref(), Some("File"));
        assert_eq!(source.supports_direct_play, Some(false));
        assert_eq!(info.play_session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_items_response_deserialize() {
        let json = r#"{
            "Items": [
                {"Id": "42", "Name": "Movie", "Path": "http://origin.example/vid.mp4\n",
                 "MediaSources": [{"Id": "42", "Path": "http://origin.example/vid.mp4", "Protocol": "Http"}]}
            ],
            "TotalRecordCount": 1
        }"#;
        let items: ItemsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(items.total_record_count, 1);
        assert_eq!(
            items.items[0].media_sources[0].protocol.as_deref(),
            Some("Http")
        );
    }

    #[test]
    fn test_strip_mediasource_prefix() {
        assert_eq!(strip_mediasource_prefix("mediasource_31"), "31");
        assert_eq!(strip_mediasource_prefix("343121"), "343121");
    }
}
