//! Alist JSON API response types.

use serde::Deserialize;

/// Generic Alist API response envelope.
///
/// A `code` other than 200 is an application-level error even when the
/// HTTP status is 200.
#[derive(Debug, Deserialize)]
pub struct AlistResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub token: String,
}

/// Current user, fetched once at client creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub permission: u64,
}

/// File or directory metadata from `/api/fs/get`.
#[derive(Debug, Clone, Deserialize)]
pub struct FileData {
    pub name: String,
    pub size: i64,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub sign: String,
    #[serde(default)]
    pub raw_url: String,
    #[serde(default)]
    pub provider: String,
}

/// `/api/fs/other` with method `video_preview`.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoPreviewData {
    pub video_preview_play_info: Option<VideoPreviewPlayInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoPreviewPlayInfo {
    #[serde(default)]
    pub live_transcoding_task_list: Vec<TranscodingTask>,
    pub meta: Option<VideoMeta>,
}

/// One pre-rendered variant addressed by a signed OSS URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscodingTask {
    #[serde(default)]
    pub template_width: u64,
    #[serde(default)]
    pub template_height: u64,
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoMeta {
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub width: u64,
    #[serde(default)]
    pub height: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_with_data() {
        let json = r#"{"code":200,"message":"success","data":{"token":"abc"}}"#;
        let resp: AlistResponse<LoginData> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.code, 200);
        assert_eq!(resp.data.unwrap().token, "abc");
    }

    #[test]
    fn test_envelope_error_without_data() {
        let json = r#"{"code":401,"message":"unauthorized","data":null}"#;
        let resp: AlistResponse<LoginData> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.code, 401);
        assert!(resp.data.is_none());
    }

    #[test]
    fn test_file_data_defaults() {
        let json = r#"{"name":"movie.mkv","size":5000000000}"#;
        let file: FileData = serde_json::from_str(json).unwrap();
        assert_eq!(file.size, 5_000_000_000);
        assert!(!file.is_dir);
        assert!(file.raw_url.is_empty());
        assert!(file.sign.is_empty());
    }

    #[test]
    fn test_video_preview_deserialize() {
        let json = r#"{
            "video_preview_play_info": {
                "live_transcoding_task_list": [
                    {"template_width":1920,"template_height":1080,"template_name":"FHD","url":"https://oss/x.m3u8?x-oss-expires=1893456000"}
                ],
                "meta": {"duration": 5400.5, "width": 3840, "height": 2160}
            }
        }"#;
        let preview: VideoPreviewData = serde_json::from_str(json).unwrap();
        let info = preview.video_preview_play_info.unwrap();
        assert_eq!(info.live_transcoding_task_list.len(), 1);
        assert_eq!(info.live_transcoding_task_list[0].template_name, "FHD");
        assert_eq!(info.meta.unwrap().width, 3840);
    }

    #[test]
    fn test_user_info_base_path() {
        let json = r#"{"id":1,"username":"admin","base_path":"/media","permission":511}"#;
        let me: UserInfo = serde_json::from_str(json).unwrap();
        assert_eq!(me.base_path, "/media");
    }
}
