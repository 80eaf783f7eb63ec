//! End-to-end scenarios driven against in-process upstreams.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use mediawarp::http::{create_router, AppState};
use mediawarp_alist::AlistRegistry;
use mediawarp_core::config::{AlistUpstreamConfig, Config, MediaServerKind};

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_mediawarp(config: Config) -> SocketAddr {
    let config = Arc::new(config);
    let registry = Arc::new(AlistRegistry::new(&config.alist_strm, &config.cache));
    let state = AppState::new(config, registry).unwrap();
    spawn(create_router(state)).await
}

fn base_config(upstream: SocketAddr) -> Config {
    let mut config = Config::default();
    config.media_server.kind = MediaServerKind::Emby;
    config.media_server.addr = format!("http://{upstream}");
    config.media_server.api_key = "test-key".to_string();
    config.http_strm.final_url = false;
    config
}

/// A client that does not follow redirects, like a media player asking
/// for the first hop.
fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Mock Emby whose Items endpoint serves a fixed item.
fn mock_emby(item: Value, hits: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/emby/Items",
        get(move |Query(params): Query<std::collections::HashMap<String, String>>| {
            let item = item.clone();
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                assert_eq!(params.get("Fields").map(String::as_str), Some("Path,MediaSources"));
                Json(json!({ "Items": [item], "TotalRecordCount": 1 }))
            }
        }),
    )
}

// S1: HTTP STRM playback redirect without final-URL resolution.
#[tokio::test]
async fn test_http_strm_redirect() {
    let item = json!({
        "Id": "42",
        "Name": "Movie",
        "Path": "/media/movie.strm",
        "MediaSources": [
            {"Id": "42", "Path": "http://origin.example/vid.mp4\n", "Protocol": "Http"}
        ]
    });
    let emby = spawn(mock_emby(item, Arc::new(AtomicUsize::new(0)))).await;
    let proxy = spawn_mediawarp(base_config(emby)).await;

    let response = client()
        .get(format!("http://{proxy}/videos/42/stream?mediasourceid=42"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "http://origin.example/vid.mp4"
    );
}

// S2: final-URL follow with caching; the origin sees exactly one probe.
#[tokio::test]
async fn test_http_strm_final_url_follow_and_cache() {
    let origin_hits = Arc::new(AtomicUsize::new(0));
    let origin_hits_handler = origin_hits.clone();
    let origin = spawn(Router::new().route(
        "/vid.mp4",
        get(move || {
            let hits = origin_hits_handler.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::FOUND, [("Location", "https://cdn.example/abc")]).into_response()
            }
        }),
    ))
    .await;

    let item = json!({
        "Id": "42",
        "Path": "/media/movie.strm",
        "MediaSources": [
            {"Id": "42", "Path": format!("http://{origin}/vid.mp4\n"), "Protocol": "Http"}
        ]
    });
    let emby = spawn(mock_emby(item, Arc::new(AtomicUsize::new(0)))).await;
    let mut config = base_config(emby);
    config.http_strm.final_url = true;
    let proxy = spawn_mediawarp(config).await;

    for _ in 0..2 {
        let response = client()
            .get(format!("http://{proxy}/videos/42/stream?mediasourceid=42"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "https://cdn.example/abc"
        );
    }
    assert_eq!(origin_hits.load(Ordering::SeqCst), 1);
}

/// Canonicalization: `/videos/{id}/original.ext` redirects to the
/// canonical stream path before anything else happens.
#[tokio::test]
async fn test_video_original_path_canonicalized() {
    let emby = spawn(Router::new()).await;
    let proxy = spawn_mediawarp(base_config(emby)).await;

    let response = client()
        .get(format!("http://{proxy}/videos/42/original.mkv"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers().get("location").unwrap(), "/videos/42/stream");
}

fn mock_alist() -> Router {
    Router::new()
        .route(
            "/api/auth/login",
            post(|| async {
                Json(json!({"code": 200, "message": "success", "data": {"token": "tok"}}))
            }),
        )
        .route(
            "/api/me",
            get(|| async {
                Json(json!({
                    "code": 200, "message": "success",
                    "data": {"id": 1, "username": "admin", "base_path": "/", "permission": 511}
                }))
            }),
        )
        .route(
            "/api/fs/get",
            post(|| async {
                Json(json!({
                    "code": 200, "message": "success",
                    "data": {
                        "name": "movie.strm", "size": 5_000_000_000i64, "is_dir": false,
                        "sign": "s", "raw_url": "https://oss/x", "provider": "s3"
                    }
                }))
            }),
        )
        .route(
            "/api/fs/other",
            post(|| async {
                Json(json!({
                    "code": 200, "message": "success",
                    "data": {
                        "video_preview_play_info": {
                            "live_transcoding_task_list": [{
                                "template_width": 1920, "template_height": 1080,
                                "template_name": "FHD",
                                "url": "https://oss/trans.m3u8?x-oss-expires=1893456000"
                            }]
                        }
                    }
                }))
            }),
        )
}

// S3: Alist PlaybackInfo rewrite with a transcode variant appended.
#[tokio::test]
async fn test_alist_playback_info_rewrite() {
    let alist = spawn(mock_alist()).await;

    let item = json!({
        "Id": "1",
        "Path": "/alist/movie.strm",
        "MediaSources": [
            {"Id": "1", "Path": "/alist/movie.strm", "Protocol": "File"}
        ]
    });
    let playback_info = json!({
        "MediaSources": [
            {"Id": "1", "ItemId": "1", "Path": "/alist/movie.strm", "Protocol": "File", "Size": 120}
        ],
        "PlaySessionId": "psid"
    });
    let emby = spawn(
        mock_emby(item, Arc::new(AtomicUsize::new(0))).route(
            "/emby/Items/1/PlaybackInfo",
            post(move || {
                let body = playback_info.clone();
                async move { Json(body) }
            }),
        ),
    )
    .await;

    let mut config = base_config(emby);
    config.alist_strm.enable = true;
    config.alist_strm.list = vec![AlistUpstreamConfig {
        addr: format!("http://{alist}"),
        username: "admin".to_string(),
        password: "secret".to_string(),
        token: None,
        prefix_list: vec!["/alist".to_string()],
    }];
    let proxy = spawn_mediawarp(config).await;

    let response = client()
        .post(format!("http://{proxy}/emby/Items/1/PlaybackInfo"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body: Value = response.json().await.unwrap();

    let sources = body["MediaSources"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0]["Size"], 5_000_000_000i64);
    assert_eq!(
        sources[0]["DirectStreamUrl"],
        format!("http://{alist}?sign=s/d/alist/movie.strm")
    );
    assert_eq!(sources[0]["SupportsDirectPlay"], true);
    assert_eq!(sources[0]["SupportsTranscoding"], false);
    assert_eq!(sources[1]["Name"], "AlistStrm 直链 - 转码 FHD");
    assert_eq!(
        sources[1]["DirectStreamUrl"],
        "https://oss/trans.m3u8?x-oss-expires=1893456000"
    );
    // Untouched fields survive the rewrite in place.
    assert_eq!(body["PlaySessionId"], "psid");
}

// S4: image responses are cached with whitelisted headers only; a
// second request never reaches upstream.
#[tokio::test]
async fn test_image_cache() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_handler = hits.clone();
    let emby = spawn(Router::new().route(
        "/emby/Items/54/Images/Primary",
        get(move || {
            let hits = hits_handler.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (
                    [("Content-Type", "image/jpeg"), ("X-Upstream", "yes")],
                    vec![0xffu8; 10 * 1024],
                )
                    .into_response()
            }
        }),
    ))
    .await;
    let proxy = spawn_mediawarp(base_config(emby)).await;

    let first = client()
        .get(format!("http://{proxy}/emby/Items/54/Images/Primary?tag=abc"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-upstream").unwrap(), "yes");
    assert_eq!(first.bytes().await.unwrap().len(), 10 * 1024);

    // Different tag, same cache key: served from cache.
    let second = client()
        .get(format!("http://{proxy}/emby/Items/54/Images/Primary?tag=xyz"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("content-type").unwrap(), "image/jpeg");
    // Only whitelisted headers are replayed from cache.
    assert!(second.headers().get("x-upstream").is_none());
    assert_eq!(second.bytes().await.unwrap().len(), 10 * 1024);

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// S5: an oversized response is never cached; repeats reach upstream.
#[tokio::test]
async fn test_oversized_response_not_cached() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_handler = hits.clone();
    let emby = spawn(Router::new().route(
        "/emby/videos/42/abc/subtitles/3/0/stream.srt",
        get(move || {
            let hits = hits_handler.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                vec![b'a'; 300 * 1024]
            }
        }),
    ))
    .await;
    let proxy = spawn_mediawarp(base_config(emby)).await;

    for _ in 0..2 {
        let response = client()
            .get(format!(
                "http://{proxy}/emby/videos/42/abc/subtitles/3/0/stream.srt"
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.bytes().await.unwrap().len(), 300 * 1024);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

// S6: upstream TCP-refused surfaces as the fixed 502 envelope.
#[tokio::test]
async fn test_upstream_down_returns_502() {
    // Grab a port, then free it so connections are refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let proxy = spawn_mediawarp(base_config(dead)).await;

    for path in ["/emby/system/info", "/emby/Items/1/PlaybackInfo"] {
        let response = client()
            .get(format!("http://{proxy}{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY, "path {path}");
        assert_eq!(
            response.text().await.unwrap(),
            r#"{"error":"无法连接到上游服务器，请稍后重试"}"#
        );
    }
}

// Invariant: unmatched routes pass through byte-identical with the
// upstream headers preserved.
#[tokio::test]
async fn test_passthrough_preserves_body_and_headers() {
    let emby = spawn(Router::new().route(
        "/emby/Sessions",
        get(|| async {
            (
                [("Content-Type", "application/json"), ("X-Emby-Custom", "kept")],
                r#"{"sessions":[]}"#,
            )
        }),
    ))
    .await;
    let proxy = spawn_mediawarp(base_config(emby)).await;

    let response = client()
        .get(format!("http://{proxy}/emby/Sessions"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-emby-custom").unwrap(), "kept");
    assert_eq!(response.text().await.unwrap(), r#"{"sessions":[]}"#);
}

// Invariant: a rewriter receiving a non-JSON body forwards it unchanged.
#[tokio::test]
async fn test_rewriter_forwards_invalid_json_unmodified() {
    let emby = spawn(Router::new().route(
        "/emby/Items/1/PlaybackInfo",
        post(|| async { "this is not json" }),
    ))
    .await;
    let proxy = spawn_mediawarp(base_config(emby)).await;

    let response = client()
        .post(format!("http://{proxy}/emby/Items/1/PlaybackInfo"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "this is not json");
}

// Management endpoint: version report.
#[tokio::test]
async fn test_version_endpoint() {
    let emby = spawn(Router::new()).await;
    let proxy = spawn_mediawarp(base_config(emby)).await;

    let response = client()
        .get(format!("http://{proxy}/MediaWarp/version"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "MediaWarp");
    assert!(body["version"].as_str().is_some());
}

// FNTV: the stream envelope is rewritten in place for HTTP STRMs.
#[tokio::test]
async fn test_fntv_stream_rewrite_http_strm() {
    let fntv = spawn(Router::new().route(
        "/v/api/v1/stream/list",
        post(|| async {
            Json(json!({
                "code": 0,
                "msg": "ok",
                "data": {
                    "file_stream": {"path": "http://origin.example/vid.mp4", "size": 120},
                    "direct_link_qualities": [
                        {"resolution": "原画", "url": "http://origin.example/vid.mp4"}
                    ]
                }
            }))
        }),
    ))
    .await;

    let mut config = base_config(fntv);
    config.media_server.kind = MediaServerKind::Fntv;
    let proxy = spawn_mediawarp(config).await;

    let response = client()
        .post(format!("http://{proxy}/v/api/v1/stream/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["data"]["direct_link_qualities"][0]["resolution"],
        "HTTPStrm 直链"
    );
    assert_eq!(
        body["data"]["direct_link_qualities"][0]["url"],
        "http://origin.example/vid.mp4"
    );
    assert_eq!(body["code"], 0);
}

// FNTV: error envelopes are forwarded untouched.
#[tokio::test]
async fn test_fntv_error_envelope_untouched() {
    let fntv = spawn(Router::new().route(
        "/v/api/v1/stream/list",
        post(|| async { Json(json!({"code": 5001, "msg": "not found", "data": null})) }),
    ))
    .await;

    let mut config = base_config(fntv);
    config.media_server.kind = MediaServerKind::Fntv;
    let proxy = spawn_mediawarp(config).await;

    let response = client()
        .post(format!("http://{proxy}/v/api/v1/stream/list"))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 5001);
    assert_eq!(body["msg"], "not found");
}

// HEAD video requests pass straight through to upstream.
#[tokio::test]
async fn test_videos_head_passthrough() {
    let emby = spawn(Router::new().route(
        "/videos/42/stream",
        get(|| async { "bytes" }).head(|| async { StatusCode::OK }),
    ))
    .await;
    let proxy = spawn_mediawarp(base_config(emby)).await;

    let response = client()
        .head(format!("http://{proxy}/videos/42/stream?mediasourceid=42"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// Local (non-STRM) items stream through the proxy, not a redirect.
#[tokio::test]
async fn test_local_video_passthrough() {
    let item = json!({
        "Id": "7",
        "Path": "/media/local.mkv",
        "MediaSources": [{"Id": "7", "Path": "/media/local.mkv", "Protocol": "File"}]
    });
    let emby = spawn(
        mock_emby(item, Arc::new(AtomicUsize::new(0))).route(
            "/videos/7/stream",
            get(|headers: HeaderMap| async move {
                // Compression was disabled for the intercepted request.
                assert_eq!(
                    headers.get("accept-encoding").map(|v| v.as_bytes()),
                    Some(b"identity".as_ref())
                );
                "video-bytes"
            }),
        ),
    )
    .await;
    let proxy = spawn_mediawarp(base_config(emby)).await;

    let response = client()
        .get(format!("http://{proxy}/videos/7/stream?MediaSourceId=7"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "video-bytes");
}
