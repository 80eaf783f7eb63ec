use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use mediawarp_core::cache::BoundedCache;
use mediawarp_core::config::{trim_endpoint, AlistUpstreamConfig};
use mediawarp_core::http_client;

use crate::error::{check_response, AlistError};
use crate::types::{AlistResponse, FileData, LoginData, UserInfo, VideoPreviewData};

/// Refresh margin: tokens live 2 days and are renewed 5 minutes early.
fn token_lifetime() -> chrono::Duration {
    chrono::Duration::days(2) - chrono::Duration::minutes(5)
}

#[derive(Debug, Default)]
struct Token {
    value: String,
    /// `None` means no known expiry; the value is trusted until a
    /// request fails.
    expires_at: Option<DateTime<Utc>>,
}

impl Token {
    fn is_valid(&self) -> bool {
        !self.value.is_empty() && self.expires_at.is_none_or(|at| Utc::now() < at)
    }
}

/// Authenticated client for one Alist server.
///
/// Created once per endpoint and shared; the token is refreshed lazily
/// behind a read/write lock, and cacheable responses go through an
/// optional per-client response cache.
#[derive(Debug)]
pub struct AlistClient {
    endpoint: String,
    username: String,
    password: String,
    user_info: UserInfo,
    token: RwLock<Token>,
    http: reqwest::Client,
    cache: Option<BoundedCache>,
}

struct ApiRequest<'a> {
    method: Method,
    path: &'a str,
    body: Option<Value>,
    need_auth: bool,
    /// Empty (`None`) for non-cacheable operations such as login.
    cache_key: Option<String>,
}

impl AlistClient {
    /// Connect to an Alist server and fetch the current user.
    ///
    /// A failure to fetch `/api/me` is fatal for the client; `base_path`
    /// is immutable afterwards.
    pub async fn connect(
        upstream: &AlistUpstreamConfig,
        cache: Option<BoundedCache>,
    ) -> Result<Self, AlistError> {
        let mut client = Self {
            endpoint: trim_endpoint(&upstream.addr),
            username: upstream.username.clone(),
            password: upstream.password.clone(),
            user_info: UserInfo::default(),
            token: RwLock::new(Token {
                value: upstream.token.clone().unwrap_or_default(),
                expires_at: None,
            }),
            http: http_client::client(),
            cache,
        };

        client.user_info = client.me().await?;
        debug!(
            endpoint = %client.endpoint,
            base_path = %client.user_info.base_path,
            "connected to Alist server"
        );
        Ok(client)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn user_info(&self) -> &UserInfo {
        &self.user_info
    }

    /// Current user information (`/api/me`).
    pub async fn me(&self) -> Result<UserInfo, AlistError> {
        self.request(ApiRequest {
            method: Method::GET,
            path: "/api/me",
            body: None,
            need_auth: true,
            cache_key: Some("me".to_string()),
        })
        .await
    }

    /// File or directory metadata (`/api/fs/get`).
    pub async fn fs_get(&self, path: &str, page: u64) -> Result<FileData, AlistError> {
        self.request(ApiRequest {
            method: Method::POST,
            path: "/api/fs/get",
            body: Some(json!({ "path": path, "password": "", "page": page })),
            need_auth: true,
            cache_key: Some(format!("fs_get:{page}:{path}")),
        })
        .await
    }

    /// Video preview data (`/api/fs/other`, method `video_preview`).
    pub async fn video_preview(
        &self,
        path: &str,
        password: &str,
    ) -> Result<VideoPreviewData, AlistError> {
        self.request(ApiRequest {
            method: Method::POST,
            path: "/api/fs/other",
            body: Some(json!({
                "path": path,
                "method": "video_preview",
                "password": password,
            })),
            need_auth: true,
            cache_key: Some(format!("video_preview:{path}")),
        })
        .await
    }

    /// Resolve a file path to an accessible URL.
    ///
    /// With `raw` the storage raw URL is returned; otherwise the signed
    /// `/d/...` download URL under the user's base path is assembled.
    pub async fn file_url(&self, path: &str, raw: bool) -> Result<String, AlistError> {
        let file = self.fs_get(path, 1).await?;
        if raw {
            return Ok(file.raw_url);
        }
        Ok(self.signed_file_url(path, &file.sign))
    }

    /// Assemble the signed download URL for an already-fetched file.
    pub fn signed_file_url(&self, path: &str, sign: &str) -> String {
        assemble_download_url(&self.endpoint, sign, &self.user_info.base_path, path)
    }

    /// Get a usable token, refreshing it when missing or about to expire.
    ///
    /// Double-checked: the read guard covers the fast path; the write
    /// guard re-verifies before logging in so concurrent misses produce
    /// one refresh.
    async fn token(&self) -> Result<String, AlistError> {
        {
            let token = self.token.read().await;
            if token.is_valid() {
                return Ok(token.value.clone());
            }
        }

        let mut token = self.token.write().await;
        if token.is_valid() {
            return Ok(token.value.clone());
        }

        let login = Box::pin(self.auth_login()).await?;
        token.value = login.token.clone();
        token.expires_at = Some(Utc::now() + token_lifetime());
        Ok(login.token)
    }

    /// Log in and obtain a fresh token. Never cached.
    async fn auth_login(&self) -> Result<LoginData, AlistError> {
        self.request(ApiRequest {
            method: Method::POST,
            path: "/api/auth/login",
            body: Some(json!({
                "username": self.username,
                "password": self.password,
            })),
            need_auth: false,
            cache_key: None,
        })
        .await
        .map_err(|e| AlistError::Auth(e.to_string()))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        req: ApiRequest<'_>,
    ) -> Result<T, AlistError> {
        if let (Some(key), Some(cache)) = (&req.cache_key, &self.cache) {
            if let Some(data) = cache.get(key).await {
                if let Ok(resp) = serde_json::from_slice::<AlistResponse<T>>(&data) {
                    if let Some(data) = resp.data {
                        debug!(key = %key, "Alist API cache hit");
                        return Ok(data);
                    }
                }
            }
        }

        let url = format!("{}{}", self.endpoint, req.path);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if req.need_auth {
            let token = self.token().await?;
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&token)
                    .map_err(|e| AlistError::Parse(format!("invalid token: {e}")))?,
            );
        }

        let mut builder = self.http.request(req.method, &url).headers(headers);
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let response = check_response(builder.send().await?)?;
        let raw = response.bytes().await?;

        let resp: AlistResponse<T> = serde_json::from_slice(&raw)?;
        if resp.code != 200 {
            return Err(AlistError::Api {
                code: resp.code,
                message: resp.message,
            });
        }
        let data = resp
            .data
            .ok_or_else(|| AlistError::Parse(format!("missing data in {} response", req.path)))?;

        if let (Some(key), Some(cache)) = (&req.cache_key, &self.cache) {
            if let Err(err) = cache.insert(key.clone(), Bytes::from(raw)).await {
                warn!(key = %key, error = %err, "skipping Alist API response cache");
            }
        }

        Ok(data)
    }
}

/// `endpoint + ("?sign=" + sign)? + /d + base_path + path`.
fn assemble_download_url(endpoint: &str, sign: &str, base_path: &str, path: &str) -> String {
    let mut url = String::from(endpoint);
    if !sign.is_empty() {
        url.push_str("?sign=");
        url.push_str(sign);
    }
    url.push_str(&join_path(&["/d", base_path, path]));
    url
}

fn join_path(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        let trimmed = part.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(trimmed);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use mediawarp_core::cache::maybe_cache;
    use mediawarp_core::config::CacheConfig;

    #[test]
    fn test_token_validity() {
        let empty = Token::default();
        assert!(!empty.is_valid());

        let no_expiry = Token {
            value: "tok".to_string(),
            expires_at: None,
        };
        assert!(no_expiry.is_valid());

        let expired = Token {
            value: "tok".to_string(),
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
        };
        assert!(!expired.is_valid());

        let live = Token {
            value: "tok".to_string(),
            expires_at: Some(Utc::now() + token_lifetime()),
        };
        assert!(live.is_valid());
    }

    #[test]
    fn test_assemble_download_url() {
        assert_eq!(
            assemble_download_url("http://alist:5244", "s1g", "/", "/alist/movie.strm"),
            "http://alist:5244?sign=s1g/d/alist/movie.strm"
        );
        assert_eq!(
            assemble_download_url("http://alist:5244", "", "/media", "/movie.mkv"),
            "http://alist:5244/d/media/movie.mkv"
        );
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(&["/d", "/", "/a/b.mkv"]), "/d/a/b.mkv");
        assert_eq!(join_path(&["/d", "/base/", "x"]), "/d/base/x");
        assert_eq!(join_path(&["", "", ""]), "/");
    }

    #[derive(Clone)]
    struct MockState {
        logins: Arc<AtomicUsize>,
        fs_gets: Arc<AtomicUsize>,
    }

    fn mock_alist(state: MockState) -> Router {
        Router::new()
            .route(
                "/api/auth/login",
                post(|State(s): State<MockState>| async move {
                    s.logins.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({
                        "code": 200, "message": "success",
                        "data": { "token": "tok-1" }
                    }))
                }),
            )
            .route(
                "/api/me",
                get(|headers: axum::http::HeaderMap| async move {
                    if headers.get("authorization").map(|v| v.as_bytes()) != Some(b"tok-1") {
                        return Json(serde_json::json!({
                            "code": 401, "message": "unauthorized", "data": null
                        }));
                    }
                    Json(serde_json::json!({
                        "code": 200, "message": "success",
                        "data": { "id": 1, "username": "admin", "base_path": "/", "permission": 511 }
                    }))
                }),
            )
            .route(
                "/api/fs/get",
                post(|State(s): State<MockState>| async move {
                    s.fs_gets.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({
                        "code": 200, "message": "success",
                        "data": {
                            "name": "movie.mkv", "size": 5_000_000_000i64,
                            "is_dir": false, "sign": "s1g",
                            "raw_url": "https://oss/x", "provider": "s3"
                        }
                    }))
                }),
            )
            .with_state(state)
    }

    async fn spawn_mock(state: MockState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, mock_alist(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn upstream(addr: &str) -> AlistUpstreamConfig {
        AlistUpstreamConfig {
            addr: addr.to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            token: None,
            prefix_list: vec!["/alist".to_string()],
        }
    }

    #[tokio::test]
    async fn test_connect_logs_in_and_fetches_me() {
        let state = MockState {
            logins: Arc::new(AtomicUsize::new(0)),
            fs_gets: Arc::new(AtomicUsize::new(0)),
        };
        let addr = spawn_mock(state.clone()).await;

        let client = AlistClient::connect(&upstream(&addr), None).await.unwrap();
        assert_eq!(client.user_info().base_path, "/");
        assert_eq!(state.logins.load(Ordering::SeqCst), 1);

        // Token is installed; further authed calls must not log in again.
        client.fs_get("/alist/movie.strm", 1).await.unwrap();
        assert_eq!(state.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fs_get_response_cache() {
        let state = MockState {
            logins: Arc::new(AtomicUsize::new(0)),
            fs_gets: Arc::new(AtomicUsize::new(0)),
        };
        let addr = spawn_mock(state.clone()).await;

        let cache = maybe_cache(&CacheConfig::default(), 600);
        let client = AlistClient::connect(&upstream(&addr), cache).await.unwrap();

        let first = client.fs_get("/alist/movie.strm", 1).await.unwrap();
        let second = client.fs_get("/alist/movie.strm", 1).await.unwrap();
        assert_eq!(first.raw_url, second.raw_url);
        assert_eq!(state.fs_gets.load(Ordering::SeqCst), 1);

        // A different path is a different cache key.
        client.fs_get("/alist/other.strm", 1).await.unwrap();
        assert_eq!(state.fs_gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_file_url_signed_vs_raw() {
        let state = MockState {
            logins: Arc::new(AtomicUsize::new(0)),
            fs_gets: Arc::new(AtomicUsize::new(0)),
        };
        let addr = spawn_mock(state.clone()).await;
        let client = AlistClient::connect(&upstream(&addr), None).await.unwrap();

        assert_eq!(client.file_url("/alist/m.mkv", true).await.unwrap(), "https://oss/x");
        assert_eq!(
            client.file_url("/alist/m.mkv", false).await.unwrap(),
            format!("{addr}?sign=s1g/d/alist/m.mkv")
        );
    }
}
