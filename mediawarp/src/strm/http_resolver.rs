use std::time::Duration;

use bytes::Bytes;
use reqwest::header::USER_AGENT;
use tracing::{debug, info, warn};

use mediawarp_core::cache::{maybe_cache, BoundedCache};
use mediawarp_core::config::Config;

/// How long a single redirect probe may take end to end.
const REDIRECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves an HTTP STRM payload to its terminal URL.
///
/// With `http_strm.final_url` off this is the identity function. On, a
/// single GET with redirects disabled reads the `Location` header; the
/// result is cached. Resolution never fails the caller: any error falls
/// back to the input URL.
pub struct HttpResolver {
    final_url: bool,
    cache: Option<BoundedCache>,
    client: reqwest::Client,
}

impl HttpResolver {
    pub fn new(config: &Config) -> Self {
        let final_url = config.http_strm.final_url;
        let cache = if final_url {
            maybe_cache(&config.cache, config.cache.http_strm_ttl)
        } else {
            None
        };
        // Redirects stay manual so the Location target can be handed to
        // the client instead of being followed here.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(REDIRECT_TIMEOUT)
            .build()
            .expect("failed to build redirect probe client");
        Self {
            final_url,
            cache,
            client,
        }
    }

    pub async fn resolve(&self, content: &str, user_agent: &str) -> String {
        if !self.final_url {
            debug!(url = %content, "final URL resolution disabled, using STRM URL as-is");
            return content.to_string();
        }

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(content).await {
                let url = String::from_utf8_lossy(&cached).into_owned();
                info!(url = %url, "HTTP STRM resolved from cache");
                return url;
            }
        }

        let resolved = match self.probe(content, user_agent).await {
            Ok(url) => {
                info!(from = %content, to = %url, "HTTP STRM resolved");
                url
            }
            Err(err) => {
                warn!(url = %content, error = %err, "failed to resolve final URL, using STRM URL as-is");
                return content.to_string();
            }
        };

        if let Some(cache) = &self.cache {
            if let Err(err) = cache
                .insert(content.to_string(), Bytes::from(resolved.clone()))
                .await
            {
                warn!(url = %content, error = %err, "skipping HTTP STRM URL cache");
            }
        }

        resolved
    }

    /// One GET hop: a 3xx yields its `Location`, anything else yields the
    /// URL the request ended on.
    async fn probe(&self, url: &str, user_agent: &str) -> Result<String, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await?;

        if response.status().is_redirection() {
            if let Some(location) = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
            {
                return Ok(location.to_string());
            }
        }
        Ok(response.url().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(final_url: bool) -> Config {
        let mut config = Config::default();
        config.http_strm.final_url = final_url;
        config
    }

    #[tokio::test]
    async fn test_disabled_returns_input() {
        let resolver = HttpResolver::new(&config(false));
        let url = resolver.resolve("http://origin.example/vid.mp4", "ua").await;
        assert_eq!(url, "http://origin.example/vid.mp4");
    }

    #[tokio::test]
    async fn test_unreachable_origin_falls_back_to_input() {
        // Nothing listens on this port; resolution must not fail.
        let resolver = HttpResolver::new(&config(true));
        let url = resolver.resolve("http://127.0.0.1:1/vid.mp4", "ua").await;
        assert_eq!(url, "http://127.0.0.1:1/vid.mp4");
    }

    #[tokio::test]
    async fn test_redirect_followed_once_and_cached() {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;
        use axum::routing::get;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = hits.clone();
        let app = axum::Router::new().route(
            "/vid.mp4",
            get(move || {
                let hits = hits_handler.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::FOUND,
                        [("Location", "https://cdn.example/abc")],
                    )
                        .into_response()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let resolver = HttpResolver::new(&config(true));
        let origin = format!("http://{addr}/vid.mp4");

        assert_eq!(resolver.resolve(&origin, "ua").await, "https://cdn.example/abc");
        assert_eq!(resolver.resolve(&origin, "ua").await, "https://cdn.example/abc");
        // Second resolution came from cache.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
