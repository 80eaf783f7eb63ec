//! User-Agent allow/deny filtering, applied before any routing.

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::info;

use mediawarp_core::config::{ClientFilterConfig, FilterMode};

#[derive(Clone)]
pub struct ClientFilter {
    mode: FilterMode,
    patterns: Vec<String>,
}

impl ClientFilter {
    pub fn new(config: &ClientFilterConfig) -> Self {
        Self {
            mode: config.mode.clone(),
            patterns: config.client_list.clone(),
        }
    }

    pub async fn handle(&self, req: Request, next: Next) -> Response {
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        if !self.is_allowed(user_agent) {
            info!(user_agent = %user_agent, "client rejected by filter");
            return StatusCode::FORBIDDEN.into_response();
        }
        next.run(req).await
    }

    fn is_allowed(&self, user_agent: &str) -> bool {
        let matched = self
            .patterns
            .iter()
            .any(|pattern| user_agent.contains(pattern.as_str()));
        match self.mode {
            FilterMode::Allow => matched,
            FilterMode::Deny => !matched,
        }
    }
}
