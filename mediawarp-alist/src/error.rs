use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlistError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP error {status} for {url}")]
    Http {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("API error (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no Alist upstream configured for endpoint {0}")]
    UnknownEndpoint(String),
}

/// Check HTTP response status before touching the body.
pub(crate) fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, AlistError> {
    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(AlistError::Http {
            status,
            url: resp.url().to_string(),
        });
    }
    Ok(resp)
}

impl From<reqwest::Error> for AlistError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for AlistError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
