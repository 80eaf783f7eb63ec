use thiserror::Error;

/// Errors produced by the core crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON decode error: {0}")]
    BodyDecode(String),

    #[error("JSON encode error: {0}")]
    BodyEncode(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::BodyDecode(err.to_string())
    }
}
