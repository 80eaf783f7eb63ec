//! Shared plumbing for MediaWarp: configuration, logging, the bounded
//! response caches, the process-wide outbound HTTP client and the JSON
//! chain editor used by the response rewriters.

pub mod cache;
pub mod config;
pub mod error;
pub mod http_client;
pub mod json_chain;
pub mod logging;
pub mod subtitle;

pub use config::Config;
pub use error::{Error, Result};

/// Build version reported by `/MediaWarp/version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
