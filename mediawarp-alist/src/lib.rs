//! Alist v3 API client.
//!
//! Authenticated REST client for the subset of the Alist API that STRM
//! resolution needs: `/api/auth/login`, `/api/me`, `/api/fs/get` and
//! `/api/fs/other` (`video_preview`). Tokens are refreshed lazily with a
//! double-checked read/write lock; cacheable responses go through an
//! optional per-client [`mediawarp_core::cache::BoundedCache`].

mod client;
mod error;
mod registry;
pub mod types;

pub use client::AlistClient;
pub use error::AlistError;
pub use registry::AlistRegistry;
