use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use mediawarp_core::cache::maybe_cache;
use mediawarp_core::config::{trim_endpoint, AlistStrmConfig, AlistUpstreamConfig, CacheConfig};

use crate::client::AlistClient;
use crate::error::AlistError;

/// Process-wide registry of Alist clients, one per configured endpoint.
///
/// Clients are created on first use (the constructor performs network
/// I/O) and shared for the process lifetime.
pub struct AlistRegistry {
    upstreams: HashMap<String, AlistUpstreamConfig>,
    cache_settings: CacheConfig,
    api_cache_ttl: u64,
    clients: DashMap<String, Arc<AlistClient>>,
}

impl AlistRegistry {
    pub fn new(alist: &AlistStrmConfig, cache: &CacheConfig) -> Self {
        let upstreams = alist
            .list
            .iter()
            .map(|upstream| (trim_endpoint(&upstream.addr), upstream.clone()))
            .collect();
        Self {
            upstreams,
            cache_settings: cache.clone(),
            api_cache_ttl: cache.alist_api_ttl,
            clients: DashMap::new(),
        }
    }

    /// Look up (or create on first use) the client for an endpoint.
    pub async fn get(&self, endpoint: &str) -> Result<Arc<AlistClient>, AlistError> {
        let key = trim_endpoint(endpoint);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let upstream = self
            .upstreams
            .get(&key)
            .ok_or_else(|| AlistError::UnknownEndpoint(key.clone()))?;

        let cache = maybe_cache(&self.cache_settings, self.api_cache_ttl);
        let client = Arc::new(AlistClient::connect(upstream, cache).await?);
        info!(endpoint = %key, "Alist client created");

        // Two tasks may race the first creation; the first insert wins
        // and the loser's client is dropped.
        Ok(self.clients.entry(key).or_insert(client).clone())
    }

    pub fn configured_endpoints(&self) -> Vec<String> {
        self.upstreams.keys().cloned().collect()
    }
}
