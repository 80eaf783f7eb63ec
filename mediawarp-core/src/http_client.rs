//! Process-wide outbound HTTP client.
//!
//! All API traffic (media-server Items queries, Alist calls) shares one
//! pooled client; callers never construct their own. The reverse proxy
//! and the STRM redirect follower carry their own clients because they
//! need different timeout and redirect policies.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::Client;

static SHARED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    let cores = cores();
    Client::builder()
        .pool_max_idle_per_host(cores * 2)
        .pool_idle_timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(3))
        .timeout(Duration::from_secs(15))
        .tcp_keepalive(Duration::from_secs(15))
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .build()
        .expect("failed to build shared HTTP client")
});

fn cores() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

/// The shared outbound client. Cloning is cheap and reuses the pool.
pub fn client() -> Client {
    SHARED_CLIENT.clone()
}
