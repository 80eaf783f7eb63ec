use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use mediawarp::http::{create_router, AppState};
use mediawarp_alist::AlistRegistry;
use mediawarp_core::{logging, Config, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("failed to load config: {e}");
        eprintln!("using default configuration");
        Config::default()
    });

    logging::init_logging(&config.logging)?;

    info!("MediaWarp {VERSION} starting");
    info!(
        kind = %config.media_server.kind,
        upstream = %config.media_server.addr,
        "proxying media server"
    );

    let config = Arc::new(config);
    let registry = Arc::new(AlistRegistry::new(&config.alist_strm, &config.cache));
    for endpoint in registry.configured_endpoints() {
        info!(endpoint = %endpoint, "Alist upstream configured");
    }

    let state = AppState::new(config.clone(), registry).map_err(|e| {
        error!("failed to build media-server handler: {e}");
        anyhow::anyhow!("{e}")
    })?;
    let router = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router).await?;
    Ok(())
}
