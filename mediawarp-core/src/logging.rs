use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize structured logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level. The format is
/// JSON for production or pretty for development, optionally writing to a
/// log file instead of stdout.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow::anyhow!("invalid log level {:?}: {e}", config.level))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.format == "json" {
        let json_layer = fmt::layer().json().with_target(true);
        if let Some(file_path) = &config.file_path {
            let file = open_log_file(file_path)?;
            registry
                .with(json_layer.with_writer(std::sync::Arc::new(file)))
                .try_init()?;
        } else {
            registry.with(json_layer).try_init()?;
        }
    } else {
        let pretty_layer = fmt::layer().with_target(true);
        if let Some(file_path) = &config.file_path {
            let file = open_log_file(file_path)?;
            registry
                .with(pretty_layer.with_ansi(false).with_writer(std::sync::Arc::new(file)))
                .try_init()?;
        } else {
            registry.with(pretty_layer).try_init()?;
        }
    }

    Ok(())
}

fn open_log_file(path: &str) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}
