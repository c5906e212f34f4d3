use anyhow::Result;
use tollgate::{config::Config, server};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so its log level can seed the filter
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!("🚦 tollgate v{} ({})", tollgate::VERSION, config.server.env);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("✓ Configuration loaded");
    info!("  HTTP: {}", config.server.bind);
    if config.rate_limiting.enabled {
        info!(
            "  Rate limit: {} req/min, burst {}, key {:?}",
            config.rate_limiting.requests_per_minute,
            config.rate_limiting.burst_size,
            config.rate_limiting.key
        );
    } else {
        info!("  Rate limit: disabled");
    }

    server::run(config).await
}
