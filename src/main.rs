//! Audio Gateway Server
//!
//! Loads configuration, sets up logging, and serves the gateway until Ctrl-C.

use anyhow::Context;
use audio_gateway::{Gateway, GatewayConfig, GatewayServer, MetricsEndpoint};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Main entry point for the audio gateway
///
/// # Usage
/// ```bash
/// # Start with default config (audio_gateway.yaml)
/// audio-gateway
///
/// # Start with custom config
/// audio-gateway /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting audio gateway {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "audio_gateway.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = GatewayConfig::from_file(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    info!("Configuration loaded successfully");
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Workers: {}", config.workers.len());
    for (index, worker) in config.workers.iter().enumerate() {
        info!("      [{}] {}", index, worker);
    }
    info!("  - Path prefix: {}", config.path_prefix);
    info!("  - Cache enabled: {} (disk: {})", config.enable_cache, config.enable_l2_cache);
    info!("  - Cache TTL: {} seconds", config.cache_ttl);
    info!("  - Client max-age: {} seconds", config.client_max_age);

    let gateway = Arc::new(
        Gateway::from_config(&config)
            .await
            .context("failed to initialize gateway")?,
    );

    if let Some(metrics_config) = config.metrics_endpoint.as_ref().filter(|m| m.enabled) {
        let addr = metrics_config
            .address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("invalid metrics address {}", metrics_config.address))?;
        let endpoint =
            MetricsEndpoint::new(gateway.metrics().clone(), gateway.cache().clone(), addr);
        tokio::spawn(async move {
            if let Err(e) = endpoint.start().await {
                error!("Metrics endpoint stopped: {}", e);
            }
        });
    }

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_address))?;
    let server = GatewayServer::new(gateway);

    tokio::select! {
        result = server.serve(listener) => {
            result.context("gateway listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Audio gateway stopped");
    Ok(())
}
