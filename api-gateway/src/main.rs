//! Spendgate gateway binary

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spendgate_gateway::config::{GatewayConfig, LogFormat};
use spendgate_gateway::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::load()?;
    init_tracing(config.log_format)?;

    info!("Starting Spendgate gateway v{}", spendgate_common::VERSION);
    info!(
        redis = config.redis_url.is_some(),
        seed_file = ?config.seed_file,
        quota_ttl_secs = config.quota_cache_ttl_secs,
        "Loaded configuration"
    );

    let state = AppState::from_config(&config)?;
    let app = router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);
    info!("Endpoints: /health, /metrics, /v1/quota/check, /v1/usage/summary");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    Ok(())
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("spendgate_gateway=info,spendgate_metering=info,tower_http=info"))?;

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?,
    }
    Ok(())
}
