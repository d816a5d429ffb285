mod backend;
mod config;
mod engine;
mod error;
mod model_catalog;
mod prompting;
mod protocol;
mod reasoning;
mod server;

use std::path::PathBuf;

use anyhow::Context;
use candle_core::Device;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::GatewayConfig;
use crate::engine::ModelSession;
use crate::model_catalog::ModelCatalog;
use crate::server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("gateway.toml"));
    let config = if config_path.exists() {
        GatewayConfig::load(&config_path)?
    } else {
        info!(config = %config_path.display(), "no config file found, using built-in defaults");
        GatewayConfig::default()
    };

    let catalog = ModelCatalog::from_config(&config)?;
    info!(
        models = ?catalog.names().collect::<Vec<_>>(),
        default = %config.default_model,
        "model catalog ready"
    );

    let device = Device::cuda_if_available(0).context("device init failed")?;
    let mut session = ModelSession::new(catalog, device);

    info!(model = %config.default_model, "preloading default model");
    session
        .ensure_ready(&config.default_model)
        .with_context(|| format!("preload of '{}' failed", config.default_model))?;

    let state = AppState::new(session);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind failed on {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}
