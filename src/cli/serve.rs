//! HTTP server command

use std::path::PathBuf;

use anyhow::Result;

use crate::config::GatewayConfig;
use crate::gateway::GatewayBuilder;
use crate::server;

/// Start the gateway server
pub async fn serve(
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    preload: Vec<String>,
) -> Result<()> {
    let mut config = GatewayConfig::load(config.as_deref())?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!(
        "Starting gateway (environment '{}', default model '{}')",
        config.environment,
        config.default_model_id
    );

    let gateway = GatewayBuilder::new(config).build().await?;

    if !preload.is_empty() {
        gateway.scheduler().preload(&preload).await;
    }

    server::start(gateway.router(), &gateway.config().server).await
}
