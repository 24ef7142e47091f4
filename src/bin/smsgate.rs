//! Run the gateway: send, delivery-receipt and delivery-log endpoints over
//! HTTP, backed by the configured ledger and provider seed.

use smsgate::{AppConfig, Gateway, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    telemetry::init(&config.logging)?;

    let gateway = Gateway::from_config(&config)?;
    let app = gateway.router();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        %addr,
        providers = gateway.registry.snapshot().len(),
        "smsgate listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
