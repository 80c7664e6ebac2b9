//! Palisade indexer — standalone deployment of the governance event
//! bridge. Runs the same projection as the backend's embedded bridge,
//! against the shared database, with its own health/stats endpoint.

mod api;

use anyhow::{bail, Result};
use palisade_backend::bridge::{BridgeConfig, ChainGovernanceViews, EventBridge};
use palisade_backend::chain::ChainClient;
use palisade_backend::config::Config;
use palisade_backend::store::{PgStore, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    if config.database_url.is_empty() {
        bail!("DATABASE_URL is required for the indexer");
    }
    if config.quadratic_voting_address.is_empty() {
        bail!("QUADRATIC_VOTING_ADDRESS is required for the indexer");
    }

    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.database_url).await?);

    let bridge_config = BridgeConfig::from_config(&config)?;
    let client = ChainClient::dial(&bridge_config.rpc_url)?;
    let views = Arc::new(ChainGovernanceViews::new(client, bridge_config.contract));
    let mut bridge = EventBridge::new(bridge_config, store, views);
    let stats = bridge.stats();
    bridge.start();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "palisade indexer listening");

    axum::serve(listener, api::build_router(stats))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
        })
        .await?;

    bridge.stop().await;
    info!("palisade indexer stopped");
    Ok(())
}
