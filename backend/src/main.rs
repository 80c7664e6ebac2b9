//! Palisade backend entry point: wires the store, the fusion engine, the
//! governance layer, and the embedded event bridge, then serves the HTTP
//! API until interrupted.

use anyhow::Result;
use palisade_backend::api::{self, AppState};
use palisade_backend::auth;
use palisade_backend::bridge::{BridgeConfig, ChainGovernanceViews, EventBridge};
use palisade_backend::chain::ChainClient;
use palisade_backend::config::Config;
use palisade_backend::fusion::RiskEngine;
use palisade_backend::governance::{GovernanceConfig, GovernanceEngine};
use palisade_backend::identity::{HttpAttestation, IdentityManager};
use palisade_backend::ml::MlGateway;
use palisade_backend::oracle::ThreatOracle;
use palisade_backend::store::{MemStore, PgStore, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    auth::init();

    let store: Arc<dyn Store> = if config.database_url.is_empty() {
        warn!("DATABASE_URL not set, falling back to the in-memory store");
        Arc::new(MemStore::new())
    } else {
        Arc::new(PgStore::connect(&config.database_url).await?)
    };

    if config.is_production() && config.jwt_secret == "palisade-dev-secret" {
        warn!("JWT_SECRET is the development default in a production environment");
    }

    let model = Arc::new(MlGateway::new(config.ml_api_url.clone())?);
    let attestor = Arc::new(HttpAttestation::new(
        config.attestation_url.clone(),
        config.civic_sbt_address.clone(),
        config.wallet_verifier_address.clone(),
    )?);

    let governance = GovernanceEngine::new(store.clone(), GovernanceConfig::from_config(&config));
    let risk = RiskEngine::new(store.clone(), model, config.high_value_threshold);
    let identity = IdentityManager::new(store.clone(), attestor);

    let (oracle, bridge) = if config.quadratic_voting_address.is_empty() {
        info!("governance contract not configured, oracle and event bridge disabled");
        (None, None)
    } else {
        let oracle = ThreatOracle::new(config.rpc_url.clone(), &config.quadratic_voting_address)?;

        let bridge_config = BridgeConfig::from_config(&config)?;
        // The bridge owns this client; request handlers never share it.
        let client = ChainClient::dial(&bridge_config.rpc_url)?;
        let views = Arc::new(ChainGovernanceViews::new(client, bridge_config.contract));
        let mut bridge = EventBridge::new(bridge_config, store.clone(), views);
        bridge.start();

        (Some(oracle), Some(bridge))
    };

    let state = Arc::new(AppState {
        store,
        governance,
        risk,
        identity,
        oracle,
        environment: config.environment.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, environment = %config.environment, "palisade backend listening");

    axum::serve(listener, api::build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(mut bridge) = bridge {
        bridge.stop().await;
    }
    auth::clear();
    info!("palisade backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
