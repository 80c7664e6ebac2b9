//! Configuration for the Palisade backend.
//!
//! All values come from the environment with documented defaults, so a bare
//! `palisade-backend` boots against public endpoints in development.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. Empty = in-memory store (development).
    pub database_url: String,

    /// Request/response EVM transport (Alchemy, Infura, public node, ...).
    /// `ETH_RPC_URL` wins over `MONAD_RPC_URL` when both are set.
    pub rpc_url: String,

    /// Streaming EVM transport for log subscriptions. Empty = poll only.
    pub ws_url: String,

    /// Deployed quadratic-voting governance contract.
    pub quadratic_voting_address: String,

    /// Deployed soul-bound identity token contract.
    pub civic_sbt_address: String,

    /// Deployed wallet-verifier contract.
    pub wallet_verifier_address: String,

    /// HTTP bind port.
    pub port: u16,

    /// Bearer-token signing secret (verified by the outer auth layer).
    pub jwt_secret: String,

    /// `development` or `production`.
    pub environment: String,

    /// External ML risk-model endpoint.
    pub ml_api_url: String,

    /// External identity attestation endpoint. Empty = attestation passes
    /// through (development).
    pub attestation_url: String,

    // ── Event bridge tuning ──────────────────────────────────────

    /// Historical catch-up window in blocks.
    pub sync_window_blocks: u64,

    /// Skip the historical catch-up entirely.
    pub skip_historical_sync: bool,

    /// Poll period in seconds when no stream is available.
    pub poll_interval_secs: u64,

    // ── Governance parameters ────────────────────────────────────

    /// Voting period for new proposals, in days.
    pub voting_period_days: i64,

    /// Minimum total votes before a proposal can settle.
    pub quorum: u64,

    /// Percentage of "for" votes required to confirm a scam.
    pub scam_threshold_pct: u64,

    // ── Risk fusion ──────────────────────────────────────────────

    /// Transfers at or above this value use the tightened high-value bands.
    pub high_value_threshold: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            rpc_url: std::env::var("ETH_RPC_URL")
                .or_else(|_| std::env::var("MONAD_RPC_URL"))
                .unwrap_or_else(|_| "https://ethereum-sepolia-rpc.publicnode.com".into()),
            ws_url: std::env::var("MONAD_WS_URL").unwrap_or_default(),
            quadratic_voting_address: std::env::var("QUADRATIC_VOTING_ADDRESS")
                .unwrap_or_default(),
            civic_sbt_address: std::env::var("CIVIC_SBT_ADDRESS").unwrap_or_default(),
            wallet_verifier_address: std::env::var("WALLET_VERIFIER_ADDRESS").unwrap_or_default(),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .context("Invalid PORT")?,
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "palisade-dev-secret".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            ml_api_url: std::env::var("ML_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5000/predict".into()),
            attestation_url: std::env::var("ATTESTATION_URL").unwrap_or_default(),
            sync_window_blocks: std::env::var("BRIDGE_SYNC_WINDOW")
                .unwrap_or_else(|_| "50000".into())
                .parse()
                .unwrap_or(50_000),
            skip_historical_sync: std::env::var("BRIDGE_SKIP_SYNC")
                .unwrap_or_else(|_| "false".into())
                .parse()
                .unwrap_or(false),
            poll_interval_secs: std::env::var("BRIDGE_POLL_INTERVAL")
                .unwrap_or_else(|_| "15".into())
                .parse()
                .unwrap_or(15),
            voting_period_days: std::env::var("VOTING_PERIOD_DAYS")
                .unwrap_or_else(|_| "7".into())
                .parse()
                .unwrap_or(7),
            quorum: std::env::var("DAO_QUORUM")
                .unwrap_or_else(|_| "3".into())
                .parse()
                .unwrap_or(3),
            scam_threshold_pct: std::env::var("DAO_SCAM_THRESHOLD")
                .unwrap_or_else(|_| "60".into())
                .parse()
                .unwrap_or(60),
            high_value_threshold: std::env::var("HIGH_VALUE_THRESHOLD")
                .unwrap_or_else(|_| "10.0".into())
                .parse()
                .unwrap_or(10.0),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
