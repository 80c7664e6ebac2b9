//! Threat oracle — read-only fan-out over the on-chain governance views.
//!
//! Each request dials its own short-lived chain client; the full report
//! issues its three view calls concurrently and fails fast on the first
//! error. Labels, colors, and explanations are pure functions of the
//! on-chain numbers, so the HTTP layer stays presentation-free.

use crate::abi::{decode_bool, decode_dao_confidence, decode_uint, encode_call, parse_address};
use crate::chain::ChainClient;
use crate::error::{ServiceError, ServiceResult};
use crate::schema::is_valid_address;
use ethers::abi::Token;
use ethers::types::{Address, U256};
use serde::Serialize;

/// Risk label bands over the 0-100 threat score.
pub fn risk_label(score: u64) -> &'static str {
    if score >= 75 {
        "CRITICAL"
    } else if score >= 50 {
        "HIGH"
    } else if score >= 20 {
        "UNDER REVIEW"
    } else {
        "CLEAN"
    }
}

/// Display color matching the label band.
pub fn risk_color(score: u64) -> &'static str {
    if score >= 75 {
        "#ef4444"
    } else if score >= 50 {
        "#f97316"
    } else if score >= 20 {
        "#eab308"
    } else {
        "#22c55e"
    }
}

/// Human-readable report lines, deterministic in the inputs.
pub fn explanation(score: u64, confirmed: bool, total_voters: u64) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "Threat score {score}/100 ({})",
        risk_label(score)
    ));
    if confirmed {
        lines.push("Address confirmed as scam by community governance".to_string());
    } else if score >= 20 {
        lines.push("Address is under community review".to_string());
    } else {
        lines.push("No community scam confirmation on record".to_string());
    }
    if total_voters > 0 {
        lines.push(format!("{total_voters} community voters weighed in"));
    }
    lines
}

/// DAO confidence tally for one address.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Confidence {
    pub votes_for: u64,
    pub votes_against: u64,
    pub total_voters: u64,
    pub confidence_percent: f64,
}

/// Composed oracle report.
#[derive(Debug, Clone, Serialize)]
pub struct FullReport {
    pub address: String,
    pub score: u64,
    pub risk_label: &'static str,
    pub risk_color: &'static str,
    pub is_confirmed_scam: bool,
    pub confidence: Confidence,
    pub explanation: Vec<String>,
}

pub struct ThreatOracle {
    rpc_url: String,
    contract: Address,
}

impl ThreatOracle {
    pub fn new(rpc_url: String, contract: &str) -> anyhow::Result<Self> {
        let contract = parse_address(contract)
            .map_err(|e| anyhow::anyhow!("threat oracle contract address: {e}"))?;
        Ok(Self { rpc_url, contract })
    }

    /// Short-lived client per request; never shared with the event bridge.
    fn dial(&self) -> ServiceResult<ChainClient> {
        Ok(ChainClient::dial(&self.rpc_url)?)
    }

    fn target(&self, address: &str) -> ServiceResult<Address> {
        if !is_valid_address(address) {
            return Err(ServiceError::Validation(format!(
                "invalid address: {address}"
            )));
        }
        Ok(parse_address(address)?)
    }

    pub async fn get_threat_score(&self, address: &str) -> ServiceResult<u64> {
        let client = self.dial()?;
        let target = self.target(address)?;
        fetch_score(&client, self.contract, target).await
    }

    pub async fn is_confirmed_scam(&self, address: &str) -> ServiceResult<bool> {
        let client = self.dial()?;
        let target = self.target(address)?;
        fetch_confirmed(&client, self.contract, target).await
    }

    pub async fn get_dao_confidence(&self, address: &str) -> ServiceResult<Confidence> {
        let client = self.dial()?;
        let target = self.target(address)?;
        fetch_confidence(&client, self.contract, target).await
    }

    /// All three views, issued concurrently; the first error wins.
    pub async fn get_full_report(&self, address: &str) -> ServiceResult<FullReport> {
        let client = self.dial()?;
        let target = self.target(address)?;

        let (score, confirmed, confidence) = tokio::try_join!(
            fetch_score(&client, self.contract, target),
            fetch_confirmed(&client, self.contract, target),
            fetch_confidence(&client, self.contract, target),
        )?;

        Ok(FullReport {
            address: address.to_lowercase(),
            score,
            risk_label: risk_label(score),
            risk_color: risk_color(score),
            is_confirmed_scam: confirmed,
            confidence,
            explanation: explanation(score, confirmed, confidence.total_voters),
        })
    }
}

async fn fetch_score(
    client: &ChainClient,
    contract: Address,
    target: Address,
) -> ServiceResult<u64> {
    let data = encode_call("getThreatScore", &[Token::Address(target)])?;
    let output = client.call(contract, data).await?;
    Ok(saturating_u64(decode_uint("getThreatScore", &output)?))
}

async fn fetch_confirmed(
    client: &ChainClient,
    contract: Address,
    target: Address,
) -> ServiceResult<bool> {
    let data = encode_call("isConfirmedScam", &[Token::Address(target)])?;
    let output = client.call(contract, data).await?;
    Ok(decode_bool("isConfirmedScam", &output)?)
}

async fn fetch_confidence(
    client: &ChainClient,
    contract: Address,
    target: Address,
) -> ServiceResult<Confidence> {
    let data = encode_call("getDAOConfidence", &[Token::Address(target)])?;
    let output = client.call(contract, data).await?;
    let tally = decode_dao_confidence(&output)?;

    let votes_for = saturating_u64(tally.votes_for);
    let votes_against = saturating_u64(tally.votes_against);
    let total_voters = saturating_u64(tally.total_voters);
    let total_votes = votes_for + votes_against;

    Ok(Confidence {
        votes_for,
        votes_against,
        total_voters,
        confidence_percent: if total_votes == 0 {
            0.0
        } else {
            votes_for as f64 * 100.0 / total_votes as f64
        },
    })
}

fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}
