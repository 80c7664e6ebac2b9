//! Entity types shared by the datastore, the fusion engine, and the API.
//!
//! Every address column is stored lowercased and every timestamp is UTC.
//! Entities reference each other by primary key (`proposal_id`,
//! `voter_address`), never by in-memory pointers, so the same types flow
//! through the serializable-transaction path unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowercase an EVM address for storage and comparison.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// A syntactically valid EVM address: 42 chars, `0x` prefix, hex body.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

// ── Transactions ────────────────────────────────────────────────

/// Verdict band for an analyzed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Safe,
    Suspicious,
    Blocked,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Safe => "safe",
            TxStatus::Suspicious => "suspicious",
            TxStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "safe" => Some(TxStatus::Safe),
            "suspicious" => Some(TxStatus::Suspicious),
            "blocked" => Some(TxStatus::Blocked),
            _ => None,
        }
    }
}

/// One analyzed transfer. Created exactly once when risk fusion completes,
/// immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub from_address: String,
    pub to_address: String,
    pub value: f64,
    pub currency: String,
    pub tx_hash: String,
    pub network: String,
    pub risk: f64,
    pub status: TxStatus,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Insert payload for a transaction row (id assigned by the store).
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub from_address: String,
    pub to_address: String,
    pub value: f64,
    pub currency: String,
    pub tx_hash: String,
    pub network: String,
    pub risk: f64,
    pub status: TxStatus,
    pub metadata: serde_json::Value,
}

/// Aggregate transaction counts by status.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TxCounts {
    pub total: u64,
    pub safe: u64,
    pub suspicious: u64,
    pub blocked: u64,
}

// ── Reports ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Verified,
    Rejected,
    Critical,
    BlockchainPending,
    BlockchainFailed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Verified => "verified",
            ReportStatus::Rejected => "rejected",
            ReportStatus::Critical => "critical",
            ReportStatus::BlockchainPending => "blockchain_pending",
            ReportStatus::BlockchainFailed => "blockchain_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReportStatus::Pending),
            "verified" => Some(ReportStatus::Verified),
            "rejected" => Some(ReportStatus::Rejected),
            "critical" => Some(ReportStatus::Critical),
            "blockchain_pending" => Some(ReportStatus::BlockchainPending),
            "blockchain_failed" => Some(ReportStatus::BlockchainFailed),
            _ => None,
        }
    }
}

/// A user-submitted scam report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub reported_address: String,
    pub reporter_address: String,
    pub category: String,
    pub description: String,
    pub evidence: String,
    pub status: ReportStatus,
    pub severity: i32,
    pub priority: String,
    pub requires_immediate: bool,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub reported_address: String,
    pub reporter_address: String,
    pub category: String,
    pub description: String,
    pub evidence: String,
    pub severity: i32,
    pub priority: String,
    pub requires_immediate: bool,
}

// ── Governance ──────────────────────────────────────────────────

/// Proposal lifecycle. Transitions only move forward:
/// active → passed | rejected → executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Active,
    Passed,
    Rejected,
    Executed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Active => "active",
            ProposalStatus::Passed => "passed",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Executed => "executed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ProposalStatus::Active),
            "passed" => Some(ProposalStatus::Passed),
            "rejected" => Some(ProposalStatus::Rejected),
            "executed" => Some(ProposalStatus::Executed),
            _ => None,
        }
    }
}

/// A governance item naming a suspicious address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: i64,
    pub suspicious_address: String,
    pub creator_address: String,
    pub title: String,
    pub description: String,
    pub evidence: String,
    pub votes_for: i64,
    pub votes_against: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ProposalStatus,
}

#[derive(Debug, Clone)]
pub struct NewProposal {
    pub suspicious_address: String,
    pub creator_address: String,
    pub title: String,
    pub description: String,
    pub evidence: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    For,
    Against,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::For => "for",
            VoteType::Against => "against",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "for" => Some(VoteType::For),
            "against" => Some(VoteType::Against),
            _ => None,
        }
    }
}

/// One address's vote on one proposal. `(proposal_id, voter_address)` is
/// unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: i64,
    pub voter_address: String,
    pub vote_type: VoteType,
    pub tokens: i64,
    pub power: f64,
    pub voted_at: DateTime<Utc>,
}

// ── Confirmed scams ─────────────────────────────────────────────

/// Projection of passed proposals, keyed by lowercase address.
///
/// Rows written by the event bridge carry the finalizing chain tx hash and
/// block number; rows written by the off-chain governance mirror leave both
/// unset. Later block numbers dominate; chain-sourced rows dominate local
/// mirrors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedScam {
    pub address: String,
    pub scam_score: i64,
    pub proposal_id: i64,
    pub confirmed_at: DateTime<Utc>,
    pub total_voters: i64,
    pub description: String,
    pub tx_hash: Option<String>,
    pub block_number: Option<i64>,
}

// ── Recoveries ──────────────────────────────────────────────────

/// A wallet-recovery request raised from the firewall dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recovery {
    pub id: i64,
    pub user_address: String,
    pub new_address: String,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRecovery {
    pub user_address: String,
    pub new_address: String,
    pub reason: String,
}

// ── Identity ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Verified,
    NeedsAdditionalVerification,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Verified => "verified",
            SessionStatus::NeedsAdditionalVerification => "needs_additional_verification",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "verified" => Some(SessionStatus::Verified),
            "needs_additional_verification" => Some(SessionStatus::NeedsAdditionalVerification),
            "expired" => Some(SessionStatus::Expired),
            _ => None,
        }
    }
}

/// Short-lived identity verification attempt. Invalid once `token_expiry`
/// is in the past.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySession {
    pub id: i64,
    pub user_address: String,
    pub gatepass: String,
    pub status: SessionStatus,
    pub security_level: i32,
    pub device_hash: String,
    pub risk_score: f64,
    pub flags: Vec<String>,
    pub token_expiry: DateTime<Utc>,
    pub last_verified: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit row for an identity attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationLog {
    pub user_address: String,
    pub verification_type: String,
    pub success: bool,
    pub device_info: String,
    pub ip_address: String,
    pub geo_location: String,
    pub created_at: DateTime<Utc>,
}

// ── Wallet analytics ────────────────────────────────────────────

/// Per-wallet history aggregates feeding the ML feature vector.
///
/// Missing analytics yield numeric zeros and empty strings, never nulls.
#[derive(Debug, Clone, Default)]
pub struct WalletAnalytics {
    pub avg_min_between_sent: f64,
    pub avg_min_between_received: f64,
    pub time_diff_first_last_mins: f64,
    pub sent_count: f64,
    pub received_count: f64,
    pub created_contracts: f64,
    pub max_value_received: f64,
    pub avg_value_received: f64,
    pub avg_value_sent: f64,
    pub total_ether_sent: f64,
    pub total_ether_balance: f64,
    pub erc20_total_received: f64,
    pub erc20_total_sent: f64,
    pub erc20_total_sent_contract: f64,
    pub erc20_uniq_sent_addresses: f64,
    pub erc20_uniq_received_tokens: f64,
    pub most_sent_token: String,
    pub most_received_token: String,
}

/// Sender-side stats used by the high-value unusual-transfer check.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderStats {
    /// Mean outgoing value over the trailing 24 hours.
    pub mean_value_24h: f64,
    /// Whether the sender has ever paid this recipient before.
    pub has_sent_to_recipient: bool,
}
