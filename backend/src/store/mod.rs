//! Datastore layer.
//!
//! One [`Store`] trait, two adapters: [`PgStore`] is the transactional
//! source of truth, [`MemStore`] is the deterministic in-memory adapter used
//! by tests and database-less development. All addresses are stored
//! lowercased; all timestamps are UTC.

mod memory;
mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use crate::schema::{
    ConfirmedScam, IdentitySession, NewProposal, NewRecovery, NewReport, NewTransaction, Proposal,
    Recovery, Report, ReportStatus, SenderStats, Transaction, TxCounts, VerificationLog, Vote,
    WalletAnalytics,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Paged reads, newest first.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Whether an incoming confirmed-scam record may replace the stored one.
///
/// Chain-sourced records (with a block number) dominate local governance
/// mirrors, and later blocks dominate earlier ones. Two local records
/// resolve by `confirmed_at`. The PostgreSQL upsert encodes the same rule
/// in its `ON CONFLICT ... WHERE` clause.
pub fn scam_record_dominates(incoming: &ConfirmedScam, stored: &ConfirmedScam) -> bool {
    match (incoming.block_number, stored.block_number) {
        (Some(new_block), Some(old_block)) => new_block >= old_block,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => incoming.confirmed_at >= stored.confirmed_at,
    }
}

/// Durable relational store for the firewall backend.
///
/// `cast_vote` is the one multi-row operation and runs under serializable
/// isolation: admission checks, tally increment, quorum evaluation, status
/// transition, and the confirmed-scam projection are a single atomic unit.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Transactions ────────────────────────────────────────────

    async fn insert_transaction(&self, tx: NewTransaction) -> StoreResult<Transaction>;

    async fn transactions_by_address(
        &self,
        address: &str,
        page: Page,
    ) -> StoreResult<Vec<Transaction>>;

    async fn transaction_counts(&self) -> StoreResult<TxCounts>;

    /// History aggregates for one wallet; an empty history yields zeros and
    /// empty strings.
    async fn wallet_analytics(&self, address: &str) -> StoreResult<WalletAnalytics>;

    /// Trailing-24h mean and first-time-recipient flag for one sender.
    async fn sender_stats(&self, from: &str, to: &str, now: DateTime<Utc>)
        -> StoreResult<SenderStats>;

    // ── Reports ─────────────────────────────────────────────────

    async fn insert_report(&self, report: NewReport) -> StoreResult<Report>;

    async fn get_report(&self, id: i64) -> StoreResult<Option<Report>>;

    async fn update_report_status(
        &self,
        id: i64,
        status: ReportStatus,
        tx_hash: Option<String>,
    ) -> StoreResult<()>;

    // ── Governance ──────────────────────────────────────────────

    async fn insert_proposal(&self, proposal: NewProposal) -> StoreResult<Proposal>;

    async fn get_proposal(&self, id: i64) -> StoreResult<Option<Proposal>>;

    async fn list_proposals(&self, page: Page) -> StoreResult<Vec<Proposal>>;

    async fn has_active_proposal_for(&self, address: &str, now: DateTime<Utc>)
        -> StoreResult<bool>;

    /// Admit one vote and settle the proposal if quorum is reached.
    ///
    /// Fails with `InvalidInput` when the proposal is closed, `Conflict`
    /// when `(proposal_id, voter_address)` already voted, `NotFound` when
    /// the proposal is absent. Returns the updated proposal.
    async fn cast_vote(
        &self,
        vote: Vote,
        quorum: u64,
        scam_threshold_pct: u64,
    ) -> StoreResult<Proposal>;

    // ── Confirmed scams ─────────────────────────────────────────

    /// Conflict-free upsert keyed on `address`; the dominance rule of
    /// [`scam_record_dominates`] decides whether an existing row is
    /// replaced.
    async fn upsert_confirmed_scam(&self, scam: ConfirmedScam) -> StoreResult<()>;

    async fn get_confirmed_scam(&self, address: &str) -> StoreResult<Option<ConfirmedScam>>;

    // ── Recoveries ──────────────────────────────────────────────

    async fn insert_recovery(&self, recovery: NewRecovery) -> StoreResult<Recovery>;

    async fn recoveries_for(&self, user_address: &str) -> StoreResult<Vec<Recovery>>;

    // ── Identity sessions ───────────────────────────────────────

    async fn insert_session(&self, session: IdentitySession) -> StoreResult<IdentitySession>;

    async fn update_session(&self, session: &IdentitySession) -> StoreResult<()>;

    async fn session_by_gatepass(
        &self,
        user_address: &str,
        gatepass: &str,
    ) -> StoreResult<Option<IdentitySession>>;

    /// Latest unexpired `verified` session for the user, if any.
    async fn active_verified_session(
        &self,
        user_address: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<IdentitySession>>;

    /// Latest session regardless of state, for status lookups.
    async fn latest_session(&self, user_address: &str) -> StoreResult<Option<IdentitySession>>;

    async fn distinct_device_count(&self, user_address: &str) -> StoreResult<u64>;

    async fn append_verification_log(&self, log: VerificationLog) -> StoreResult<()>;

    async fn verification_count_since(
        &self,
        user_address: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn last_geo_location(&self, user_address: &str) -> StoreResult<Option<String>>;
}
