//! In-memory reference implementation of the [`Store`] trait.
//!
//! Deterministic and test-friendly; also backs database-less development.
//! A single lock over the whole state makes `cast_vote` trivially atomic.
//! Production deployments use [`super::PgStore`].

use crate::governance::evaluate_transition;
use crate::schema::{
    ConfirmedScam, IdentitySession, NewProposal, NewRecovery, NewReport, NewTransaction, Proposal,
    ProposalStatus, Recovery, Report, ReportStatus, SenderStats, Transaction, TxCounts, TxStatus,
    VerificationLog, Vote, VoteType, WalletAnalytics,
};
use crate::store::{scam_record_dominates, Page, Store, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
struct Inner {
    transactions: Vec<Transaction>,
    next_transaction_id: i64,
    reports: Vec<Report>,
    next_report_id: i64,
    proposals: Vec<Proposal>,
    next_proposal_id: i64,
    votes: Vec<Vote>,
    scams: HashMap<String, ConfirmedScam>,
    recoveries: Vec<Recovery>,
    next_recovery_id: i64,
    sessions: Vec<IdentitySession>,
    next_session_id: i64,
    logs: Vec<VerificationLog>,
}

/// In-memory store adapter.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_poisoned() -> StoreError {
    StoreError::Backend("store lock poisoned".to_string())
}

#[async_trait]
impl Store for MemStore {
    // ── Transactions ────────────────────────────────────────────

    async fn insert_transaction(&self, tx: NewTransaction) -> StoreResult<Transaction> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;

        if inner.transactions.iter().any(|t| t.tx_hash == tx.tx_hash) {
            return Err(StoreError::Conflict(format!(
                "transaction {} already analyzed",
                tx.tx_hash
            )));
        }

        inner.next_transaction_id += 1;
        let record = Transaction {
            id: inner.next_transaction_id,
            from_address: tx.from_address,
            to_address: tx.to_address,
            value: tx.value,
            currency: tx.currency,
            tx_hash: tx.tx_hash,
            network: tx.network,
            risk: tx.risk,
            status: tx.status,
            timestamp: Utc::now(),
            metadata: tx.metadata,
        };
        inner.transactions.push(record.clone());
        Ok(record)
    }

    async fn transactions_by_address(
        &self,
        address: &str,
        page: Page,
    ) -> StoreResult<Vec<Transaction>> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let mut matched: Vec<Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.from_address == address || t.to_address == address)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matched
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .collect())
    }

    async fn transaction_counts(&self) -> StoreResult<TxCounts> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let mut counts = TxCounts::default();
        for tx in &inner.transactions {
            counts.total += 1;
            match tx.status {
                TxStatus::Safe => counts.safe += 1,
                TxStatus::Suspicious => counts.suspicious += 1,
                TxStatus::Blocked => counts.blocked += 1,
            }
        }
        Ok(counts)
    }

    async fn wallet_analytics(&self, address: &str) -> StoreResult<WalletAnalytics> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;

        let sent: Vec<&Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.from_address == address && t.currency == "ETH")
            .collect();
        let received: Vec<&Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.to_address == address && t.currency == "ETH")
            .collect();
        let erc20_sent: Vec<&Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.from_address == address && t.currency != "ETH")
            .collect();
        let erc20_received: Vec<&Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.to_address == address && t.currency != "ETH")
            .collect();

        let sent_total: f64 = sent.iter().map(|t| t.value).sum();
        let recv_total: f64 = received.iter().map(|t| t.value).sum();
        let erc20_sent_total: f64 = erc20_sent.iter().map(|t| t.value).sum();
        let erc20_recv_total: f64 = erc20_received.iter().map(|t| t.value).sum();

        let all_times: Vec<DateTime<Utc>> = sent
            .iter()
            .chain(received.iter())
            .map(|t| t.timestamp)
            .collect();
        let first = all_times.iter().min().copied();
        let last = all_times.iter().max().copied();

        Ok(WalletAnalytics {
            avg_min_between_sent: mean_gap_minutes(&sent),
            avg_min_between_received: mean_gap_minutes(&received),
            time_diff_first_last_mins: match (first, last) {
                (Some(f), Some(l)) => (l - f).num_seconds() as f64 / 60.0,
                _ => 0.0,
            },
            sent_count: sent.len() as f64,
            received_count: received.len() as f64,
            created_contracts: 0.0,
            max_value_received: received.iter().map(|t| t.value).fold(0.0, f64::max),
            avg_value_received: mean(&received),
            avg_value_sent: mean(&sent),
            total_ether_sent: sent_total,
            total_ether_balance: recv_total - sent_total,
            erc20_total_received: erc20_recv_total,
            erc20_total_sent: erc20_sent_total,
            erc20_total_sent_contract: erc20_sent_total,
            erc20_uniq_sent_addresses: erc20_sent
                .iter()
                .map(|t| t.to_address.as_str())
                .collect::<HashSet<_>>()
                .len() as f64,
            erc20_uniq_received_tokens: erc20_received
                .iter()
                .map(|t| t.currency.as_str())
                .collect::<HashSet<_>>()
                .len() as f64,
            most_sent_token: most_frequent(erc20_sent.iter().map(|t| t.currency.as_str())),
            most_received_token: most_frequent(erc20_received.iter().map(|t| t.currency.as_str())),
        })
    }

    async fn sender_stats(
        &self,
        from: &str,
        to: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<SenderStats> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let cutoff = now - Duration::hours(24);
        let recent: Vec<&Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.from_address == from && t.timestamp > cutoff)
            .collect();
        Ok(SenderStats {
            mean_value_24h: mean(&recent),
            has_sent_to_recipient: inner
                .transactions
                .iter()
                .any(|t| t.from_address == from && t.to_address == to),
        })
    }

    // ── Reports ─────────────────────────────────────────────────

    async fn insert_report(&self, report: NewReport) -> StoreResult<Report> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        inner.next_report_id += 1;
        let record = Report {
            id: inner.next_report_id,
            reported_address: report.reported_address,
            reporter_address: report.reporter_address,
            category: report.category,
            description: report.description,
            evidence: report.evidence,
            status: ReportStatus::Pending,
            severity: report.severity,
            priority: report.priority,
            requires_immediate: report.requires_immediate,
            tx_hash: None,
            created_at: Utc::now(),
        };
        inner.reports.push(record.clone());
        Ok(record)
    }

    async fn get_report(&self, id: i64) -> StoreResult<Option<Report>> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner.reports.iter().find(|r| r.id == id).cloned())
    }

    async fn update_report_status(
        &self,
        id: i64,
        status: ReportStatus,
        tx_hash: Option<String>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        let report = inner
            .reports
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("report {id} not found")))?;
        report.status = status;
        if tx_hash.is_some() {
            report.tx_hash = tx_hash;
        }
        Ok(())
    }

    // ── Governance ──────────────────────────────────────────────

    async fn insert_proposal(&self, proposal: NewProposal) -> StoreResult<Proposal> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        inner.next_proposal_id += 1;
        let record = Proposal {
            id: inner.next_proposal_id,
            suspicious_address: proposal.suspicious_address,
            creator_address: proposal.creator_address,
            title: proposal.title,
            description: proposal.description,
            evidence: proposal.evidence,
            votes_for: 0,
            votes_against: 0,
            start_time: proposal.start_time,
            end_time: proposal.end_time,
            status: ProposalStatus::Active,
        };
        inner.proposals.push(record.clone());
        Ok(record)
    }

    async fn get_proposal(&self, id: i64) -> StoreResult<Option<Proposal>> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner.proposals.iter().find(|p| p.id == id).cloned())
    }

    async fn list_proposals(&self, page: Page) -> StoreResult<Vec<Proposal>> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let mut listed = inner.proposals.clone();
        listed.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(listed
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .collect())
    }

    async fn has_active_proposal_for(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner.proposals.iter().any(|p| {
            p.suspicious_address == address
                && p.status == ProposalStatus::Active
                && p.end_time > now
        }))
    }

    async fn cast_vote(
        &self,
        vote: Vote,
        quorum: u64,
        scam_threshold_pct: u64,
    ) -> StoreResult<Proposal> {
        // One write lock = the whole admission/evaluation unit is atomic.
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;

        let proposal = inner
            .proposals
            .iter()
            .find(|p| p.id == vote.proposal_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("proposal {} not found", vote.proposal_id)))?;

        if proposal.status != ProposalStatus::Active {
            return Err(StoreError::InvalidInput(format!(
                "proposal {} is not active",
                proposal.id
            )));
        }
        if vote.voted_at > proposal.end_time {
            return Err(StoreError::InvalidInput(format!(
                "voting period for proposal {} has ended",
                proposal.id
            )));
        }
        if inner
            .votes
            .iter()
            .any(|v| v.proposal_id == vote.proposal_id && v.voter_address == vote.voter_address)
        {
            return Err(StoreError::Conflict(format!(
                "address {} has already voted on proposal {}",
                vote.voter_address, vote.proposal_id
            )));
        }

        let (votes_for, votes_against) = match vote.vote_type {
            VoteType::For => (proposal.votes_for + 1, proposal.votes_against),
            VoteType::Against => (proposal.votes_for, proposal.votes_against + 1),
        };
        let next_status = evaluate_transition(votes_for, votes_against, quorum, scam_threshold_pct)
            .unwrap_or(ProposalStatus::Active);

        inner.votes.push(vote.clone());
        let updated = {
            let stored = inner
                .proposals
                .iter_mut()
                .find(|p| p.id == vote.proposal_id)
                .expect("proposal present under the same lock");
            stored.votes_for = votes_for;
            stored.votes_against = votes_against;
            stored.status = next_status;
            stored.clone()
        };

        if next_status == ProposalStatus::Passed {
            let total = votes_for + votes_against;
            let incoming = ConfirmedScam {
                address: updated.suspicious_address.clone(),
                scam_score: votes_for * 100 / total,
                proposal_id: updated.id,
                confirmed_at: vote.voted_at,
                total_voters: total,
                description: updated.description.clone(),
                tx_hash: None,
                block_number: None,
            };
            upsert_scam(&mut inner.scams, incoming);
        }

        Ok(updated)
    }

    // ── Confirmed scams ─────────────────────────────────────────

    async fn upsert_confirmed_scam(&self, scam: ConfirmedScam) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        upsert_scam(&mut inner.scams, scam);
        Ok(())
    }

    async fn get_confirmed_scam(&self, address: &str) -> StoreResult<Option<ConfirmedScam>> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner.scams.get(address).cloned())
    }

    // ── Recoveries ──────────────────────────────────────────────

    async fn insert_recovery(&self, recovery: NewRecovery) -> StoreResult<Recovery> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        inner.next_recovery_id += 1;
        let record = Recovery {
            id: inner.next_recovery_id,
            user_address: recovery.user_address,
            new_address: recovery.new_address,
            reason: recovery.reason,
            status: "pending".to_string(),
            created_at: Utc::now(),
        };
        inner.recoveries.push(record.clone());
        Ok(record)
    }

    async fn recoveries_for(&self, user_address: &str) -> StoreResult<Vec<Recovery>> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let mut matched: Vec<Recovery> = inner
            .recoveries
            .iter()
            .filter(|r| r.user_address == user_address)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    // ── Identity sessions ───────────────────────────────────────

    async fn insert_session(&self, mut session: IdentitySession) -> StoreResult<IdentitySession> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        inner.next_session_id += 1;
        session.id = inner.next_session_id;
        inner.sessions.push(session.clone());
        Ok(session)
    }

    async fn update_session(&self, session: &IdentitySession) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        let stored = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == session.id)
            .ok_or_else(|| StoreError::NotFound(format!("session {} not found", session.id)))?;
        *stored = session.clone();
        Ok(())
    }

    async fn session_by_gatepass(
        &self,
        user_address: &str,
        gatepass: &str,
    ) -> StoreResult<Option<IdentitySession>> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .sessions
            .iter()
            .find(|s| s.user_address == user_address && s.gatepass == gatepass)
            .cloned())
    }

    async fn active_verified_session(
        &self,
        user_address: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<IdentitySession>> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .sessions
            .iter()
            .filter(|s| {
                s.user_address == user_address
                    && s.status == crate::schema::SessionStatus::Verified
                    && s.token_expiry > now
            })
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn latest_session(&self, user_address: &str) -> StoreResult<Option<IdentitySession>> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .sessions
            .iter()
            .filter(|s| s.user_address == user_address)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn distinct_device_count(&self, user_address: &str) -> StoreResult<u64> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .sessions
            .iter()
            .filter(|s| s.user_address == user_address)
            .map(|s| s.device_hash.as_str())
            .collect::<HashSet<_>>()
            .len() as u64)
    }

    async fn append_verification_log(&self, log: VerificationLog) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        inner.logs.push(log);
        Ok(())
    }

    async fn verification_count_since(
        &self,
        user_address: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .logs
            .iter()
            .filter(|l| l.user_address == user_address && l.created_at > since)
            .count() as u64)
    }

    async fn last_geo_location(&self, user_address: &str) -> StoreResult<Option<String>> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .logs
            .iter()
            .filter(|l| l.user_address == user_address)
            .max_by_key(|l| l.created_at)
            .map(|l| l.geo_location.clone()))
    }
}

fn upsert_scam(scams: &mut HashMap<String, ConfirmedScam>, incoming: ConfirmedScam) {
    match scams.get(&incoming.address) {
        Some(stored) if !scam_record_dominates(&incoming, stored) => {}
        _ => {
            scams.insert(incoming.address.clone(), incoming);
        }
    }
}

fn mean(txs: &[&Transaction]) -> f64 {
    if txs.is_empty() {
        0.0
    } else {
        txs.iter().map(|t| t.value).sum::<f64>() / txs.len() as f64
    }
}

fn most_frequent<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        *counts.entry(item).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(token, _)| token.to_string())
        .unwrap_or_default()
}

fn mean_gap_minutes(txs: &[&Transaction]) -> f64 {
    if txs.len() < 2 {
        return 0.0;
    }
    let first = txs.iter().map(|t| t.timestamp).min().unwrap();
    let last = txs.iter().map(|t| t.timestamp).max().unwrap();
    (last - first).num_seconds() as f64 / 60.0 / (txs.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::normalize_address;

    fn new_tx(from: &str, to: &str, value: f64, hash: &str) -> NewTransaction {
        NewTransaction {
            from_address: normalize_address(from),
            to_address: normalize_address(to),
            value,
            currency: "ETH".into(),
            tx_hash: hash.into(),
            network: "sepolia".into(),
            risk: 0.1,
            status: TxStatus::Safe,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_duplicate_tx_hash_conflicts() {
        let store = MemStore::new();
        store
            .insert_transaction(new_tx("0xA", "0xB", 1.0, "0x1"))
            .await
            .unwrap();
        let err = store
            .insert_transaction(new_tx("0xA", "0xB", 1.0, "0x1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_transaction_counts() {
        let store = MemStore::new();
        for (i, status) in [TxStatus::Safe, TxStatus::Safe, TxStatus::Blocked]
            .iter()
            .enumerate()
        {
            let mut tx = new_tx("0xA", "0xB", 1.0, &format!("0x{i}"));
            tx.status = *status;
            store.insert_transaction(tx).await.unwrap();
        }
        let counts = store.transaction_counts().await.unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.safe, 2);
        assert_eq!(counts.blocked, 1);
        assert_eq!(counts.suspicious, 0);
    }

    #[tokio::test]
    async fn test_chain_scam_record_not_overwritten_by_local() {
        let store = MemStore::new();
        let chain = ConfirmedScam {
            address: "0xbad".into(),
            scam_score: 90,
            proposal_id: 1,
            confirmed_at: Utc::now(),
            total_voters: 5,
            description: "chain".into(),
            tx_hash: Some("0xabc".into()),
            block_number: Some(100),
        };
        store.upsert_confirmed_scam(chain.clone()).await.unwrap();

        let local = ConfirmedScam {
            scam_score: 10,
            tx_hash: None,
            block_number: None,
            description: "local".into(),
            ..chain.clone()
        };
        store.upsert_confirmed_scam(local).await.unwrap();

        let stored = store.get_confirmed_scam("0xbad").await.unwrap().unwrap();
        assert_eq!(stored.description, "chain");
        assert_eq!(stored.scam_score, 90);
    }

    #[tokio::test]
    async fn test_report_status_lifecycle() {
        let store = MemStore::new();
        let report = store
            .insert_report(NewReport {
                reported_address: "0xbad".into(),
                reporter_address: "0xgood".into(),
                category: "phishing".into(),
                description: "fake airdrop page".into(),
                evidence: String::new(),
                severity: 4,
                priority: "high".into(),
                requires_immediate: false,
            })
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Pending);

        store
            .update_report_status(report.id, ReportStatus::BlockchainPending, None)
            .await
            .unwrap();
        store
            .update_report_status(report.id, ReportStatus::Verified, Some("0xsubmit".into()))
            .await
            .unwrap();

        let stored = store.get_report(report.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Verified);
        assert_eq!(stored.tx_hash.as_deref(), Some("0xsubmit"));

        let missing = store
            .update_report_status(999, ReportStatus::Rejected, None)
            .await
            .unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_wallet_analytics_empty_history() {
        let store = MemStore::new();
        let analytics = store.wallet_analytics("0xnobody").await.unwrap();
        assert_eq!(analytics.sent_count, 0.0);
        assert_eq!(analytics.total_ether_sent, 0.0);
        assert_eq!(analytics.most_sent_token, "");
    }

    #[tokio::test]
    async fn test_sender_stats_first_time_recipient() {
        let store = MemStore::new();
        store
            .insert_transaction(new_tx("0xa", "0xb", 2.0, "0x1"))
            .await
            .unwrap();
        let stats = store.sender_stats("0xa", "0xb", Utc::now()).await.unwrap();
        assert!(stats.has_sent_to_recipient);
        let stats = store.sender_stats("0xa", "0xc", Utc::now()).await.unwrap();
        assert!(!stats.has_sent_to_recipient);
    }
}
