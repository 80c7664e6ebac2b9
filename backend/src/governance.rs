//! Off-chain governance engine.
//!
//! Mirrors the on-chain quadratic-voting contract: proposal creation, vote
//! admission, quorum evaluation, and the local confirmed-scam projection.
//! When the chain executes the corresponding proposal, the event bridge's
//! projection overrides the local record (chain rows dominate, see the
//! store's upsert rule).

use crate::config::Config;
use crate::error::{ServiceError, ServiceResult};
use crate::schema::{
    is_valid_address, normalize_address, NewProposal, Proposal, ProposalStatus, Vote, VoteType,
};
use crate::store::{Page, Store};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;

/// Tuning for the vote lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct GovernanceConfig {
    pub voting_period: Duration,
    pub quorum: u64,
    pub scam_threshold_pct: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            voting_period: Duration::days(7),
            quorum: 3,
            scam_threshold_pct: 60,
        }
    }
}

impl GovernanceConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            voting_period: Duration::days(config.voting_period_days),
            quorum: config.quorum,
            scam_threshold_pct: config.scam_threshold_pct,
        }
    }
}

/// Decide whether a tally settles the proposal.
///
/// No transition below quorum or at zero total (percentages are undefined
/// there). Integer division truncates toward zero, so a 50/50 tie never
/// reaches a 60 % threshold.
pub fn evaluate_transition(
    votes_for: i64,
    votes_against: i64,
    quorum: u64,
    scam_threshold_pct: u64,
) -> Option<ProposalStatus> {
    let total = votes_for + votes_against;
    if total <= 0 || (total as u64) < quorum {
        return None;
    }
    if votes_for * 100 / total >= scam_threshold_pct as i64 {
        Some(ProposalStatus::Passed)
    } else if votes_against * 100 / total > (100 - scam_threshold_pct) as i64 {
        Some(ProposalStatus::Rejected)
    } else {
        None
    }
}

/// Quadratic vote weight: power scales as the square root of tokens staked.
pub fn vote_power(tokens: i64) -> f64 {
    (tokens.max(0) as f64).sqrt()
}

#[derive(Debug, Clone)]
pub struct CreateProposal {
    pub suspicious_address: String,
    pub creator_address: String,
    pub title: String,
    pub description: String,
    pub evidence: String,
}

#[derive(Debug, Clone)]
pub struct CastVote {
    pub proposal_id: i64,
    pub voter_address: String,
    pub vote_type: String,
    pub tokens: i64,
}

/// Community scam verdict for one address.
#[derive(Debug, Clone)]
pub struct ScamStatus {
    pub is_scam: bool,
    pub scam_score: i64,
    pub source: &'static str,
}

pub struct GovernanceEngine {
    store: Arc<dyn Store>,
    config: GovernanceConfig,
}

impl GovernanceEngine {
    pub fn new(store: Arc<dyn Store>, config: GovernanceConfig) -> Self {
        Self { store, config }
    }

    pub async fn create_proposal(&self, request: CreateProposal) -> ServiceResult<Proposal> {
        if !is_valid_address(&request.suspicious_address) {
            return Err(ServiceError::Validation(format!(
                "invalid suspicious address: {}",
                request.suspicious_address
            )));
        }
        if !is_valid_address(&request.creator_address) {
            return Err(ServiceError::Validation(format!(
                "invalid creator address: {}",
                request.creator_address
            )));
        }
        if request.title.trim().is_empty() || request.description.trim().is_empty() {
            return Err(ServiceError::Validation(
                "proposal title and description are required".into(),
            ));
        }

        let now = Utc::now();
        let proposal = self
            .store
            .insert_proposal(NewProposal {
                suspicious_address: normalize_address(&request.suspicious_address),
                creator_address: normalize_address(&request.creator_address),
                title: request.title,
                description: request.description,
                evidence: request.evidence,
                start_time: now,
                end_time: now + self.config.voting_period,
            })
            .await?;

        info!(
            proposal_id = proposal.id,
            suspicious = %proposal.suspicious_address,
            "proposal created"
        );
        Ok(proposal)
    }

    pub async fn cast_vote(&self, request: CastVote) -> ServiceResult<Proposal> {
        if !is_valid_address(&request.voter_address) {
            return Err(ServiceError::Validation(format!(
                "invalid voter address: {}",
                request.voter_address
            )));
        }
        let vote_type = VoteType::parse(&request.vote_type).ok_or_else(|| {
            ServiceError::Validation(format!(
                "vote type must be 'for' or 'against', got '{}'",
                request.vote_type
            ))
        })?;
        if request.tokens <= 0 {
            return Err(ServiceError::Validation(
                "staked token amount must be positive".into(),
            ));
        }

        let vote = Vote {
            proposal_id: request.proposal_id,
            voter_address: normalize_address(&request.voter_address),
            vote_type,
            tokens: request.tokens,
            power: vote_power(request.tokens),
            voted_at: Utc::now(),
        };

        let proposal = self
            .store
            .cast_vote(vote, self.config.quorum, self.config.scam_threshold_pct)
            .await?;

        if proposal.status != ProposalStatus::Active {
            info!(
                proposal_id = proposal.id,
                status = proposal.status.as_str(),
                votes_for = proposal.votes_for,
                votes_against = proposal.votes_against,
                "proposal settled"
            );
        }
        Ok(proposal)
    }

    pub async fn get_proposal(&self, id: i64) -> ServiceResult<Proposal> {
        self.store
            .get_proposal(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("proposal {id} not found")))
    }

    pub async fn list_proposals(&self, page: Page) -> ServiceResult<Vec<Proposal>> {
        Ok(self.store.list_proposals(page).await?)
    }

    /// Community verdict with its provenance: chain-synced projection,
    /// local DAO confirmation, an in-flight proposal, or nothing at all.
    pub async fn scam_status(&self, address: &str) -> ServiceResult<ScamStatus> {
        let address = normalize_address(address);

        if let Some(scam) = self.store.get_confirmed_scam(&address).await? {
            return Ok(ScamStatus {
                is_scam: true,
                scam_score: scam.scam_score,
                source: if scam.block_number.is_some() {
                    "on_chain_sync"
                } else {
                    "dao_confirmed"
                },
            });
        }

        if self
            .store
            .has_active_proposal_for(&address, Utc::now())
            .await?
        {
            return Ok(ScamStatus {
                is_scam: false,
                scam_score: 0,
                source: "under_review",
            });
        }

        Ok(ScamStatus {
            is_scam: false,
            scam_score: 0,
            source: "unknown",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    const ADDR_A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const ADDR_B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn engine() -> GovernanceEngine {
        GovernanceEngine::new(Arc::new(MemStore::new()), GovernanceConfig::default())
    }

    fn proposal_request() -> CreateProposal {
        CreateProposal {
            suspicious_address: ADDR_B.to_uppercase().replace("0X", "0x"),
            creator_address: ADDR_A.into(),
            title: "Confirm drainer".into(),
            description: "Drained three wallets".into(),
            evidence: "tx links".into(),
        }
    }

    #[test]
    fn test_no_transition_below_quorum() {
        assert_eq!(evaluate_transition(2, 0, 3, 60), None);
        assert_eq!(evaluate_transition(0, 0, 3, 60), None);
    }

    #[test]
    fn test_zero_total_never_divides() {
        // Even with quorum 0, a zero tally must not transition.
        assert_eq!(evaluate_transition(0, 0, 0, 60), None);
    }

    #[test]
    fn test_pass_at_threshold() {
        assert_eq!(
            evaluate_transition(3, 0, 3, 60),
            Some(ProposalStatus::Passed)
        );
        // 2/3 = 66 >= 60
        assert_eq!(
            evaluate_transition(2, 1, 3, 60),
            Some(ProposalStatus::Passed)
        );
        // 3/5 = 60 >= 60 (integer truncation)
        assert_eq!(
            evaluate_transition(3, 2, 3, 60),
            Some(ProposalStatus::Passed)
        );
    }

    #[test]
    fn test_reject_when_against_majority() {
        // against = 66 > 40
        assert_eq!(
            evaluate_transition(1, 2, 3, 60),
            Some(ProposalStatus::Rejected)
        );
    }

    #[test]
    fn test_tie_never_passes() {
        // 50 < 60 for the pass side; the against side carries 50 > 40.
        assert_eq!(
            evaluate_transition(2, 2, 3, 60),
            Some(ProposalStatus::Rejected)
        );
    }

    #[test]
    fn test_middle_band_stays_active() {
        // 5/9 = 55: neither side crosses.
        assert_eq!(evaluate_transition(5, 4, 3, 60), None);
    }

    #[test]
    fn test_vote_power_is_quadratic() {
        assert_eq!(vote_power(0), 0.0);
        assert_eq!(vote_power(1), 1.0);
        assert_eq!(vote_power(100), 10.0);
    }

    #[tokio::test]
    async fn test_create_proposal_normalizes_and_activates() {
        let engine = engine();
        let proposal = engine.create_proposal(proposal_request()).await.unwrap();
        assert_eq!(proposal.suspicious_address, ADDR_B);
        assert_eq!(proposal.status, ProposalStatus::Active);
        assert!(proposal.end_time > proposal.start_time);
        assert_eq!((proposal.end_time - proposal.start_time).num_days(), 7);
    }

    #[tokio::test]
    async fn test_create_proposal_rejects_bad_address() {
        let engine = engine();
        let mut request = proposal_request();
        request.suspicious_address = "0x123".into();
        assert!(matches!(
            engine.create_proposal(request).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cast_vote_rejects_illegal_type() {
        let engine = engine();
        let proposal = engine.create_proposal(proposal_request()).await.unwrap();
        let result = engine
            .cast_vote(CastVote {
                proposal_id: proposal.id,
                voter_address: ADDR_A.into(),
                vote_type: "abstain".into(),
                tokens: 1,
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_duplicate_vote_conflicts() {
        let engine = engine();
        let proposal = engine.create_proposal(proposal_request()).await.unwrap();
        let vote = CastVote {
            proposal_id: proposal.id,
            voter_address: ADDR_A.into(),
            vote_type: "for".into(),
            tokens: 4,
        };
        let updated = engine.cast_vote(vote.clone()).await.unwrap();
        assert_eq!(updated.votes_for, 1);

        let err = engine.cast_vote(vote).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        // Counts unchanged after the rejected duplicate.
        let reloaded = engine.get_proposal(proposal.id).await.unwrap();
        assert_eq!(reloaded.votes_for, 1);
        assert_eq!(reloaded.votes_against, 0);
    }

    #[tokio::test]
    async fn test_quorum_pass_projects_confirmed_scam() {
        let store = Arc::new(MemStore::new());
        let engine = GovernanceEngine::new(store.clone(), GovernanceConfig::default());
        let proposal = engine.create_proposal(proposal_request()).await.unwrap();

        for (i, voter) in [
            "0x1111111111111111111111111111111111111111",
            "0x2222222222222222222222222222222222222222",
            "0x3333333333333333333333333333333333333333",
        ]
        .iter()
        .enumerate()
        {
            let updated = engine
                .cast_vote(CastVote {
                    proposal_id: proposal.id,
                    voter_address: voter.to_string(),
                    vote_type: "for".into(),
                    tokens: 1,
                })
                .await
                .unwrap();
            if i < 2 {
                assert_eq!(updated.status, ProposalStatus::Active);
            } else {
                assert_eq!(updated.status, ProposalStatus::Passed);
            }
        }

        let scam = store.get_confirmed_scam(ADDR_B).await.unwrap().unwrap();
        assert_eq!(scam.scam_score, 100);
        assert_eq!(scam.total_voters, 3);
        assert_eq!(scam.proposal_id, proposal.id);
        assert!(scam.block_number.is_none());
    }

    #[tokio::test]
    async fn test_scam_status_sources() {
        let store = Arc::new(MemStore::new());
        let engine = GovernanceEngine::new(store.clone(), GovernanceConfig::default());

        let status = engine.scam_status(ADDR_B).await.unwrap();
        assert_eq!(status.source, "unknown");
        assert!(!status.is_scam);

        engine.create_proposal(proposal_request()).await.unwrap();
        let status = engine.scam_status(ADDR_B).await.unwrap();
        assert_eq!(status.source, "under_review");

        store
            .upsert_confirmed_scam(crate::schema::ConfirmedScam {
                address: ADDR_B.into(),
                scam_score: 88,
                proposal_id: 1,
                confirmed_at: Utc::now(),
                total_voters: 5,
                description: String::new(),
                tx_hash: Some("0xabc".into()),
                block_number: Some(42),
            })
            .await
            .unwrap();
        let status = engine.scam_status(&ADDR_B.to_uppercase()).await.unwrap();
        assert!(status.is_scam);
        assert_eq!(status.scam_score, 88);
        assert_eq!(status.source, "on_chain_sync");
    }
}
