//! Risk fusion engine.
//!
//! Combines the external ML estimate, the community-curated scam record,
//! active-proposal status, and transfer shape into one authoritative
//! verdict, then persists the transaction row. The ML gateway is the only
//! hard dependency: its failure aborts the analysis and nothing is stored.
//! DAO-boost lookups degrade to a zero boost.

use crate::error::{ServiceError, ServiceResult};
use crate::ml::{MlRequest, MlVerdict, RiskModel};
use crate::schema::{
    is_valid_address, normalize_address, NewTransaction, Transaction, TxStatus, WalletAnalytics,
};
use crate::store::Store;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Number of slots in the ML feature vector.
pub const FEATURE_SLOTS: usize = 18;

/// One slot of the mixed-type feature vector. Slots 0-15 are numeric;
/// slots 16-17 carry token symbols. Serializes untagged so the wire shape
/// stays `[0.0, ..., "USDC", "WETH"]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Text(String),
}

/// Assemble the 18-slot feature vector for the recipient wallet.
///
/// Slot 9 (total ether sent) falls back to the transfer value when no
/// richer history exists. Missing analytics yield zeros and empty strings.
pub fn build_features(analytics: &WalletAnalytics, tx_value: f64) -> Vec<FeatureValue> {
    let total_ether_sent = if analytics.total_ether_sent > 0.0 {
        analytics.total_ether_sent
    } else {
        tx_value
    };

    let features = vec![
        FeatureValue::Numeric(analytics.avg_min_between_sent),
        FeatureValue::Numeric(analytics.avg_min_between_received),
        FeatureValue::Numeric(analytics.time_diff_first_last_mins),
        FeatureValue::Numeric(analytics.sent_count),
        FeatureValue::Numeric(analytics.received_count),
        FeatureValue::Numeric(analytics.created_contracts),
        FeatureValue::Numeric(analytics.max_value_received),
        FeatureValue::Numeric(analytics.avg_value_received),
        FeatureValue::Numeric(analytics.avg_value_sent),
        FeatureValue::Numeric(total_ether_sent),
        FeatureValue::Numeric(analytics.total_ether_balance),
        FeatureValue::Numeric(analytics.erc20_total_received),
        FeatureValue::Numeric(analytics.erc20_total_sent),
        FeatureValue::Numeric(analytics.erc20_total_sent_contract),
        FeatureValue::Numeric(analytics.erc20_uniq_sent_addresses),
        FeatureValue::Numeric(analytics.erc20_uniq_received_tokens),
        FeatureValue::Text(analytics.most_sent_token.clone()),
        FeatureValue::Text(analytics.most_received_token.clone()),
    ];
    debug_assert_eq!(features.len(), FEATURE_SLOTS);
    features
}

/// Base risk for a categorical ML verdict.
pub fn base_risk(verdict: MlVerdict) -> f64 {
    match verdict {
        MlVerdict::Fraud => 0.85,
        MlVerdict::Suspicious => 0.50,
        MlVerdict::Safe => 0.10,
    }
}

/// Clamp a fused score into [0, 1].
pub fn clamp_risk(risk: f64) -> f64 {
    risk.clamp(0.0, 1.0)
}

/// Band a fused score into a verdict. High-value transfers use the
/// tightened thresholds.
pub fn band(risk: f64, high_value: bool) -> TxStatus {
    let (blocked_above, suspicious_above) = if high_value { (0.5, 0.2) } else { (0.7, 0.3) };
    if risk > blocked_above {
        TxStatus::Blocked
    } else if risk > suspicious_above {
        TxStatus::Suspicious
    } else {
        TxStatus::Safe
    }
}

/// Analysis request for one transfer.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub from: String,
    pub to: String,
    pub value: f64,
    pub currency: String,
    pub tx_hash: String,
    pub network: String,
    pub gas_price: f64,
    pub is_contract_interaction: bool,
    pub metadata: serde_json::Value,
}

/// Fused verdict plus the persisted transaction row.
#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub transaction: Transaction,
    pub ml_verdict: MlVerdict,
    pub dao_boost: f64,
    pub analysis: Vec<String>,
}

pub struct RiskEngine {
    store: Arc<dyn Store>,
    model: Arc<dyn RiskModel>,
    high_value_threshold: f64,
}

impl RiskEngine {
    pub fn new(store: Arc<dyn Store>, model: Arc<dyn RiskModel>, high_value_threshold: f64) -> Self {
        Self {
            store,
            model,
            high_value_threshold,
        }
    }

    pub async fn analyze(&self, request: AnalyzeRequest) -> ServiceResult<FusionOutcome> {
        if !is_valid_address(&request.from) {
            return Err(ServiceError::Validation(format!(
                "invalid sender address: {}",
                request.from
            )));
        }
        if !is_valid_address(&request.to) {
            return Err(ServiceError::Validation(format!(
                "invalid recipient address: {}",
                request.to
            )));
        }
        if request.tx_hash.trim().is_empty() {
            return Err(ServiceError::Validation("transaction hash is required".into()));
        }

        let from = normalize_address(&request.from);
        let to = normalize_address(&request.to);
        let mut analysis = Vec::new();

        // The recipient is the evaluated party.
        let analytics = match self.store.wallet_analytics(&to).await {
            Ok(analytics) => analytics,
            Err(e) => {
                warn!(address = %to, error = %e, "wallet analytics unavailable, using empty history");
                WalletAnalytics::default()
            }
        };
        let features = build_features(&analytics, request.value);

        let ml_request = MlRequest {
            from_address: from.clone(),
            to_address: to.clone(),
            transaction_value: request.value,
            gas_price: request.gas_price,
            is_contract_interaction: request.is_contract_interaction,
            acc_holder: to.clone(),
            features,
        };
        // Hard dependency: a gateway failure aborts before anything is
        // persisted.
        let verdict = self.model.predict(&ml_request).await?;
        let ml_risk = base_risk(verdict);
        analysis.push(format!("ml verdict: {verdict:?}"));

        let dao_boost = self.dao_boost(&to, &mut analysis).await;
        let mut risk = ml_risk + dao_boost;

        let high_value = request.value >= self.high_value_threshold;
        if high_value {
            analysis.push("high-value transfer: tightened thresholds".into());
            risk += self.high_value_adjustments(&from, &to, request.value, &mut analysis).await;
        }

        let risk = clamp_risk(risk);
        let status = band(risk, high_value);

        let transaction = self
            .store
            .insert_transaction(NewTransaction {
                from_address: from,
                to_address: to,
                value: request.value,
                currency: request.currency,
                tx_hash: request.tx_hash,
                network: request.network,
                risk,
                status,
                metadata: request.metadata,
            })
            .await?;

        info!(
            tx_hash = %transaction.tx_hash,
            risk,
            status = status.as_str(),
            dao_boost,
            "transaction analyzed"
        );

        Ok(FusionOutcome {
            transaction,
            ml_verdict: verdict,
            dao_boost,
            analysis,
        })
    }

    /// Additive risk from the community layer. Store failures degrade to
    /// zero so a database hiccup cannot block the ML verdict.
    async fn dao_boost(&self, to: &str, analysis: &mut Vec<String>) -> f64 {
        match self.store.get_confirmed_scam(to).await {
            Ok(Some(scam)) => {
                let boost = (scam.scam_score as f64 / 100.0) * 0.5;
                analysis.push(format!(
                    "community confirmed scam (score {})",
                    scam.scam_score
                ));
                return boost;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "confirmed-scam lookup failed, boost degraded to 0");
                return 0.0;
            }
        }

        match self.store.has_active_proposal_for(to, Utc::now()).await {
            Ok(true) => {
                analysis.push("active governance proposal against recipient".into());
                0.15
            }
            Ok(false) => 0.0,
            Err(e) => {
                warn!(error = %e, "active-proposal lookup failed, boost degraded to 0");
                0.0
            }
        }
    }

    async fn high_value_adjustments(
        &self,
        from: &str,
        to: &str,
        value: f64,
        analysis: &mut Vec<String>,
    ) -> f64 {
        let mut extra = 0.0;

        match self.store.get_confirmed_scam(to).await {
            Ok(Some(_)) => {
                extra += 0.3;
                analysis.push("recipient has prior confirmed scam history".into());
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "scam-history lookup failed during high-value check"),
        }

        match self.store.sender_stats(from, to, Utc::now()).await {
            Ok(stats) => {
                let spike = stats.mean_value_24h > 0.0 && value > 3.0 * stats.mean_value_24h;
                let first_time = !stats.has_sent_to_recipient;
                if spike || first_time {
                    extra += 0.2;
                    analysis.push(if spike {
                        "transfer exceeds 3x the sender's 24h mean".into()
                    } else {
                        "first transfer from sender to this recipient".into()
                    });
                }
            }
            Err(e) => warn!(error = %e, "sender stats unavailable during high-value check"),
        }

        extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ConfirmedScam;
    use crate::store::MemStore;
    use async_trait::async_trait;

    const FROM: &str = "0x1111111111111111111111111111111111111111";
    const TO: &str = "0x2222222222222222222222222222222222222222";

    struct StubModel(MlVerdict);

    #[async_trait]
    impl RiskModel for StubModel {
        async fn predict(&self, _request: &MlRequest) -> ServiceResult<MlVerdict> {
            Ok(self.0)
        }
    }

    struct FailingModel;

    #[async_trait]
    impl RiskModel for FailingModel {
        async fn predict(&self, _request: &MlRequest) -> ServiceResult<MlVerdict> {
            Err(ServiceError::UpstreamTimeout("ml gateway: 10s".into()))
        }
    }

    fn request(value: f64) -> AnalyzeRequest {
        AnalyzeRequest {
            from: FROM.into(),
            to: TO.into(),
            value,
            currency: "ETH".into(),
            tx_hash: format!("0xhash{value}"),
            network: "sepolia".into(),
            gas_price: 20.0,
            is_contract_interaction: false,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_feature_vector_shape() {
        let features = build_features(&WalletAnalytics::default(), 1.2);
        assert_eq!(features.len(), FEATURE_SLOTS);
        assert!(matches!(features[15], FeatureValue::Numeric(_)));
        assert!(matches!(features[16], FeatureValue::Text(_)));
        assert!(matches!(features[17], FeatureValue::Text(_)));
    }

    #[test]
    fn test_slot_nine_defaults_to_tx_value() {
        let features = build_features(&WalletAnalytics::default(), 1.2);
        assert_eq!(features[9], FeatureValue::Numeric(1.2));

        let analytics = WalletAnalytics {
            total_ether_sent: 40.0,
            ..Default::default()
        };
        let features = build_features(&analytics, 1.2);
        assert_eq!(features[9], FeatureValue::Numeric(40.0));
    }

    #[test]
    fn test_banding_thresholds() {
        assert_eq!(band(0.71, false), TxStatus::Blocked);
        assert_eq!(band(0.70, false), TxStatus::Suspicious);
        assert_eq!(band(0.31, false), TxStatus::Suspicious);
        assert_eq!(band(0.30, false), TxStatus::Safe);

        assert_eq!(band(0.51, true), TxStatus::Blocked);
        assert_eq!(band(0.50, true), TxStatus::Suspicious);
        assert_eq!(band(0.21, true), TxStatus::Suspicious);
        assert_eq!(band(0.20, true), TxStatus::Safe);
    }

    #[test]
    fn test_base_risk_mapping() {
        assert_eq!(base_risk(MlVerdict::Fraud), 0.85);
        assert_eq!(base_risk(MlVerdict::Suspicious), 0.50);
        assert_eq!(base_risk(MlVerdict::Safe), 0.10);
    }

    #[tokio::test]
    async fn test_fraud_with_no_dao_record_blocks() {
        let store = Arc::new(MemStore::new());
        let engine = RiskEngine::new(store, Arc::new(StubModel(MlVerdict::Fraud)), 10.0);

        let outcome = engine.analyze(request(1.2)).await.unwrap();
        assert_eq!(outcome.transaction.risk, 0.85);
        assert_eq!(outcome.transaction.status, TxStatus::Blocked);
        assert_eq!(outcome.dao_boost, 0.0);
    }

    #[tokio::test]
    async fn test_safe_with_confirmed_scam_boosts() {
        let store = Arc::new(MemStore::new());
        store
            .upsert_confirmed_scam(ConfirmedScam {
                address: TO.into(),
                scam_score: 80,
                proposal_id: 1,
                confirmed_at: Utc::now(),
                total_voters: 4,
                description: String::new(),
                tx_hash: None,
                block_number: None,
            })
            .await
            .unwrap();
        let engine = RiskEngine::new(store, Arc::new(StubModel(MlVerdict::Safe)), 10.0);

        let outcome = engine.analyze(request(1.2)).await.unwrap();
        assert_eq!(outcome.dao_boost, 0.40);
        assert!((outcome.transaction.risk - 0.50).abs() < 1e-9);
        assert_eq!(outcome.transaction.status, TxStatus::Suspicious);
    }

    #[tokio::test]
    async fn test_ml_failure_persists_nothing() {
        let store = Arc::new(MemStore::new());
        let engine = RiskEngine::new(store.clone(), Arc::new(FailingModel), 10.0);

        let err = engine.analyze(request(1.2)).await.unwrap_err();
        assert!(matches!(err, ServiceError::UpstreamTimeout(_)));

        let counts = store.transaction_counts().await.unwrap();
        assert_eq!(counts.total, 0);
    }

    #[tokio::test]
    async fn test_duplicate_hash_conflicts() {
        let store = Arc::new(MemStore::new());
        let engine = RiskEngine::new(store, Arc::new(StubModel(MlVerdict::Safe)), 10.0);

        engine.analyze(request(1.2)).await.unwrap();
        let err = engine.analyze(request(1.2)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_high_value_first_time_recipient_adds_risk() {
        let store = Arc::new(MemStore::new());
        let engine = RiskEngine::new(store, Arc::new(StubModel(MlVerdict::Suspicious)), 10.0);

        // 0.50 base + 0.2 first-time recipient = 0.70 > 0.5 high-value band.
        let outcome = engine.analyze(request(50.0)).await.unwrap();
        assert!((outcome.transaction.risk - 0.70).abs() < 1e-9);
        assert_eq!(outcome.transaction.status, TxStatus::Blocked);
    }

    #[tokio::test]
    async fn test_risk_never_exceeds_one() {
        let store = Arc::new(MemStore::new());
        store
            .upsert_confirmed_scam(ConfirmedScam {
                address: TO.into(),
                scam_score: 100,
                proposal_id: 1,
                confirmed_at: Utc::now(),
                total_voters: 9,
                description: String::new(),
                tx_hash: None,
                block_number: None,
            })
            .await
            .unwrap();
        let engine = RiskEngine::new(store, Arc::new(StubModel(MlVerdict::Fraud)), 10.0);

        // 0.85 + 0.5 + 0.3 + 0.2 clamps to 1.0.
        let outcome = engine.analyze(request(100.0)).await.unwrap();
        assert_eq!(outcome.transaction.risk, 1.0);
        assert_eq!(outcome.transaction.status, TxStatus::Blocked);
    }
}
