//! Identity session manager.
//!
//! Short-lived verification sessions keyed by an opaque gatepass. Sessions
//! live only in the datastore; no in-process map is authoritative. Every
//! verification attempt appends an audit log row regardless of outcome.

use crate::error::{ServiceError, ServiceResult};
use crate::schema::{
    is_valid_address, normalize_address, IdentitySession, SessionStatus, VerificationLog,
};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};
use uuid::Uuid;

/// Session lifetime from initiation.
const TOKEN_TTL_HOURS: i64 = 24;

/// External attestation deadline.
const ATTESTATION_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Risk-flag weights: multiple devices, rapid attempts, geo change.
const WEIGHT_DEVICES: f64 = 0.3;
const WEIGHT_RAPID: f64 = 0.4;
const WEIGHT_GEO: f64 = 0.2;

/// Hash of the caller-supplied device fingerprint.
pub fn device_hash(device_info: &str) -> String {
    hex::encode(Sha256::digest(device_info.as_bytes()))
}

/// Caller context accompanying a verification attempt.
#[derive(Debug, Clone, Default)]
pub struct DeviceContext {
    pub device_info: String,
    pub ip_address: String,
    pub geo_location: String,
}

/// Outcome of a verification attempt.
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Verified(IdentitySession),
    AdditionalVerificationRequired(IdentitySession),
}

/// External identity validator.
#[async_trait]
pub trait AttestationClient: Send + Sync {
    async fn validate(&self, user_address: &str, gatepass: &str) -> ServiceResult<bool>;
}

/// HTTP attestation client. An empty endpoint passes every attestation
/// through, which keeps development database-and-network-free. The
/// deployed SBT and verifier contract addresses ride along so the
/// attestation service knows which deployment to check against.
pub struct HttpAttestation {
    client: reqwest::Client,
    url: String,
    sbt_contract: String,
    verifier_contract: String,
}

impl HttpAttestation {
    pub fn new(
        url: String,
        sbt_contract: String,
        verifier_contract: String,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ATTESTATION_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url,
            sbt_contract,
            verifier_contract,
        })
    }
}

#[async_trait]
impl AttestationClient for HttpAttestation {
    async fn validate(&self, user_address: &str, gatepass: &str) -> ServiceResult<bool> {
        if self.url.is_empty() {
            return Ok(true);
        }

        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "userAddress": user_address,
                "gatepass": gatepass,
                "sbtContract": self.sbt_contract,
                "verifierContract": self.verifier_contract,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::UpstreamTimeout(format!("attestation: {e}"))
                } else {
                    ServiceError::Upstream(format!("attestation: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::Upstream(format!(
                "attestation returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(format!("attestation body: {e}")))?;
        Ok(body.get("valid").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

pub struct IdentityManager {
    store: Arc<dyn Store>,
    attestor: Arc<dyn AttestationClient>,
}

impl IdentityManager {
    pub fn new(store: Arc<dyn Store>, attestor: Arc<dyn AttestationClient>) -> Self {
        Self { store, attestor }
    }

    /// Start (or resume) a verification session. An unexpired verified
    /// session is returned as-is; otherwise a fresh pending session is
    /// minted with a 24 h gatepass.
    pub async fn initiate(
        &self,
        user_address: &str,
        device_info: &str,
    ) -> ServiceResult<IdentitySession> {
        if !is_valid_address(user_address) {
            return Err(ServiceError::Validation(format!(
                "invalid user address: {user_address}"
            )));
        }
        let user = normalize_address(user_address);
        let now = Utc::now();

        if let Some(session) = self.store.active_verified_session(&user, now).await? {
            info!(user = %user, "reusing active verified session");
            return Ok(session);
        }

        let session = IdentitySession {
            id: 0,
            user_address: user.clone(),
            gatepass: Uuid::new_v4().to_string(),
            status: SessionStatus::Pending,
            security_level: 1,
            device_hash: device_hash(device_info),
            risk_score: 0.0,
            flags: Vec::new(),
            token_expiry: now + Duration::hours(TOKEN_TTL_HOURS),
            last_verified: None,
            created_at: now,
        };
        let session = self.store.insert_session(session).await?;
        info!(user = %user, session_id = session.id, "verification session initiated");
        Ok(session)
    }

    /// Verify a pending session against the external attestor, then score
    /// the attempt's risk flags.
    pub async fn verify(
        &self,
        user_address: &str,
        gatepass: &str,
        context: DeviceContext,
    ) -> ServiceResult<VerifyOutcome> {
        let user = normalize_address(user_address);
        let now = Utc::now();

        let Some(mut session) = self.store.session_by_gatepass(&user, gatepass).await? else {
            self.log_attempt(&user, &context, false, now).await;
            return Err(ServiceError::NotFound("verification session not found".into()));
        };

        if session.token_expiry < now {
            session.status = SessionStatus::Expired;
            self.store.update_session(&session).await?;
            self.log_attempt(&user, &context, false, now).await;
            return Err(ServiceError::Unauthorized("verification session expired".into()));
        }

        let valid = self.attestor.validate(&user, gatepass).await?;
        if !valid {
            warn!(user = %user, "attestation rejected");
            self.log_attempt(&user, &context, false, now).await;
            return Err(ServiceError::Unauthorized("identity attestation rejected".into()));
        }

        let (risk_score, flags) = self.risk_flags(&user, &context, now).await?;
        session.risk_score = risk_score;
        session.flags = flags;
        session.device_hash = device_hash(&context.device_info);

        if risk_score > 0.7 {
            session.status = SessionStatus::NeedsAdditionalVerification;
            session.security_level = 3;
            self.store.update_session(&session).await?;
            self.log_attempt(&user, &context, false, now).await;
            info!(user = %user, risk_score, "additional verification required");
            return Ok(VerifyOutcome::AdditionalVerificationRequired(session));
        }

        session.status = SessionStatus::Verified;
        session.last_verified = Some(now);
        self.store.update_session(&session).await?;
        self.log_attempt(&user, &context, true, now).await;
        info!(user = %user, risk_score, "identity verified");
        Ok(VerifyOutcome::Verified(session))
    }

    /// Latest session for status lookups; lapsed tokens read as expired.
    pub async fn session_status(&self, user_address: &str) -> ServiceResult<IdentitySession> {
        let user = normalize_address(user_address);
        let mut session = self
            .store
            .latest_session(&user)
            .await?
            .ok_or_else(|| ServiceError::NotFound("no verification session".into()))?;
        if session.token_expiry < Utc::now() {
            session.status = SessionStatus::Expired;
        }
        Ok(session)
    }

    /// Score the attempt: multiple devices (A, 0.3), rapid attempts
    /// (B, 0.4), geo change (C, 0.2); `risk = min(1, 0.3A + 0.4B + 0.2C)`.
    async fn risk_flags(
        &self,
        user: &str,
        context: &DeviceContext,
        now: DateTime<Utc>,
    ) -> ServiceResult<(f64, Vec<String>)> {
        let mut flags = Vec::new();
        let mut risk = 0.0;

        if self.store.distinct_device_count(user).await? >= 3 {
            flags.push("multiple_devices_detected".to_string());
            risk += WEIGHT_DEVICES;
        }

        let window_start = now - Duration::minutes(5);
        if self.store.verification_count_since(user, window_start).await? >= 6 {
            flags.push("rapid_verification_attempts".to_string());
            risk += WEIGHT_RAPID;
        }

        if let Some(last_geo) = self.store.last_geo_location(user).await? {
            if !last_geo.is_empty()
                && !context.geo_location.is_empty()
                && last_geo != context.geo_location
            {
                flags.push("location_change_detected".to_string());
                risk += WEIGHT_GEO;
            }
        }

        Ok((risk.min(1.0), flags))
    }

    async fn log_attempt(
        &self,
        user: &str,
        context: &DeviceContext,
        success: bool,
        now: DateTime<Utc>,
    ) {
        let log = VerificationLog {
            user_address: user.to_string(),
            verification_type: "civic".to_string(),
            success,
            device_info: context.device_info.clone(),
            ip_address: context.ip_address.clone(),
            geo_location: context.geo_location.clone(),
            created_at: now,
        };
        // The audit trail must not fail the attempt itself.
        if let Err(e) = self.store.append_verification_log(log).await {
            warn!(user = %user, error = %e, "failed to append verification log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    const USER: &str = "0x4444444444444444444444444444444444444444";

    struct StubAttestor(bool);

    #[async_trait]
    impl AttestationClient for StubAttestor {
        async fn validate(&self, _user: &str, _gatepass: &str) -> ServiceResult<bool> {
            Ok(self.0)
        }
    }

    fn manager(store: Arc<MemStore>, accept: bool) -> IdentityManager {
        IdentityManager::new(store, Arc::new(StubAttestor(accept)))
    }

    fn context(geo: &str) -> DeviceContext {
        DeviceContext {
            device_info: "Mozilla/5.0 test".into(),
            ip_address: "203.0.113.9".into(),
            geo_location: geo.into(),
        }
    }

    #[test]
    fn test_device_hash_is_sha256_hex() {
        let hash = device_hash("device-a");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, device_hash("device-b"));
    }

    #[tokio::test]
    async fn test_initiate_mints_pending_session() {
        let store = Arc::new(MemStore::new());
        let session = manager(store, true)
            .initiate(USER, "device-a")
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.user_address, USER);
        assert!(!session.gatepass.is_empty());
        assert!(session.token_expiry > Utc::now());
    }

    #[tokio::test]
    async fn test_initiate_reuses_verified_session() {
        let store = Arc::new(MemStore::new());
        let manager = manager(store, true);

        let session = manager.initiate(USER, "device-a").await.unwrap();
        let outcome = manager
            .verify(USER, &session.gatepass, context("US"))
            .await
            .unwrap();
        let VerifyOutcome::Verified(verified) = outcome else {
            panic!("expected verified outcome");
        };

        let reused = manager.initiate(USER, "device-a").await.unwrap();
        assert_eq!(reused.id, verified.id);
        assert_eq!(reused.status, SessionStatus::Verified);
    }

    #[tokio::test]
    async fn test_verify_unknown_gatepass_is_not_found_and_logged() {
        let store = Arc::new(MemStore::new());
        let manager = manager(store.clone(), true);

        let err = manager
            .verify(USER, "no-such-gatepass", context("US"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let attempts = store
            .verification_count_since(USER, Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_verify_rejected_attestation() {
        let store = Arc::new(MemStore::new());
        let manager = manager(store, false);

        let session = manager.initiate(USER, "device-a").await.unwrap();
        let err = manager
            .verify(USER, &session.gatepass, context("US"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_all_three_flags_demand_additional_verification() {
        let store = Arc::new(MemStore::new());
        let manager = manager(store.clone(), true);

        // Three distinct devices.
        manager.initiate(USER, "device-a").await.unwrap();
        manager.initiate(USER, "device-b").await.unwrap();
        let session = manager.initiate(USER, "device-c").await.unwrap();

        // Six recent attempts from geo "US".
        for _ in 0..6 {
            let _ = manager.verify(USER, "bogus", context("US")).await;
        }

        // Seventh attempt from a new geo: A + B + C = 0.9 > 0.7.
        let outcome = manager
            .verify(USER, &session.gatepass, context("DE"))
            .await
            .unwrap();
        let VerifyOutcome::AdditionalVerificationRequired(session) = outcome else {
            panic!("expected additional verification");
        };
        assert_eq!(session.status, SessionStatus::NeedsAdditionalVerification);
        assert_eq!(session.security_level, 3);
        assert!((session.risk_score - 0.9).abs() < 1e-9);
        assert_eq!(session.flags.len(), 3);
    }

    #[tokio::test]
    async fn test_session_status_reports_expiry() {
        let store = Arc::new(MemStore::new());
        let manager = manager(store.clone(), true);

        let mut session = manager.initiate(USER, "device-a").await.unwrap();
        session.token_expiry = Utc::now() - Duration::hours(1);
        store.update_session(&session).await.unwrap();

        let status = manager.session_status(USER).await.unwrap();
        assert_eq!(status.status, SessionStatus::Expired);
    }
}
