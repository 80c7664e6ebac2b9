//! HTTP surface for the Palisade backend.
//!
//! Handlers translate typed service errors to status codes at this
//! boundary; bodies use the `{"error": "..."}` shape on failure. Address
//! path/query parameters are validated as 42-char `0x…` hex before any
//! work happens. Authenticated routes read the caller address from the
//! `X-User-Address` header (bearer validation happens upstream of the
//! core).

use crate::auth;
use crate::error::{ServiceError, ServiceResult};
use crate::fusion::{AnalyzeRequest, RiskEngine};
use crate::governance::{CastVote, CreateProposal, GovernanceEngine};
use crate::identity::{DeviceContext, IdentityManager, VerifyOutcome};
use crate::oracle::{Confidence, ThreatOracle};
use crate::schema::{
    is_valid_address, normalize_address, IdentitySession, NewRecovery, NewReport, Proposal,
    Recovery, Report, ReportStatus, Transaction, TxCounts,
};
use crate::store::{Page, Store};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub governance: GovernanceEngine,
    pub risk: RiskEngine,
    pub identity: IdentityManager,
    pub oracle: Option<ThreatOracle>,
    pub environment: String,
}

// ── Request / response types ────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    pub from: String,
    pub to: String,
    pub value: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub tx_hash: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub gas_price: f64,
    #[serde(default)]
    pub is_contract_interaction: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_currency() -> String {
    "ETH".to_string()
}

fn default_network() -> String {
    "sepolia".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxResponse {
    pub status: &'static str,
    pub risk_score: f64,
    pub analysis: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsResponse {
    pub address: String,
    pub transactions: Vec<Transaction>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub address: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    fn to_page(&self) -> Page {
        let limit = self.limit.unwrap_or(50).clamp(1, 200);
        let page = self.page.unwrap_or(1).max(1);
        Page {
            limit,
            offset: (page - 1) * limit,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRequest {
    pub suspicious_address: String,
    pub creator_address: Option<String>,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub proposal_id: i64,
    pub voter_address: Option<String>,
    pub vote_type: String,
    #[serde(default = "default_tokens")]
    pub tokens: i64,
}

fn default_tokens() -> i64 {
    1
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScamScoreResponse {
    pub is_scam: bool,
    pub scam_score: i64,
    pub source: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleScoreResponse {
    pub score: u64,
    pub risk_label: &'static str,
    pub risk_color: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleCheckResponse {
    pub is_confirmed_scam: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleConfidenceResponse {
    pub votes_for: u64,
    pub votes_against: u64,
    pub total_voters: u64,
    pub confidence_percent: f64,
}

impl From<Confidence> for OracleConfidenceResponse {
    fn from(confidence: Confidence) -> Self {
        Self {
            votes_for: confidence.votes_for,
            votes_against: confidence.votes_against,
            total_voters: confidence.total_voters,
            confidence_percent: confidence.confidence_percent,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleFullResponse {
    pub address: String,
    pub score: u64,
    pub risk_label: &'static str,
    pub risk_color: &'static str,
    pub is_confirmed_scam: bool,
    pub confidence: OracleConfidenceResponse,
    pub explanation: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub user_address: Option<String>,
    #[serde(default)]
    pub device_info: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub user_address: Option<String>,
    pub gatepass: String,
    #[serde(default)]
    pub device_info: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub geo_location: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_address: String,
    pub gatepass: String,
    pub status: &'static str,
    pub security_level: i32,
    pub risk_score: f64,
    pub flags: Vec<String>,
    pub token_expiry: chrono::DateTime<chrono::Utc>,
    pub message: Option<&'static str>,
}

impl SessionResponse {
    fn from_session(session: IdentitySession, message: Option<&'static str>) -> Self {
        Self {
            user_address: session.user_address,
            gatepass: session.gatepass,
            status: session.status.as_str(),
            security_level: session.security_level,
            risk_score: session.risk_score,
            flags: session.flags,
            token_expiry: session.token_expiry,
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub reported_address: String,
    pub reporter_address: Option<String>,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub evidence: String,
    pub severity: Option<i32>,
    /// Optional signed-nonce proof of the reporter address.
    pub nonce: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatusRequest {
    pub status: String,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRequest {
    pub user_address: Option<String>,
    pub new_address: String,
    #[serde(default)]
    pub reason: String,
}

// ── Router ──────────────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/firewall/tx", post(analyze_tx))
        .route("/api/firewall/stats", get(firewall_stats))
        .route("/api/transactions", get(transactions_by_address))
        .route("/api/dao/proposals", get(list_proposals).post(create_proposal))
        .route("/api/dao/vote", post(cast_vote))
        .route("/api/dao/scamscore/:address", get(scam_score))
        .route("/api/oracle/score/:address", get(oracle_score))
        .route("/api/oracle/check/:address", get(oracle_check))
        .route("/api/oracle/confidence/:address", get(oracle_confidence))
        .route("/api/oracle/full/:address", get(oracle_full))
        .route("/api/auth/nonce/:address", get(auth_nonce))
        .route("/api/auth/civic/initiate", post(civic_initiate))
        .route("/api/auth/civic/verify", post(civic_verify))
        .route("/api/auth/civic/status", get(civic_status))
        .route("/api/report", post(submit_report))
        .route("/api/report/:id/status", post(update_report_status))
        .route("/api/recovery", get(list_recoveries).post(request_recovery))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Validate and normalize an address parameter.
fn validated_address(address: &str) -> ServiceResult<String> {
    if !is_valid_address(address) {
        return Err(ServiceError::Validation(format!(
            "invalid address: {address}"
        )));
    }
    Ok(normalize_address(address))
}

/// Caller address from the `X-User-Address` header, set by the outer auth
/// layer, falling back to an explicit body field.
fn caller_address(headers: &HeaderMap, body_address: Option<&str>) -> ServiceResult<String> {
    let raw = headers
        .get("x-user-address")
        .and_then(|v| v.to_str().ok())
        .or(body_address)
        .ok_or_else(|| ServiceError::Unauthorized("caller address missing".into()))?;
    validated_address(raw)
}

fn oracle<'a>(state: &'a AppState) -> ServiceResult<&'a ThreatOracle> {
    state
        .oracle
        .as_ref()
        .ok_or_else(|| ServiceError::Upstream("threat oracle is not configured".into()))
}

// ── Handlers ────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "environment": state.environment,
    }))
}

async fn analyze_tx(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TxRequest>,
) -> ServiceResult<Json<TxResponse>> {
    let outcome = state
        .risk
        .analyze(AnalyzeRequest {
            from: request.from,
            to: request.to,
            value: request.value,
            currency: request.currency,
            tx_hash: request.tx_hash,
            network: request.network,
            gas_price: request.gas_price,
            is_contract_interaction: request.is_contract_interaction,
            metadata: request.metadata,
        })
        .await?;

    Ok(Json(TxResponse {
        status: outcome.transaction.status.as_str(),
        risk_score: outcome.transaction.risk,
        analysis: outcome.analysis,
    }))
}

async fn firewall_stats(State(state): State<Arc<AppState>>) -> ServiceResult<Json<TxCounts>> {
    Ok(Json(state.store.transaction_counts().await?))
}

async fn transactions_by_address(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ServiceResult<Json<TransactionsResponse>> {
    let address = query
        .address
        .as_deref()
        .ok_or_else(|| ServiceError::Validation("address query parameter is required".into()))?;
    let address = validated_address(address)?;

    let transactions = state
        .store
        .transactions_by_address(&address, query.to_page())
        .await?;
    let count = transactions.len();
    Ok(Json(TransactionsResponse {
        address,
        transactions,
        count,
    }))
}

async fn list_proposals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ServiceResult<Json<Vec<Proposal>>> {
    Ok(Json(state.governance.list_proposals(query.to_page()).await?))
}

async fn create_proposal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ProposalRequest>,
) -> ServiceResult<Json<Proposal>> {
    let creator = caller_address(&headers, request.creator_address.as_deref())?;
    let proposal = state
        .governance
        .create_proposal(CreateProposal {
            suspicious_address: request.suspicious_address,
            creator_address: creator,
            title: request.title,
            description: request.description,
            evidence: request.evidence,
        })
        .await?;
    Ok(Json(proposal))
}

async fn cast_vote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<VoteRequest>,
) -> ServiceResult<Json<Proposal>> {
    let voter = caller_address(&headers, request.voter_address.as_deref())?;
    let proposal = state
        .governance
        .cast_vote(CastVote {
            proposal_id: request.proposal_id,
            voter_address: voter,
            vote_type: request.vote_type,
            tokens: request.tokens,
        })
        .await?;
    Ok(Json(proposal))
}

async fn scam_score(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ServiceResult<Json<ScamScoreResponse>> {
    let address = validated_address(&address)?;
    let status = state.governance.scam_status(&address).await?;
    Ok(Json(ScamScoreResponse {
        is_scam: status.is_scam,
        scam_score: status.scam_score,
        source: status.source,
    }))
}

async fn oracle_score(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ServiceResult<Json<OracleScoreResponse>> {
    let address = validated_address(&address)?;
    let score = oracle(&state)?.get_threat_score(&address).await?;
    Ok(Json(OracleScoreResponse {
        score,
        risk_label: crate::oracle::risk_label(score),
        risk_color: crate::oracle::risk_color(score),
    }))
}

async fn oracle_check(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ServiceResult<Json<OracleCheckResponse>> {
    let address = validated_address(&address)?;
    let is_confirmed_scam = oracle(&state)?.is_confirmed_scam(&address).await?;
    Ok(Json(OracleCheckResponse { is_confirmed_scam }))
}

async fn oracle_confidence(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ServiceResult<Json<OracleConfidenceResponse>> {
    let address = validated_address(&address)?;
    let confidence = oracle(&state)?.get_dao_confidence(&address).await?;
    Ok(Json(confidence.into()))
}

async fn oracle_full(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ServiceResult<Json<OracleFullResponse>> {
    let address = validated_address(&address)?;
    let report = oracle(&state)?.get_full_report(&address).await?;
    Ok(Json(OracleFullResponse {
        address: report.address,
        score: report.score,
        risk_label: report.risk_label,
        risk_color: report.risk_color,
        is_confirmed_scam: report.is_confirmed_scam,
        confidence: report.confidence.into(),
        explanation: report.explanation,
    }))
}

async fn auth_nonce(Path(address): Path<String>) -> ServiceResult<Json<serde_json::Value>> {
    let address = validated_address(&address)?;
    let nonce = auth::issue_nonce(&address);
    Ok(Json(serde_json::json!({ "nonce": nonce })))
}

async fn civic_initiate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<InitiateRequest>,
) -> ServiceResult<Json<SessionResponse>> {
    let user = caller_address(&headers, request.user_address.as_deref())?;
    let session = state.identity.initiate(&user, &request.device_info).await?;
    Ok(Json(SessionResponse::from_session(session, None)))
}

async fn civic_verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<VerifyRequest>,
) -> ServiceResult<Json<SessionResponse>> {
    let user = caller_address(&headers, request.user_address.as_deref())?;
    let outcome = state
        .identity
        .verify(
            &user,
            &request.gatepass,
            DeviceContext {
                device_info: request.device_info,
                ip_address: request.ip_address,
                geo_location: request.geo_location,
            },
        )
        .await?;

    Ok(Json(match outcome {
        VerifyOutcome::Verified(session) => SessionResponse::from_session(session, None),
        VerifyOutcome::AdditionalVerificationRequired(session) => {
            SessionResponse::from_session(session, Some("additional verification required"))
        }
    }))
}

async fn civic_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ServiceResult<Json<SessionResponse>> {
    let user = caller_address(&headers, query.address.as_deref())?;
    let session = state.identity.session_status(&user).await?;
    Ok(Json(SessionResponse::from_session(session, None)))
}

async fn submit_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ReportRequest>,
) -> ServiceResult<Json<Report>> {
    let reporter = caller_address(&headers, request.reporter_address.as_deref())?;
    let reported = validated_address(&request.reported_address)?;
    if request.description.trim().is_empty() {
        return Err(ServiceError::Validation("report description is required".into()));
    }

    // Optional signed-nonce proof binds the report to the reporter key.
    if let (Some(nonce), Some(signature)) = (&request.nonce, &request.signature) {
        if !auth::verify_signed_nonce(&reporter, nonce, signature)? {
            return Err(ServiceError::Unauthorized(
                "reporter signature rejected".into(),
            ));
        }
    }

    let severity = request.severity.unwrap_or(3).clamp(1, 5);
    let priority = match severity {
        5 => "critical",
        4 => "high",
        3 => "medium",
        _ => "low",
    };

    let report = state
        .store
        .insert_report(NewReport {
            reported_address: reported,
            reporter_address: reporter,
            category: request.category,
            description: request.description,
            evidence: request.evidence,
            severity,
            priority: priority.to_string(),
            requires_immediate: severity >= 5,
        })
        .await?;
    Ok(Json(report))
}

/// Admin verification or the on-chain submission outcome moves a report
/// through its lifecycle.
async fn update_report_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<ReportStatusRequest>,
) -> ServiceResult<Json<Report>> {
    // Authenticated: the outer layer vouches for the admin identity.
    caller_address(&headers, None)?;

    let status = ReportStatus::parse(&request.status).ok_or_else(|| {
        ServiceError::Validation(format!("unknown report status: {}", request.status))
    })?;
    state
        .store
        .update_report_status(id, status, request.tx_hash)
        .await?;
    let report = state
        .store
        .get_report(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("report {id} not found")))?;
    Ok(Json(report))
}

async fn request_recovery(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RecoveryRequest>,
) -> ServiceResult<Json<Recovery>> {
    let user = caller_address(&headers, request.user_address.as_deref())?;
    let new_address = validated_address(&request.new_address)?;
    let recovery = state
        .store
        .insert_recovery(NewRecovery {
            user_address: user,
            new_address,
            reason: request.reason,
        })
        .await?;
    Ok(Json(recovery))
}

async fn list_recoveries(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ServiceResult<Json<Vec<Recovery>>> {
    let user = caller_address(&headers, query.address.as_deref())?;
    Ok(Json(state.store.recoveries_for(&user).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_request_accepts_camel_case() {
        let request: TxRequest = serde_json::from_str(
            r#"{
                "from": "0x1111111111111111111111111111111111111111",
                "to": "0x2222222222222222222222222222222222222222",
                "value": 1.2,
                "txHash": "0xabc"
            }"#,
        )
        .unwrap();
        assert_eq!(request.currency, "ETH");
        assert_eq!(request.network, "sepolia");
        assert_eq!(request.tx_hash, "0xabc");
        assert!(!request.is_contract_interaction);
    }

    #[test]
    fn test_tx_response_serializes_camel_case() {
        let response = TxResponse {
            status: "blocked",
            risk_score: 0.85,
            analysis: vec!["ml verdict: Fraud".into()],
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"riskScore\":0.85"));
        assert!(json.contains("\"status\":\"blocked\""));
    }

    #[test]
    fn test_scam_score_response_shape() {
        let json = serde_json::to_string(&ScamScoreResponse {
            is_scam: true,
            scam_score: 88,
            source: "on_chain_sync",
        })
        .unwrap();
        assert!(json.contains("\"isScam\":true"));
        assert!(json.contains("\"scamScore\":88"));
        assert!(json.contains("\"source\":\"on_chain_sync\""));
    }

    #[test]
    fn test_page_query_defaults() {
        let query = PageQuery {
            address: None,
            page: None,
            limit: None,
        };
        let page = query.to_page();
        assert_eq!(page.limit, 50);
        assert_eq!(page.offset, 0);

        let query = PageQuery {
            address: None,
            page: Some(3),
            limit: Some(20),
        };
        let page = query.to_page();
        assert_eq!(page.limit, 20);
        assert_eq!(page.offset, 40);
    }

    #[test]
    fn test_caller_address_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-user-address",
            "0x1111111111111111111111111111111111111111".parse().unwrap(),
        );
        let address = caller_address(
            &headers,
            Some("0x2222222222222222222222222222222222222222"),
        )
        .unwrap();
        assert_eq!(address, "0x1111111111111111111111111111111111111111");
    }

    #[test]
    fn test_caller_address_missing_is_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(
            caller_address(&headers, None),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_validated_address_normalizes() {
        let address =
            validated_address("0xABCDEF1234567890ABCDEF1234567890ABCDEF12").unwrap();
        assert_eq!(address, "0xabcdef1234567890abcdef1234567890abcdef12");
        assert!(validated_address("0x123").is_err());
    }
}
