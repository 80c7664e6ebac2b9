//! Service-level error taxonomy and its HTTP translation.
//!
//! Handlers return [`ServiceError`]; the axum boundary maps each kind to a
//! status code and a `{"error": "..."}` body. Upstream error texts are
//! logged but never forwarded to clients unredacted.

use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::{error, warn};

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed address, empty description, illegal vote type.
    #[error("{0}")]
    Validation(String),

    /// Proposal / report / session absent.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate vote, duplicate tx hash.
    #[error("{0}")]
    Conflict(String),

    /// Missing or expired identity context.
    #[error("{0}")]
    Unauthorized(String),

    /// ML gateway or chain client exceeded its deadline. Results are not
    /// persisted, so the client must not retry blindly.
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Non-OK or undecodable response from ML or chain.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Datastore I/O failure.
    #[error("store error: {0}")]
    Store(String),
}

impl From<crate::chain::ChainError> for ServiceError {
    fn from(err: crate::chain::ChainError) -> Self {
        match err {
            crate::chain::ChainError::Timeout(op) => {
                ServiceError::UpstreamTimeout(format!("chain client: {op}"))
            }
            other => ServiceError::Upstream(format!("chain client: {other}")),
        }
    }
}

impl From<crate::abi::CodecError> for ServiceError {
    fn from(err: crate::abi::CodecError) -> Self {
        ServiceError::Upstream(format!("contract codec: {err}"))
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ServiceError::NotFound(msg),
            StoreError::Conflict(msg) => ServiceError::Conflict(msg),
            StoreError::InvalidInput(msg) => ServiceError::Validation(msg),
            StoreError::InvariantViolation(msg) => ServiceError::Validation(msg),
            StoreError::Serialization(msg) | StoreError::Backend(msg) => ServiceError::Store(msg),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServiceError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServiceError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ServiceError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ServiceError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            // 5xx kinds: log the detail, return a redacted message.
            ServiceError::UpstreamTimeout(detail) => {
                warn!(detail = %detail, "upstream deadline exceeded");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "risk analysis upstream timed out".to_string(),
                )
            }
            ServiceError::Upstream(detail) => {
                warn!(detail = %detail, "upstream failure");
                (
                    StatusCode::BAD_GATEWAY,
                    "risk analysis upstream unavailable".to_string(),
                )
            }
            ServiceError::Store(detail) => {
                error!(detail = %detail, "datastore failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal storage error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let err: ServiceError = StoreError::Conflict("already voted".into()).into();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let err: ServiceError = StoreError::NotFound("proposal 9".into()).into();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err: ServiceError = StoreError::Backend("pool closed".into()).into();
        assert!(matches!(err, ServiceError::Store(_)));
    }

    #[test]
    fn test_status_codes() {
        let resp = ServiceError::Validation("bad address".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ServiceError::Conflict("duplicate vote".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = ServiceError::UpstreamTimeout("ml 10s".into()).into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
