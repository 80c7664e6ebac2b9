//! HTTP adapter to the external ML risk model.
//!
//! Pure transport: builds the wire request, enforces the 10 s deadline,
//! maps the categorical prediction. No scoring semantics live here.

use crate::error::{ServiceError, ServiceResult};
use crate::fusion::FeatureValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ML_TIMEOUT: Duration = Duration::from_secs(10);

/// Categorical verdict returned by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlVerdict {
    Fraud,
    Suspicious,
    Safe,
}

impl MlVerdict {
    /// Unknown labels degrade to `Safe`; the DAO layer still applies its
    /// own boost on top.
    pub fn from_prediction(prediction: &str) -> Self {
        match prediction {
            "Fraud" => MlVerdict::Fraud,
            "Suspicious" => MlVerdict::Suspicious,
            _ => MlVerdict::Safe,
        }
    }
}

/// Wire request for the risk model.
#[derive(Debug, Clone, Serialize)]
pub struct MlRequest {
    pub from_address: String,
    pub to_address: String,
    pub transaction_value: f64,
    pub gas_price: f64,
    pub is_contract_interaction: bool,
    pub acc_holder: String,
    pub features: Vec<FeatureValue>,
}

#[derive(Debug, Deserialize)]
struct MlResponse {
    prediction: String,
}

/// Abstraction over the model endpoint so the fusion engine is testable
/// without the external service.
#[async_trait]
pub trait RiskModel: Send + Sync {
    async fn predict(&self, request: &MlRequest) -> ServiceResult<MlVerdict>;
}

/// Production HTTP client for the model endpoint.
pub struct MlGateway {
    client: reqwest::Client,
    url: String,
}

impl MlGateway {
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(ML_TIMEOUT).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl RiskModel for MlGateway {
    async fn predict(&self, request: &MlRequest) -> ServiceResult<MlVerdict> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::UpstreamTimeout(format!("ml gateway: {e}"))
                } else {
                    ServiceError::Upstream(format!("ml gateway: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::Upstream(format!(
                "ml gateway returned {}",
                response.status()
            )));
        }

        let body: MlResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(format!("ml gateway body: {e}")))?;

        Ok(MlVerdict::from_prediction(&body.prediction))
    }
}
