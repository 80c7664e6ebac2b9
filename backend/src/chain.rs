//! Thin EVM transport layer.
//!
//! [`ChainClient`] wraps a request/response JSON-RPC provider,
//! [`ChainSubscriber`] a streaming one. Every operation runs under a
//! deadline; transport errors surface to the caller, who owns reconnects.
//! The event bridge holds its own client, never shared with request
//! handlers; oracle handlers dial short-lived clients per request.

use ethers::providers::{Http, Middleware, Provider, SubscriptionStream, Ws};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, Filter, Log, TransactionRequest, H256};
use std::time::Duration;
use thiserror::Error;

/// Default per-operation deadline for `call` and `dial`.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline for establishing either transport.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("dial failed: {0}")]
    Dial(String),

    #[error("deadline exceeded during {0}")]
    Timeout(String),

    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Request/response JSON-RPC client.
#[derive(Debug, Clone)]
pub struct ChainClient {
    provider: Provider<Http>,
    timeout: Duration,
}

impl ChainClient {
    pub fn dial(url: &str) -> Result<Self, ChainError> {
        let provider =
            Provider::<Http>::try_from(url).map_err(|e| ChainError::Dial(e.to_string()))?;
        Ok(Self {
            provider,
            timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let fut = self.provider.get_block_number();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(number)) => Ok(number.as_u64()),
            Ok(Err(e)) => Err(ChainError::Rpc(e.to_string())),
            Err(_) => Err(ChainError::Timeout("block_number".into())),
        }
    }

    /// `eth_call` against the latest block.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        let fut = self.provider.call(&tx, None);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ChainError::Rpc(e.to_string())),
            Err(_) => Err(ChainError::Timeout("call".into())),
        }
    }

    /// `eth_getLogs` over an inclusive block range, filtered by contract
    /// address and topic 0.
    pub async fn filter_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: Address,
        topic0: H256,
    ) -> Result<Vec<Log>, ChainError> {
        let filter = Filter::new()
            .from_block(BlockNumber::Number(from_block.into()))
            .to_block(BlockNumber::Number(to_block.into()))
            .address(address)
            .topic0(topic0);
        let fut = self.provider.get_logs(&filter);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(logs)) => Ok(logs),
            Ok(Err(e)) => Err(ChainError::Rpc(e.to_string())),
            Err(_) => Err(ChainError::Timeout("filter_logs".into())),
        }
    }
}

/// Streaming JSON-RPC client for log subscriptions.
#[derive(Debug, Clone)]
pub struct ChainSubscriber {
    provider: Provider<Ws>,
}

impl ChainSubscriber {
    pub async fn dial(url: &str) -> Result<Self, ChainError> {
        let connect = Ws::connect(url.to_string());
        let ws = match tokio::time::timeout(DIAL_TIMEOUT, connect).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => return Err(ChainError::Dial(e.to_string())),
            Err(_) => return Err(ChainError::Timeout("ws dial".into())),
        };
        Ok(Self {
            provider: Provider::new(ws),
        })
    }

    /// `eth_subscribe("logs", ...)` filtered by contract address and
    /// topic 0. The stream borrows this subscriber; dropping either ends
    /// the subscription.
    pub async fn subscribe_logs(
        &self,
        address: Address,
        topic0: H256,
    ) -> Result<SubscriptionStream<'_, Ws, Log>, ChainError> {
        let filter = Filter::new().address(address).topic0(topic0);
        self.provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_rejects_malformed_url() {
        assert!(matches!(
            ChainClient::dial("not a url"),
            Err(ChainError::Dial(_))
        ));
    }

    #[test]
    fn test_dial_accepts_http_url() {
        assert!(ChainClient::dial("http://127.0.0.1:8545").is_ok());
    }

    #[tokio::test]
    async fn test_call_times_out_against_unroutable_endpoint() {
        // RFC 5737 TEST-NET address: connect attempts hang or fail fast.
        let client = ChainClient::dial("http://192.0.2.1:8545")
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        let result = client.block_number().await;
        assert!(matches!(
            result,
            Err(ChainError::Timeout(_)) | Err(ChainError::Rpc(_))
        ));
    }
}
