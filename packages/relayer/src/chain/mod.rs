//! Chain-side surface consumed by the relayer
//!
//! The bridge contract is treated as an opaque, address-keyed state machine:
//! it emits logs, answers `getTransaction`, and reports its chain height.
//! [`BridgeChain`] is one live connection to that surface; a
//! [`ChainConnector`] builds a fresh one for every connect or reconnect.

use async_trait::async_trait;
use eyre::{eyre, Result};
use futures::stream::BoxStream;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ChainEndpoint;
use crate::types::{BridgeEventKind, ChainId};

pub mod evm;

pub use evm::{EvmBridgeChain, EvmConnector};

/// Decoded payload of a bridge contract log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    TokenLocked {
        tx_id: String,
        user: String,
        token: String,
        amount: String,
        target_chain: ChainId,
        target_address: String,
    },
    TokenBurned {
        tx_id: String,
        user: String,
        token: String,
        amount: String,
    },
    BridgeCompleted {
        tx_id: String,
    },
}

/// A bridge log as observed on its origin chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedLog {
    pub payload: LogPayload,
    pub block_number: u64,
    pub transaction_hash: String,
}

impl ObservedLog {
    pub fn kind(&self) -> BridgeEventKind {
        match self.payload {
            LogPayload::TokenLocked { .. } => BridgeEventKind::TokenLocked,
            LogPayload::TokenBurned { .. } => BridgeEventKind::TokenBurned,
            LogPayload::BridgeCompleted { .. } => BridgeEventKind::BridgeCompleted,
        }
    }

    pub fn tx_id(&self) -> &str {
        match &self.payload {
            LogPayload::TokenLocked { tx_id, .. }
            | LogPayload::TokenBurned { tx_id, .. }
            | LogPayload::BridgeCompleted { tx_id } => tx_id,
        }
    }
}

/// Routing data of a bridge transaction record.
///
/// `target_chain == 0` means the contract has no record for the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub target_chain: ChainId,
    pub target_address: String,
}

/// Live log stream for one event kind. Ends when the transport fails.
pub type LogStream = BoxStream<'static, ObservedLog>;

/// One connection plus contract handle for a single chain
#[async_trait]
pub trait BridgeChain: Send + Sync {
    /// Chain this connection is bound to
    fn chain_id(&self) -> ChainId;

    /// Current chain height
    async fn block_number(&self) -> Result<u64>;

    /// Read the contract's transaction record for `tx_id`
    async fn get_transaction(&self, tx_id: &str) -> Result<TransactionRecord>;

    /// Historical logs of one kind in `[from_block, to_block]`
    async fn query_logs(
        &self,
        kind: BridgeEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ObservedLog>>;

    /// Subscribe to new logs of one kind
    async fn watch(&self, kind: BridgeEventKind) -> Result<LogStream>;
}

/// Builds connections; every call yields a brand-new connection
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn connect(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn BridgeChain>>;
}

/// Bound a single RPC call
pub async fn with_timeout<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(eyre!("{} timed out after {:?}", what, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observed_log_kind_and_id() {
        let log = ObservedLog {
            payload: LogPayload::TokenBurned {
                tx_id: "0xabc".to_string(),
                user: "0xuser".to_string(),
                token: "0xtoken".to_string(),
                amount: "5".to_string(),
            },
            block_number: 7,
            transaction_hash: "0xhash".to_string(),
        };
        assert_eq!(log.kind(), BridgeEventKind::TokenBurned);
        assert_eq!(log.tx_id(), "0xabc");

        let completed = ObservedLog {
            payload: LogPayload::BridgeCompleted {
                tx_id: "0xdef".to_string(),
            },
            ..log
        };
        assert_eq!(completed.kind(), BridgeEventKind::BridgeCompleted);
        assert_eq!(completed.tx_id(), "0xdef");
    }

    #[test]
    fn test_with_timeout_passes_result_through() {
        let value = tokio_test::assert_ok!(tokio_test::block_on(with_timeout(
            Duration::from_secs(1),
            "probe",
            async { Ok(42u64) }
        )));
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let err = with_timeout(Duration::from_millis(50), "block height", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(1u64)
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("block height timed out"));
    }
}
