use alloy::primitives::{Address, FixedBytes};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::Log;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use futures::StreamExt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{with_timeout, BridgeChain, ChainConnector, LogPayload, LogStream, ObservedLog, TransactionRecord};
use crate::config::ChainEndpoint;
use crate::contracts::Bridge;
use crate::types::{bytes32_to_hex, hex_to_bytes32, BridgeEventKind, ChainId};

/// Bridge contract on an EVM chain, reached over HTTP JSON-RPC
pub struct EvmBridgeChain {
    chain_id: ChainId,
    provider: RootProvider<Http<Client>>,
    bridge_address: Address,
    rpc_timeout: Duration,
}

impl EvmBridgeChain {
    /// Create a new connection for `endpoint`
    pub fn new(endpoint: &ChainEndpoint, rpc_timeout: Duration) -> Result<Self> {
        let rpc_url = endpoint
            .rpc_url
            .as_deref()
            .ok_or_else(|| eyre!("Chain {} has no RPC URL", endpoint.chain_id))?;
        let url = rpc_url
            .parse()
            .wrap_err_with(|| format!("Invalid RPC URL: {}", rpc_url))?;
        let provider = ProviderBuilder::new().on_http(url);

        let bridge_address = endpoint
            .bridge_address
            .as_deref()
            .ok_or_else(|| eyre!("Chain {} has no bridge address", endpoint.chain_id))?;
        let bridge_address =
            Address::from_str(bridge_address).wrap_err("Invalid bridge address")?;

        Ok(Self {
            chain_id: endpoint.chain_id,
            provider,
            bridge_address,
            rpc_timeout,
        })
    }
}

#[async_trait]
impl BridgeChain for EvmBridgeChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64> {
        with_timeout(self.rpc_timeout, "eth_blockNumber", async {
            self.provider
                .get_block_number()
                .await
                .wrap_err("Failed to get block number")
        })
        .await
    }

    async fn get_transaction(&self, tx_id: &str) -> Result<TransactionRecord> {
        let id = FixedBytes::<32>::from(hex_to_bytes32(tx_id)?);
        let contract = Bridge::new(self.bridge_address, &self.provider);

        let record = with_timeout(self.rpc_timeout, "getTransaction", async {
            contract
                .getTransaction(id)
                .call()
                .await
                .wrap_err_with(|| format!("Failed to get transaction details for {}", tx_id))
        })
        .await?;

        let target_chain: ChainId = record
            .targetChain
            .try_into()
            .map_err(|_| eyre!("Target chain of {} does not fit in u64", tx_id))?;

        Ok(TransactionRecord {
            target_chain,
            target_address: record.targetAddress.to_string(),
        })
    }

    async fn query_logs(
        &self,
        kind: BridgeEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ObservedLog>> {
        let contract = Bridge::new(self.bridge_address, &self.provider);
        let what = format!("{} log query", kind);

        let logs = match kind {
            BridgeEventKind::TokenLocked => {
                let found = with_timeout(self.rpc_timeout, &what, async {
                    contract
                        .TokenLocked_filter()
                        .from_block(from_block)
                        .to_block(to_block)
                        .query()
                        .await
                        .wrap_err("Failed to query TokenLocked logs")
                })
                .await?;
                found
                    .iter()
                    .filter_map(|(event, log)| locked_log(self.chain_id, event, log))
                    .collect()
            }
            BridgeEventKind::TokenBurned => {
                let found = with_timeout(self.rpc_timeout, &what, async {
                    contract
                        .TokenBurned_filter()
                        .from_block(from_block)
                        .to_block(to_block)
                        .query()
                        .await
                        .wrap_err("Failed to query TokenBurned logs")
                })
                .await?;
                found
                    .iter()
                    .filter_map(|(event, log)| burned_log(self.chain_id, event, log))
                    .collect()
            }
            BridgeEventKind::BridgeCompleted => {
                let found = with_timeout(self.rpc_timeout, &what, async {
                    contract
                        .BridgeCompleted_filter()
                        .from_block(from_block)
                        .to_block(to_block)
                        .query()
                        .await
                        .wrap_err("Failed to query BridgeCompleted logs")
                })
                .await?;
                found
                    .iter()
                    .filter_map(|(event, log)| completed_log(self.chain_id, event, log))
                    .collect()
            }
        };

        Ok(logs)
    }

    async fn watch(&self, kind: BridgeEventKind) -> Result<LogStream> {
        let contract = Bridge::new(self.bridge_address, &self.provider);
        let chain_id = self.chain_id;
        let what = format!("{} filter install", kind);

        // Undecodable items are logged and skipped; the stream only ends when
        // the underlying poller stops.
        let stream: LogStream = match kind {
            BridgeEventKind::TokenLocked => {
                let poller = with_timeout(self.rpc_timeout, &what, async {
                    contract
                        .TokenLocked_filter()
                        .watch()
                        .await
                        .wrap_err("Failed to watch TokenLocked")
                })
                .await?;
                poller
                    .into_stream()
                    .filter_map(move |item| async move {
                        match item {
                            Ok((event, log)) => locked_log(chain_id, &event, &log),
                            Err(e) => {
                                warn!(chain_id, error = %e, "Failed to decode TokenLocked log");
                                None
                            }
                        }
                    })
                    .boxed()
            }
            BridgeEventKind::TokenBurned => {
                let poller = with_timeout(self.rpc_timeout, &what, async {
                    contract
                        .TokenBurned_filter()
                        .watch()
                        .await
                        .wrap_err("Failed to watch TokenBurned")
                })
                .await?;
                poller
                    .into_stream()
                    .filter_map(move |item| async move {
                        match item {
                            Ok((event, log)) => burned_log(chain_id, &event, &log),
                            Err(e) => {
                                warn!(chain_id, error = %e, "Failed to decode TokenBurned log");
                                None
                            }
                        }
                    })
                    .boxed()
            }
            BridgeEventKind::BridgeCompleted => {
                let poller = with_timeout(self.rpc_timeout, &what, async {
                    contract
                        .BridgeCompleted_filter()
                        .watch()
                        .await
                        .wrap_err("Failed to watch BridgeCompleted")
                })
                .await?;
                poller
                    .into_stream()
                    .filter_map(move |item| async move {
                        match item {
                            Ok((event, log)) => completed_log(chain_id, &event, &log),
                            Err(e) => {
                                warn!(chain_id, error = %e, "Failed to decode BridgeCompleted log");
                                None
                            }
                        }
                    })
                    .boxed()
            }
        };

        Ok(stream)
    }
}

/// Builds [`EvmBridgeChain`] connections
#[derive(Debug, Clone)]
pub struct EvmConnector {
    rpc_timeout: Duration,
}

impl EvmConnector {
    pub fn new(rpc_timeout: Duration) -> Self {
        Self { rpc_timeout }
    }
}

#[async_trait]
impl ChainConnector for EvmConnector {
    async fn connect(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn BridgeChain>> {
        let chain: Arc<dyn BridgeChain> = Arc::new(EvmBridgeChain::new(endpoint, self.rpc_timeout)?);
        Ok(chain)
    }
}

/// Block number and transaction hash of a mined log
fn log_provenance(chain_id: ChainId, log: &Log) -> Option<(u64, String)> {
    match (log.block_number, log.transaction_hash) {
        (Some(block_number), Some(tx_hash)) => Some((block_number, bytes32_to_hex(&tx_hash.0))),
        _ => {
            warn!(
                chain_id,
                block = ?log.block_number,
                tx = ?log.transaction_hash,
                "Skipping log without block number or transaction hash"
            );
            None
        }
    }
}

fn locked_log(chain_id: ChainId, event: &Bridge::TokenLocked, log: &Log) -> Option<ObservedLog> {
    let (block_number, transaction_hash) = log_provenance(chain_id, log)?;
    let target_chain = match ChainId::try_from(event.targetChain) {
        Ok(id) => id,
        Err(_) => {
            warn!(
                chain_id,
                tx_id = %bytes32_to_hex(&event.txId.0),
                target_chain = %event.targetChain,
                "TokenLocked target chain does not fit in u64"
            );
            return None;
        }
    };

    Some(ObservedLog {
        payload: LogPayload::TokenLocked {
            tx_id: bytes32_to_hex(&event.txId.0),
            user: event.user.to_string(),
            token: event.token.to_string(),
            amount: event.amount.to_string(),
            target_chain,
            target_address: event.targetAddress.to_string(),
        },
        block_number,
        transaction_hash,
    })
}

fn burned_log(chain_id: ChainId, event: &Bridge::TokenBurned, log: &Log) -> Option<ObservedLog> {
    let (block_number, transaction_hash) = log_provenance(chain_id, log)?;
    Some(ObservedLog {
        payload: LogPayload::TokenBurned {
            tx_id: bytes32_to_hex(&event.txId.0),
            user: event.user.to_string(),
            token: event.token.to_string(),
            amount: event.amount.to_string(),
        },
        block_number,
        transaction_hash,
    })
}

fn completed_log(
    chain_id: ChainId,
    event: &Bridge::BridgeCompleted,
    log: &Log,
) -> Option<ObservedLog> {
    let (block_number, transaction_hash) = log_provenance(chain_id, log)?;
    Some(ObservedLog {
        payload: LogPayload::BridgeCompleted {
            tx_id: bytes32_to_hex(&event.txId.0),
        },
        block_number,
        transaction_hash,
    })
}
