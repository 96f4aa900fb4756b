use eyre::{eyre, Result, WrapErr};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::chain::{BridgeChain, LogStream};
use crate::connection::ConnectionManager;
use crate::events::{resolve_log, ResolvedLog};
use crate::metrics;
use crate::processor::EventProcessor;
use crate::types::{BridgeEventKind, ChainId, IngestOrigin};

/// A resolved live log on its way to the processor
pub struct IngestMessage {
    pub chain: Arc<dyn BridgeChain>,
    pub kind: BridgeEventKind,
    pub resolved: ResolvedLog,
}

/// Live path: one forwarding task per chain and event kind, all feeding a
/// single channel
pub struct LiveSubscriber {
    connections: Arc<ConnectionManager>,
    sender: mpsc::Sender<IngestMessage>,
}

impl LiveSubscriber {
    pub fn new(connections: Arc<ConnectionManager>, sender: mpsc::Sender<IngestMessage>) -> Self {
        Self {
            connections,
            sender,
        }
    }

    /// Subscribe to every bridge event kind on `chain_id`.
    ///
    /// All watches are installed before any task is registered, so a chain
    /// is either fully subscribed or not at all. A full subscription clears
    /// the chain's reconnect counter.
    pub async fn subscribe_chain(&self, chain_id: ChainId) -> Result<()> {
        let handle = self
            .connections
            .connection(chain_id)
            .ok_or_else(|| eyre!("Chain {} is not connected", chain_id))?;

        let mut streams = Vec::with_capacity(BridgeEventKind::ALL.len());
        for kind in BridgeEventKind::ALL {
            let stream = handle
                .connection
                .watch(kind)
                .await
                .wrap_err_with(|| format!("Failed to subscribe to {} on chain {}", kind, chain_id))?;
            streams.push((kind, stream));
        }

        let mut registered = true;
        for (kind, stream) in streams {
            let task = tokio::spawn(forward_logs(
                self.connections.clone(),
                handle.connection.clone(),
                kind,
                stream,
                self.sender.clone(),
            ));
            // Unregistered tasks are aborted by the manager
            registered &= self.connections.register_subscription(
                chain_id,
                handle.generation,
                kind,
                task.abort_handle(),
            );
        }
        if !registered {
            // Reconnected meanwhile; the new connection gets its own tasks
            debug!(chain_id, "Connection replaced while subscribing, dropped stale listeners");
            return Ok(());
        }
        self.connections.mark_subscribed(chain_id, handle.generation);

        info!(
            chain_id,
            name = handle.endpoint.label(),
            "Started event listeners"
        );
        Ok(())
    }

    /// Tear down every live subscription
    pub fn unsubscribe_all(&self) {
        self.connections.clear_all_subscriptions();
    }
}

/// Resolve each log of `stream` and hand it to the consumer.
///
/// A failing log is dropped and logged; the stream ending is a disconnect.
async fn forward_logs(
    connections: Arc<ConnectionManager>,
    chain: Arc<dyn BridgeChain>,
    kind: BridgeEventKind,
    mut stream: LogStream,
    sender: mpsc::Sender<IngestMessage>,
) {
    let chain_id = chain.chain_id();

    while let Some(log) = stream.next().await {
        let tx_id = log.tx_id().to_string();
        debug!(chain_id, kind = %kind, tx_id = %tx_id, block = log.block_number, "Live event received");

        match resolve_log(chain.as_ref(), log).await {
            Ok(resolved) => {
                let message = IngestMessage {
                    chain: chain.clone(),
                    kind,
                    resolved,
                };
                if sender.send(message).await.is_err() {
                    debug!(chain_id, kind = %kind, "Event consumer closed, stopping subscription");
                    return;
                }
            }
            Err(e) => {
                error!(chain_id, kind = %kind, tx_id = %tx_id, error = %e, "Failed to resolve live event");
                metrics::record_event_dropped(chain_id, e.reason());
            }
        }
    }

    warn!(chain_id, kind = %kind, "Event subscription ended");
    connections.handle_disconnect(chain_id, "event subscription ended");
}

/// Drain the live channel into the processor.
///
/// Messages that arrive after listening stopped are discarded.
pub async fn run_consumer(
    processor: Arc<EventProcessor>,
    listening: Arc<AtomicBool>,
    mut receiver: mpsc::Receiver<IngestMessage>,
) {
    while let Some(message) = receiver.recv().await {
        if !listening.load(Ordering::SeqCst) {
            debug!(kind = %message.kind, "Discarding live event received after stop");
            continue;
        }

        let chain_id = message.chain.chain_id();
        match message.resolved {
            ResolvedLog::Event(event) => {
                let tx_id = event.tx_id.clone();
                if let Err(e) = processor
                    .handle(message.chain.as_ref(), event, IngestOrigin::Live)
                    .await
                {
                    error!(chain_id, tx_id = %tx_id, error = %e, "Failed to process live event");
                    metrics::record_error(chain_id, "persist");
                }
            }
            ResolvedLog::Completed {
                tx_id,
                chain_id,
                transaction_hash,
            } => {
                if let Err(e) = processor.complete(&tx_id, chain_id, &transaction_hash).await {
                    error!(chain_id, tx_id = %tx_id, error = %e, "Failed to update bridge status");
                    metrics::record_error(chain_id, "status_update");
                }
            }
        }
    }

    debug!("Live event channel closed");
}
