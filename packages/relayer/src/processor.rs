use eyre::{Result, WrapErr};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertSink, AlertType};
use crate::chain::BridgeChain;
use crate::db::EventStore;
use crate::metrics;
use crate::types::{BridgeEvent, ChainId, EventStatus, IngestOrigin};

/// Result of admitting one candidate event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Persisted,
    Duplicate,
}

/// Single admission point for bridge events from every ingestion path
pub struct EventProcessor {
    store: Arc<dyn EventStore>,
    alerts: Arc<dyn AlertSink>,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn EventStore>, alerts: Arc<dyn AlertSink>) -> Self {
        Self { store, alerts }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Dedup, stamp confirmations, persist and announce a candidate event.
    ///
    /// Persistence errors are returned; alert errors are only logged.
    pub async fn handle(
        &self,
        chain: &dyn BridgeChain,
        event: BridgeEvent,
        origin: IngestOrigin,
    ) -> Result<HandleOutcome> {
        metrics::record_event_observed(event.source_chain, event.event_type, origin);

        // A failed read counts as "not processed"; the insert below is
        // conditional, so a real duplicate still lands as Duplicate
        let processed = match self.store.is_event_processed(&event.tx_id).await {
            Ok(processed) => processed,
            Err(e) => {
                warn!(
                    tx_id = %event.tx_id,
                    error = %e,
                    "Failed to check whether event was processed, continuing"
                );
                metrics::record_error(event.source_chain, "dedup_read");
                false
            }
        };
        if processed {
            debug!(
                tx_id = %event.tx_id,
                origin = origin.as_str(),
                "Event already processed, skipping"
            );
            metrics::record_duplicate(event.source_chain, origin);
            return Ok(HandleOutcome::Duplicate);
        }

        // A failed height read stamps 0; the confirmation tracker fixes it up
        let current_height = match chain.block_number().await {
            Ok(height) => height,
            Err(e) => {
                warn!(
                    chain_id = event.source_chain,
                    tx_id = %event.tx_id,
                    error = %e,
                    "Failed to read chain height, recording 0 confirmations"
                );
                metrics::record_error(event.source_chain, "height_read");
                0
            }
        };
        let event = event.with_confirmations(current_height);

        let inserted = self
            .store
            .save_bridge_event(&event)
            .await
            .wrap_err_with(|| format!("Failed to save bridge event {}", event.tx_id))?;
        if !inserted {
            // Another path stored it between the check and the write
            debug!(tx_id = %event.tx_id, origin = origin.as_str(), "Lost insert race, skipping");
            metrics::record_duplicate(event.source_chain, origin);
            return Ok(HandleOutcome::Duplicate);
        }

        metrics::record_event_persisted(event.source_chain, event.event_type);
        info!(
            tx_id = %event.tx_id,
            kind = %event.event_type,
            source_chain = event.source_chain,
            target_chain = event.target_chain,
            block = event.block_number,
            confirmations = event.confirmations,
            origin = origin.as_str(),
            "Processed bridge event"
        );

        let alert = Alert::new(
            AlertType::NewBridgeEvent,
            format!("New {} event detected", event.event_type),
            json!({
                "txId": event.tx_id,
                "eventType": event.event_type.as_str(),
                "sourceChain": event.source_chain,
                "targetChain": event.target_chain,
                "amount": event.amount,
                "blockNumber": event.block_number,
                "transactionHash": event.transaction_hash,
            }),
        );
        if let Err(e) = self.alerts.send_alert(alert).await {
            warn!(tx_id = %event.tx_id, error = %e, "Failed to send new event alert");
        }

        Ok(HandleOutcome::Persisted)
    }

    /// Mark the record of `tx_id` completed with the completion tx hash as proof.
    ///
    /// Returns `false` when no record exists yet.
    pub async fn complete(&self, tx_id: &str, chain_id: ChainId, proof_hash: &str) -> Result<bool> {
        let matched = self
            .store
            .update_event_status(tx_id, EventStatus::Completed, Some(proof_hash))
            .await
            .wrap_err_with(|| format!("Failed to mark {} completed", tx_id))?;

        if !matched {
            warn!(
                tx_id = %tx_id,
                chain_id,
                "BridgeCompleted for unknown event, nothing to update"
            );
            return Ok(false);
        }

        info!(tx_id = %tx_id, chain_id, proof = %proof_hash, "Bridge transfer completed");

        let alert = Alert::new(
            AlertType::SuccessfulRelay,
            format!("Bridge transaction {} completed", tx_id),
            json!({
                "txId": tx_id,
                "chainId": chain_id,
                "proofHash": proof_hash,
            }),
        );
        if let Err(e) = self.alerts.send_alert(alert).await {
            warn!(tx_id = %tx_id, error = %e, "Failed to send relay alert");
        }

        Ok(true)
    }
}
