use async_trait::async_trait;
use chrono::Utc;
use eyre::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{EventRecord, EventStore};
use crate::types::{BridgeEvent, ChainId, EventStatus};

/// In-process [`EventStore`]; state is lost on restart
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<String, EventRecord>>,
    watermarks: RwLock<HashMap<ChainId, u64>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Snapshot of every stored event
    pub async fn events(&self) -> Vec<BridgeEvent> {
        self.events
            .read()
            .await
            .values()
            .map(|record| record.event.clone())
            .collect()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn is_event_processed(&self, tx_id: &str) -> Result<bool> {
        Ok(self.events.read().await.contains_key(tx_id))
    }

    async fn save_bridge_event(&self, event: &BridgeEvent) -> Result<bool> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.tx_id) {
            return Ok(false);
        }
        events.insert(event.tx_id.clone(), EventRecord::new(event.clone()));
        Ok(true)
    }

    async fn update_event_status(
        &self,
        tx_id: &str,
        status: EventStatus,
        proof_hash: Option<&str>,
    ) -> Result<bool> {
        let mut events = self.events.write().await;
        let Some(record) = events.get_mut(tx_id) else {
            return Ok(false);
        };
        record.event.status = status;
        if let Some(hash) = proof_hash {
            record.proof_hash = Some(hash.to_string());
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_confirmations(&self, tx_id: &str, confirmations: u64) -> Result<()> {
        let mut events = self.events.write().await;
        if let Some(record) = events.get_mut(tx_id) {
            if confirmations > record.event.confirmations {
                record.event.confirmations = confirmations;
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn unconfirmed_events(
        &self,
        chain_id: ChainId,
        below: u64,
        limit: i64,
    ) -> Result<Vec<BridgeEvent>> {
        let events = self.events.read().await;
        let mut pending: Vec<BridgeEvent> = events
            .values()
            .map(|record| &record.event)
            .filter(|event| {
                event.source_chain == chain_id
                    && event.status == EventStatus::Pending
                    && event.confirmations < below
            })
            .cloned()
            .collect();
        pending.sort_by_key(|event| event.block_number);
        pending.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(pending)
    }

    async fn get_event(&self, tx_id: &str) -> Result<Option<EventRecord>> {
        Ok(self.events.read().await.get(tx_id).cloned())
    }

    async fn get_last_processed_block(&self, chain_id: ChainId) -> Result<u64> {
        Ok(self
            .watermarks
            .read()
            .await
            .get(&chain_id)
            .copied()
            .unwrap_or(0))
    }

    async fn save_processed_block(&self, chain_id: ChainId, block_number: u64) -> Result<()> {
        let mut watermarks = self.watermarks.write().await;
        let entry = watermarks.entry(chain_id).or_insert(0);
        *entry = (*entry).max(block_number);
        Ok(())
    }
}
