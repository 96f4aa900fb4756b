use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::connection::{ChainHandle, ConnectionManager};
use crate::db::EventStore;
use crate::metrics;
use crate::types::confirmations;

/// Pending events re-evaluated per chain per pass
const BATCH_SIZE: i64 = 500;

/// Refreshes the confirmation depth of stored events that were below their
/// chain's threshold when admitted
pub struct ConfirmationTracker {
    connections: Arc<ConnectionManager>,
    store: Arc<dyn EventStore>,
}

impl ConfirmationTracker {
    pub fn new(connections: Arc<ConnectionManager>, store: Arc<dyn EventStore>) -> Self {
        Self { connections, store }
    }

    /// Run the confirmation loop
    pub async fn run(self: Arc<Self>, period: Duration) {
        info!(interval_ms = period.as_millis() as u64, "Starting confirmation tracker");

        if period.is_zero() {
            error!("Confirmation interval must be greater than 0, task not started");
            return;
        }

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let updated = self.refresh().await;
            if updated > 0 {
                debug!(updated, "Refreshed confirmations");
            }
        }
    }

    /// One pass over every connected chain. Returns the number of events whose
    /// confirmations were rewritten.
    pub async fn refresh(&self) -> usize {
        let mut updated = 0;
        for chain in self.connections.connected_chains() {
            updated += self.refresh_chain(&chain).await;
        }
        updated
    }

    async fn refresh_chain(&self, chain: &ChainHandle) -> usize {
        let chain_id = chain.endpoint.chain_id;
        let min_confirmations = chain.endpoint.min_confirmations;

        let pending = match self
            .store
            .unconfirmed_events(chain_id, min_confirmations, BATCH_SIZE)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(chain_id, error = %e, "Failed to load unconfirmed events");
                return 0;
            }
        };
        if pending.is_empty() {
            return 0;
        }

        let current_height = match chain.connection.block_number().await {
            Ok(height) => height,
            Err(e) => {
                warn!(chain_id, error = %e, "Failed to read chain height for confirmations");
                metrics::record_error(chain_id, "height_read");
                return 0;
            }
        };

        let mut updated = 0;
        for event in pending {
            let depth = confirmations(current_height, event.block_number);
            if depth <= event.confirmations {
                continue;
            }
            match self.store.update_confirmations(&event.tx_id, depth).await {
                Ok(()) => {
                    updated += 1;
                    if depth >= min_confirmations {
                        info!(chain_id, tx_id = %event.tx_id, confirmations = depth, "Event reached required confirmations");
                    }
                }
                Err(e) => {
                    warn!(chain_id, tx_id = %event.tx_id, error = %e, "Failed to update confirmations");
                }
            }
        }

        updated
    }
}
