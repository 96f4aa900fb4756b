//! Historical backfill: periodic log queries over confirmed block ranges
//!
//! Closes the gaps the live subscriptions leave behind (reconnect windows,
//! restarts). Each chain keeps a watermark of the highest block scanned.

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::chain::ObservedLog;
use crate::connection::{ChainHandle, ConnectionManager};
use crate::events::{resolve_log, ResolvedLog};
use crate::metrics;
use crate::processor::{EventProcessor, HandleOutcome};
use crate::types::{BridgeEventKind, ChainId, IngestOrigin};

/// Inclusive block range of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub from_block: u64,
    pub to_block: u64,
}

/// Next window to scan, or `None` when there is no new confirmed block.
///
/// Starts after the watermark but never more than `max_block_range` blocks
/// below the head, and ends `min_confirmations` below the head.
pub fn scan_window(
    watermark: u64,
    current_height: u64,
    min_confirmations: u64,
    max_block_range: u64,
) -> Option<ScanWindow> {
    let to_block = current_height.saturating_sub(min_confirmations);
    let from_block = watermark
        .saturating_add(1)
        .max(current_height.saturating_sub(max_block_range));

    (from_block <= to_block).then_some(ScanWindow {
        from_block,
        to_block,
    })
}

/// Outcome of scanning one chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainScan {
    pub chain_id: ChainId,
    pub window: ScanWindow,
    pub persisted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

pub struct BackfillScanner {
    connections: Arc<ConnectionManager>,
    processor: Arc<EventProcessor>,
    listening: Arc<AtomicBool>,
    max_block_range: u64,
}

impl BackfillScanner {
    pub fn new(
        connections: Arc<ConnectionManager>,
        processor: Arc<EventProcessor>,
        listening: Arc<AtomicBool>,
        max_block_range: u64,
    ) -> Self {
        Self {
            connections,
            processor,
            listening,
            max_block_range,
        }
    }

    /// Tick every `period`; the first tick fires one period after start
    pub async fn run(self: Arc<Self>, period: Duration) {
        info!(interval_ms = period.as_millis() as u64, "Starting historical backfill");

        if period.is_zero() {
            error!("Backfill interval must be greater than 0, task not started");
            return;
        }

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// Scan every connected chain once, concurrently.
    ///
    /// Chains fail independently; only chains that produced a window report.
    pub async fn tick(&self) -> Vec<ChainScan> {
        if !self.listening.load(Ordering::SeqCst) {
            return Vec::new();
        }

        let chains = self.connections.connected_chains();
        debug!(chains = chains.len(), "Backfill tick");

        join_all(chains.into_iter().map(|chain| self.scan_chain(chain)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn scan_chain(&self, chain: ChainHandle) -> Option<ChainScan> {
        let chain_id = chain.endpoint.chain_id;
        let connection = chain.connection.as_ref();

        let current_height = match connection.block_number().await {
            Ok(height) => height,
            Err(e) => {
                error!(chain_id, error = %e, "Failed to read chain height during backfill");
                metrics::record_error(chain_id, "height_read");
                self.connections
                    .handle_disconnect(chain_id, "block height read failed");
                return None;
            }
        };

        let watermark = match self
            .processor
            .store()
            .get_last_processed_block(chain_id)
            .await
        {
            Ok(block) => block,
            Err(e) => {
                warn!(chain_id, error = %e, "Failed to read watermark, scanning from 0");
                0
            }
        };

        let Some(window) = scan_window(
            watermark,
            current_height,
            chain.endpoint.min_confirmations,
            self.max_block_range,
        ) else {
            debug!(chain_id, watermark, current_height, "No new confirmed blocks");
            return None;
        };

        debug!(
            chain_id,
            from_block = window.from_block,
            to_block = window.to_block,
            "Scanning historical events"
        );

        // Queried concurrently, processed in kind order (locks before burns)
        let results = join_all(
            BridgeEventKind::BACKFILLED
                .into_iter()
                .map(|kind| self.query(&chain, kind, window)),
        )
        .await;

        let mut scan = ChainScan {
            chain_id,
            window,
            persisted: 0,
            duplicates: 0,
            failed: 0,
        };

        for log in results.into_iter().flatten() {
            if !self.listening.load(Ordering::SeqCst) {
                info!(chain_id, "Stopped listening, abandoning backfill window");
                return None;
            }
            self.process_log(&chain, log, &mut scan).await;
        }

        // The watermark means "range scanned", not "range fully processed"
        match self
            .processor
            .store()
            .save_processed_block(chain_id, window.to_block)
            .await
        {
            Ok(()) => metrics::record_backfill_window(chain_id, window.from_block, window.to_block),
            Err(e) => {
                error!(chain_id, to_block = window.to_block, error = %e, "Failed to save watermark");
                metrics::record_error(chain_id, "watermark");
            }
        }

        if scan.persisted > 0 || scan.failed > 0 {
            info!(
                chain_id,
                from_block = window.from_block,
                to_block = window.to_block,
                persisted = scan.persisted,
                duplicates = scan.duplicates,
                failed = scan.failed,
                "Backfill window processed"
            );
        }

        Some(scan)
    }

    /// Query one event kind; a failure degrades to an empty result
    async fn query(
        &self,
        chain: &ChainHandle,
        kind: BridgeEventKind,
        window: ScanWindow,
    ) -> Vec<ObservedLog> {
        let chain_id = chain.endpoint.chain_id;
        match chain
            .connection
            .query_logs(kind, window.from_block, window.to_block)
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                warn!(
                    chain_id,
                    kind = %kind,
                    from_block = window.from_block,
                    to_block = window.to_block,
                    error = %e,
                    "Historical log query failed"
                );
                metrics::record_error(chain_id, "log_query");
                Vec::new()
            }
        }
    }

    async fn process_log(&self, chain: &ChainHandle, log: ObservedLog, scan: &mut ChainScan) {
        let chain_id = chain.endpoint.chain_id;
        let tx_id = log.tx_id().to_string();

        let event = match resolve_log(chain.connection.as_ref(), log).await {
            Ok(ResolvedLog::Event(event)) => event,
            Ok(ResolvedLog::Completed { .. }) => {
                debug!(chain_id, tx_id = %tx_id, "Ignoring completion log in backfill");
                return;
            }
            Err(e) => {
                error!(chain_id, tx_id = %tx_id, error = %e, "Failed to resolve historical event");
                metrics::record_event_dropped(chain_id, e.reason());
                scan.failed += 1;
                return;
            }
        };

        match self
            .processor
            .handle(chain.connection.as_ref(), event, IngestOrigin::Backfill)
            .await
        {
            Ok(HandleOutcome::Persisted) => scan.persisted += 1,
            Ok(HandleOutcome::Duplicate) => scan.duplicates += 1,
            Err(e) => {
                error!(chain_id, tx_id = %tx_id, error = %e, "Failed to process historical event");
                metrics::record_error(chain_id, "persist");
                scan.failed += 1;
            }
        }
    }
}
