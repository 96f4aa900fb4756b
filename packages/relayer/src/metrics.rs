//! Prometheus metrics for the bridge relayer
//!
//! Registered in the default registry and exposed on /metrics.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};

use crate::types::{BridgeEventKind, ChainId, IngestOrigin};

lazy_static! {
    // Ingestion
    pub static ref EVENTS_OBSERVED: CounterVec = register_counter_vec!(
        "bridge_relayer_events_observed_total",
        "Bridge events observed on chain",
        &["chain", "kind", "origin"]
    ).unwrap();

    pub static ref EVENTS_PERSISTED: CounterVec = register_counter_vec!(
        "bridge_relayer_events_persisted_total",
        "Bridge events admitted to the event store",
        &["chain", "kind"]
    ).unwrap();

    pub static ref DUPLICATES_SKIPPED: CounterVec = register_counter_vec!(
        "bridge_relayer_duplicates_skipped_total",
        "Observations skipped because the tx id was already stored",
        &["chain", "origin"]
    ).unwrap();

    pub static ref EVENTS_DROPPED: CounterVec = register_counter_vec!(
        "bridge_relayer_events_dropped_total",
        "Observations dropped before persistence",
        &["chain", "reason"]
    ).unwrap();

    // Connections
    pub static ref RECONNECT_ATTEMPTS: CounterVec = register_counter_vec!(
        "bridge_relayer_reconnect_attempts_total",
        "Scheduled reconnect attempts",
        &["chain"]
    ).unwrap();

    pub static ref CHAINS_DOWN: Gauge = register_gauge!(
        "bridge_relayer_chains_down",
        "Chains that exhausted their reconnect attempts"
    ).unwrap();

    // Backfill
    pub static ref WATERMARK: GaugeVec = register_gauge_vec!(
        "bridge_relayer_backfill_watermark",
        "Highest block scanned by backfill",
        &["chain"]
    ).unwrap();

    pub static ref BLOCKS_SCANNED: CounterVec = register_counter_vec!(
        "bridge_relayer_blocks_scanned_total",
        "Blocks covered by backfill scans",
        &["chain"]
    ).unwrap();

    // Errors
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "bridge_relayer_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    // Health
    pub static ref LISTENING: Gauge = register_gauge!(
        "bridge_relayer_listening",
        "Whether the relayer is actively listening"
    ).unwrap();
}

/// Record an event observed by the live or backfill path
pub fn record_event_observed(chain: ChainId, kind: BridgeEventKind, origin: IngestOrigin) {
    EVENTS_OBSERVED
        .with_label_values(&[&chain.to_string(), kind.as_str(), origin.as_str()])
        .inc();
}

/// Record an event admitted to the store
pub fn record_event_persisted(chain: ChainId, kind: BridgeEventKind) {
    EVENTS_PERSISTED
        .with_label_values(&[&chain.to_string(), kind.as_str()])
        .inc();
}

pub fn record_duplicate(chain: ChainId, origin: IngestOrigin) {
    DUPLICATES_SKIPPED
        .with_label_values(&[&chain.to_string(), origin.as_str()])
        .inc();
}

/// Record an observation dropped before persistence
pub fn record_event_dropped(chain: ChainId, reason: &str) {
    EVENTS_DROPPED
        .with_label_values(&[&chain.to_string(), reason])
        .inc();
}

pub fn record_reconnect_attempt(chain: ChainId) {
    RECONNECT_ATTEMPTS
        .with_label_values(&[&chain.to_string()])
        .inc();
}

/// Update the permanently-down chain count
pub fn set_chains_down(count: usize) {
    CHAINS_DOWN.set(count as f64);
}

/// Record a completed backfill window
pub fn record_backfill_window(chain: ChainId, from_block: u64, to_block: u64) {
    let label = chain.to_string();
    BLOCKS_SCANNED
        .with_label_values(&[&label])
        .inc_by((to_block.saturating_sub(from_block) + 1) as f64);
    WATERMARK.with_label_values(&[&label]).set(to_block as f64);
}

/// Record an error
pub fn record_error(chain: ChainId, error_type: &str) {
    ERRORS
        .with_label_values(&[&chain.to_string(), error_type])
        .inc();
}

pub fn set_listening(listening: bool) {
    LISTENING.set(if listening { 1.0 } else { 0.0 });
}
