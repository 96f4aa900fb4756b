//! Canonical bridge event records shared by the live and historical paths

use serde::{Deserialize, Serialize};
use std::fmt;

/// Native chain identifier (EVM chain id)
pub type ChainId = u64;

/// The three bridge contract events the relayer follows.
///
/// Used as the key for subscriptions from registration through teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BridgeEventKind {
    TokenLocked,
    TokenBurned,
    BridgeCompleted,
}

impl BridgeEventKind {
    /// All kinds a live subscription covers
    pub const ALL: [BridgeEventKind; 3] = [
        BridgeEventKind::TokenLocked,
        BridgeEventKind::TokenBurned,
        BridgeEventKind::BridgeCompleted,
    ];

    /// Kinds the backfill scanner queries, in processing order
    pub const BACKFILLED: [BridgeEventKind; 2] =
        [BridgeEventKind::TokenLocked, BridgeEventKind::TokenBurned];

    /// Contract event name
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeEventKind::TokenLocked => "TokenLocked",
            BridgeEventKind::TokenBurned => "TokenBurned",
            BridgeEventKind::BridgeCompleted => "BridgeCompleted",
        }
    }
}

impl fmt::Display for BridgeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BridgeEventKind {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TokenLocked" => Ok(BridgeEventKind::TokenLocked),
            "TokenBurned" => Ok(BridgeEventKind::TokenBurned),
            "BridgeCompleted" => Ok(BridgeEventKind::BridgeCompleted),
            other => Err(eyre::eyre!("unknown bridge event kind: {}", other)),
        }
    }
}

/// Lifecycle status of a persisted bridge event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Completed,
    Failed,
}

impl EventStatus {
    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(eyre::eyre!("unknown event status: {}", other)),
        }
    }
}

/// Which ingestion route produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOrigin {
    Live,
    Backfill,
}

impl IngestOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOrigin::Live => "live",
            IngestOrigin::Backfill => "backfill",
        }
    }
}

/// Canonical record of a cross-chain transfer intent, keyed by `tx_id`.
///
/// `tx_id` is the identifier assigned by the bridge contract, not the chain
/// transaction hash; it is the only deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub tx_id: String,
    pub event_type: BridgeEventKind,
    pub source_chain: ChainId,
    pub target_chain: ChainId,
    pub user_address: String,
    pub token_address: String,
    pub target_address: String,
    /// Minimal units, decimal string
    pub amount: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub confirmations: u64,
    pub status: EventStatus,
}

impl BridgeEvent {
    /// Recompute confirmations against the given chain height
    pub fn with_confirmations(mut self, current_height: u64) -> Self {
        self.confirmations = confirmations(current_height, self.block_number);
        self
    }
}

/// Block depth of `block_number` at `current_height`, floored at zero
pub fn confirmations(current_height: u64, block_number: u64) -> u64 {
    current_height.saturating_sub(block_number)
}

/// Render 32 bytes as 0x-prefixed lowercase hex
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 0x-prefixed (or bare) 32-byte hex string
pub fn hex_to_bytes32(value: &str) -> eyre::Result<[u8; 32]> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(stripped)?;
    if bytes.len() != 32 {
        return Err(eyre::eyre!(
            "expected 32 bytes, got {} for {}",
            bytes.len(),
            value
        ));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in BridgeEventKind::ALL {
            assert_eq!(kind.as_str().parse::<BridgeEventKind>().unwrap(), kind);
        }
        assert!("locked".parse::<BridgeEventKind>().is_err());
    }

    #[test]
    fn test_backfilled_kinds_exclude_completed() {
        assert_eq!(
            BridgeEventKind::BACKFILLED,
            [BridgeEventKind::TokenLocked, BridgeEventKind::TokenBurned]
        );
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(EventStatus::Pending.as_str(), "pending");
        assert_eq!(EventStatus::Completed.as_str(), "completed");
        assert_eq!(EventStatus::Failed.as_str(), "failed");
        assert_eq!(format!("{}", EventStatus::Completed), "completed");
    }

    #[test]
    fn test_confirmations_floor_at_zero() {
        assert_eq!(confirmations(90, 100), 0);
        assert_eq!(confirmations(100, 100), 0);
        assert_eq!(confirmations(112, 100), 12);
    }

    #[test]
    fn test_confirmations_non_decreasing_with_height() {
        let block = 1_000;
        let mut last = 0;
        for height in (900..1_100).step_by(7) {
            let c = confirmations(height, block);
            assert!(c >= last, "confirmations went backwards at height {}", height);
            last = c;
        }
        assert_eq!(last, confirmations(1_096, block));
    }

    #[test]
    fn test_hex_to_bytes32() {
        let hex = "0x00000000000000000000000000000000000000000000000000000000000000ab";
        let bytes = hex_to_bytes32(hex).unwrap();
        assert_eq!(bytes[31], 0xab);
        assert_eq!(bytes32_to_hex(&bytes), hex);
        assert!(hex_to_bytes32("0xabc").is_err());
    }
}
