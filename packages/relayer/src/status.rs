use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::connection::{ChainHealth, ConnectionSnapshot};
use crate::types::ChainId;

/// Point-in-time health of the relayer, for health checks and dashboards
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerStatus {
    pub is_listening: bool,
    pub connected_chains: Vec<ChainId>,
    pub active_listeners: usize,
    pub reconnect_attempts: BTreeMap<ChainId, u32>,
    pub chain_health: BTreeMap<ChainId, ChainHealth>,
    pub last_updated: DateTime<Utc>,
}

impl RelayerStatus {
    pub fn new(is_listening: bool, snapshot: ConnectionSnapshot) -> Self {
        Self {
            is_listening,
            connected_chains: snapshot.connected_chains,
            active_listeners: snapshot.active_listeners,
            reconnect_attempts: snapshot.reconnect_attempts,
            chain_health: snapshot.health,
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_camel_case() {
        let snapshot = ConnectionSnapshot {
            connected_chains: vec![1, 56],
            active_listeners: 6,
            reconnect_attempts: BTreeMap::from([(1, 0), (56, 2), (97, 5)]),
            health: BTreeMap::from([
                (1, ChainHealth::Connected),
                (56, ChainHealth::Reconnecting),
                (97, ChainHealth::Down),
            ]),
        };
        let value = serde_json::to_value(RelayerStatus::new(true, snapshot)).unwrap();

        assert_eq!(value["isListening"], true);
        assert_eq!(value["connectedChains"], serde_json::json!([1, 56]));
        assert_eq!(value["activeListeners"], 6);
        assert_eq!(value["reconnectAttempts"]["56"], 2);
        assert_eq!(value["chainHealth"]["97"], "down");
        assert!(value["lastUpdated"].is_string());
    }
}
