//! Per-chain connection ownership and reconnect-with-backoff
//!
//! [`ConnectionManager`] owns a [`ChainRegistry`] keyed by chain id. Every
//! other component reads the current connection through it and never keeps a
//! handle across a reconnect: a reconnect replaces the whole slot contents
//! (connection, subscriptions) and bumps the slot generation.

use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::alerts::{Alert, AlertSink, AlertType};
use crate::chain::{with_timeout, BridgeChain, ChainConnector};
use crate::config::{ChainEndpoint, RelayerConfig};
use crate::metrics;
use crate::types::{BridgeEventKind, ChainId};

/// Reconnect schedule for one chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&RelayerConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &RelayerConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_attempts: config.max_reconnect_attempts,
            max_delay: Duration::from_millis(config.max_reconnect_delay_ms),
        }
    }

    /// Delay before a reconnect attempt (0-indexed): base × 2^attempt, capped
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Connection health of one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainHealth {
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; stays down until restart
    Down,
    /// Not configured, or the initial connection failed
    Unavailable,
}

/// Current connection of a chain. `generation` changes on every reconnect.
#[derive(Clone)]
pub struct ChainHandle {
    pub endpoint: ChainEndpoint,
    pub connection: Arc<dyn BridgeChain>,
    pub generation: u64,
}

/// Notifications for the owner of the live subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Reconnected(ChainId),
}

struct ChainSlot {
    endpoint: ChainEndpoint,
    connection: Option<Arc<dyn BridgeChain>>,
    generation: u64,
    reconnect_attempts: u32,
    reconnect_pending: bool,
    reconnect_task: Option<AbortHandle>,
    health: ChainHealth,
    subscriptions: HashMap<BridgeEventKind, AbortHandle>,
}

impl ChainSlot {
    fn new(endpoint: ChainEndpoint) -> Self {
        Self {
            endpoint,
            connection: None,
            generation: 0,
            reconnect_attempts: 0,
            reconnect_pending: false,
            reconnect_task: None,
            health: ChainHealth::Unavailable,
            subscriptions: HashMap::new(),
        }
    }

    fn abort_subscriptions(&mut self) {
        for (_, handle) in self.subscriptions.drain() {
            handle.abort();
        }
    }

    /// Drop the connection and everything bound to it
    fn teardown(&mut self) {
        self.abort_subscriptions();
        self.connection = None;
    }

    fn install(&mut self, connection: Arc<dyn BridgeChain>) {
        self.teardown();
        self.connection = Some(connection);
        self.generation += 1;
        self.reconnect_pending = false;
        self.reconnect_task = None;
        self.health = ChainHealth::Connected;
    }

    fn handle(&self) -> Option<ChainHandle> {
        match (&self.connection, self.health) {
            (Some(connection), ChainHealth::Connected) => Some(ChainHandle {
                endpoint: self.endpoint.clone(),
                connection: connection.clone(),
                generation: self.generation,
            }),
            _ => None,
        }
    }
}

/// Per-chain connection state, keyed by chain id
#[derive(Default)]
pub struct ChainRegistry {
    slots: BTreeMap<ChainId, ChainSlot>,
}

impl ChainRegistry {
    fn slot_mut(&mut self, chain_id: ChainId) -> Option<&mut ChainSlot> {
        self.slots.get_mut(&chain_id)
    }

    fn handle(&self, chain_id: ChainId) -> Option<ChainHandle> {
        self.slots.get(&chain_id).and_then(ChainSlot::handle)
    }

    fn connected(&self) -> Vec<ChainHandle> {
        self.slots.values().filter_map(ChainSlot::handle).collect()
    }

    fn count_health(&self, health: ChainHealth) -> usize {
        self.slots.values().filter(|s| s.health == health).count()
    }
}

/// Read-only view of the registry for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub connected_chains: Vec<ChainId>,
    pub active_listeners: usize,
    pub reconnect_attempts: BTreeMap<ChainId, u32>,
    pub health: BTreeMap<ChainId, ChainHealth>,
}

enum DisconnectAction {
    Ignore,
    Reconnect { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Owns one connection per configured chain and recovers lost ones
pub struct ConnectionManager {
    connector: Arc<dyn ChainConnector>,
    alerts: Arc<dyn AlertSink>,
    policy: ReconnectPolicy,
    rpc_timeout: Duration,
    listening: Arc<AtomicBool>,
    registry: RwLock<ChainRegistry>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Build the manager and the receiver of its [`ConnectionEvent`]s.
    ///
    /// `listening` is shared with the relayer; disconnects while not
    /// listening are ignored.
    pub fn new(
        endpoints: Vec<ChainEndpoint>,
        connector: Arc<dyn ChainConnector>,
        alerts: Arc<dyn AlertSink>,
        policy: ReconnectPolicy,
        rpc_timeout: Duration,
        listening: Arc<AtomicBool>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let slots = endpoints
            .into_iter()
            .map(|endpoint| (endpoint.chain_id, ChainSlot::new(endpoint)))
            .collect();

        let manager = Arc::new(Self {
            connector,
            alerts,
            policy,
            rpc_timeout,
            listening,
            registry: RwLock::new(ChainRegistry { slots }),
            events_tx,
        });

        (manager, events_rx)
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, ChainRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, ChainRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Open every configured chain. Returns the number of connected chains.
    ///
    /// Chains that are not configured or fail their first connection are
    /// marked unavailable and left out of this run.
    pub async fn initialize(&self) -> usize {
        let endpoints: Vec<ChainEndpoint> = self
            .read_registry()
            .slots
            .values()
            .map(|slot| slot.endpoint.clone())
            .collect();

        let attempts = endpoints.into_iter().filter_map(|endpoint| {
            if !endpoint.is_configured() {
                warn!(
                    chain_id = endpoint.chain_id,
                    name = endpoint.label(),
                    "Skipping chain: missing RPC URL or bridge address"
                );
                return None;
            }
            Some(async move {
                let result = self.open(&endpoint).await;
                (endpoint, result)
            })
        });

        let mut connected = 0;
        for (endpoint, result) in join_all(attempts).await {
            let mut registry = self.write_registry();
            let Some(slot) = registry.slot_mut(endpoint.chain_id) else {
                continue;
            };
            match result {
                Ok(connection) => {
                    slot.install(connection);
                    connected += 1;
                    info!(
                        chain_id = endpoint.chain_id,
                        name = endpoint.label(),
                        "Initialized chain connection"
                    );
                }
                Err(e) => {
                    slot.health = ChainHealth::Unavailable;
                    error!(
                        chain_id = endpoint.chain_id,
                        name = endpoint.label(),
                        error = %e,
                        "Failed to initialize chain connection"
                    );
                }
            }
        }

        connected
    }

    /// Build a connection and probe it with a height read
    async fn open(&self, endpoint: &ChainEndpoint) -> eyre::Result<Arc<dyn BridgeChain>> {
        let connection = with_timeout(self.rpc_timeout, "connect", async {
            self.connector.connect(endpoint).await
        })
        .await?;
        let height = with_timeout(self.rpc_timeout, "liveness probe", connection.block_number())
            .await?;
        debug!(chain_id = endpoint.chain_id, height, "Liveness probe succeeded");
        Ok(connection)
    }

    /// React to a transport failure on `chain_id`.
    ///
    /// Schedules the next reconnect while attempts remain, otherwise marks the
    /// chain down and raises a system alert. Repeated reports while a
    /// reconnect is pending collapse into one.
    pub fn handle_disconnect(self: &Arc<Self>, chain_id: ChainId, reason: &str) {
        if !self.listening.load(Ordering::SeqCst) {
            debug!(chain_id, reason, "Ignoring disconnect while not listening");
            return;
        }

        let action = {
            let mut registry = self.write_registry();
            match registry.slot_mut(chain_id) {
                None => DisconnectAction::Ignore,
                Some(slot) if slot.reconnect_pending || slot.health == ChainHealth::Down => {
                    DisconnectAction::Ignore
                }
                Some(slot) => {
                    slot.teardown();
                    if self.policy.should_retry(slot.reconnect_attempts) {
                        let delay = self.policy.backoff_for_attempt(slot.reconnect_attempts);
                        slot.reconnect_attempts += 1;
                        slot.reconnect_pending = true;
                        slot.health = ChainHealth::Reconnecting;
                        DisconnectAction::Reconnect {
                            attempt: slot.reconnect_attempts,
                            delay,
                        }
                    } else {
                        slot.health = ChainHealth::Down;
                        DisconnectAction::GiveUp {
                            attempts: slot.reconnect_attempts,
                        }
                    }
                }
            }
        };

        match action {
            DisconnectAction::Ignore => {
                debug!(chain_id, reason, "Disconnect already handled");
            }
            DisconnectAction::Reconnect { attempt, delay } => {
                warn!(
                    chain_id,
                    reason,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Chain disconnected, scheduling reconnect"
                );
                metrics::record_reconnect_attempt(chain_id);
                let task = tokio::spawn(self.clone().reconnect_after(chain_id, attempt, delay));
                if let Some(slot) = self.write_registry().slot_mut(chain_id) {
                    // With a zero delay the task may already have finished or
                    // scheduled its successor
                    if slot.reconnect_pending && slot.reconnect_attempts == attempt {
                        slot.reconnect_task = Some(task.abort_handle());
                    }
                }
            }
            DisconnectAction::GiveUp { attempts } => {
                error!(chain_id, attempts, reason, "Max reconnection attempts reached");
                metrics::set_chains_down(self.read_registry().count_health(ChainHealth::Down));
                let alerts = self.alerts.clone();
                tokio::spawn(async move {
                    let alert = Alert::new(
                        AlertType::SystemError,
                        format!(
                            "Failed to reconnect to chain {} after {} attempts",
                            chain_id, attempts
                        ),
                        json!({ "chainId": chain_id }),
                    );
                    if let Err(e) = alerts.send_alert(alert).await {
                        warn!(chain_id, error = %e, "Failed to send chain down alert");
                    }
                });
            }
        }
    }

    async fn reconnect_after(self: Arc<Self>, chain_id: ChainId, attempt: u32, delay: Duration) {
        tokio::time::sleep(delay).await;

        let Some(endpoint) = self.endpoint(chain_id) else {
            return;
        };
        info!(chain_id, name = endpoint.label(), attempt, "Attempting to reconnect");

        match self.open(&endpoint).await {
            Ok(connection) => {
                if let Some(slot) = self.write_registry().slot_mut(chain_id) {
                    slot.install(connection);
                }
                info!(chain_id, attempt, "Successfully reconnected");
                if self
                    .events_tx
                    .send(ConnectionEvent::Reconnected(chain_id))
                    .is_err()
                {
                    debug!(chain_id, "No listener for reconnect notifications");
                }
            }
            Err(e) => {
                warn!(chain_id, attempt, error = %e, "Reconnection attempt failed");
                metrics::record_error(chain_id, "reconnect");
                if let Some(slot) = self.write_registry().slot_mut(chain_id) {
                    slot.reconnect_pending = false;
                    slot.reconnect_task = None;
                }
                self.handle_disconnect(chain_id, "reconnection attempt failed");
            }
        }
    }

    /// Current connection of a connected chain
    pub fn connection(&self, chain_id: ChainId) -> Option<ChainHandle> {
        self.read_registry().handle(chain_id)
    }

    /// All currently connected chains, in chain id order
    pub fn connected_chains(&self) -> Vec<ChainHandle> {
        self.read_registry().connected()
    }

    pub fn endpoint(&self, chain_id: ChainId) -> Option<ChainEndpoint> {
        self.read_registry()
            .slots
            .get(&chain_id)
            .map(|slot| slot.endpoint.clone())
    }

    pub fn health(&self, chain_id: ChainId) -> Option<ChainHealth> {
        self.read_registry().slots.get(&chain_id).map(|slot| slot.health)
    }

    pub fn reconnect_attempts(&self, chain_id: ChainId) -> Option<u32> {
        self.read_registry()
            .slots
            .get(&chain_id)
            .map(|slot| slot.reconnect_attempts)
    }

    /// Bind a subscription task to the connection of `generation`.
    ///
    /// A task started against a connection that has since been replaced is
    /// aborted instead. Replaces any previous task of the same kind.
    pub fn register_subscription(
        &self,
        chain_id: ChainId,
        generation: u64,
        kind: BridgeEventKind,
        handle: AbortHandle,
    ) -> bool {
        let mut registry = self.write_registry();
        match registry.slot_mut(chain_id) {
            Some(slot) if slot.generation == generation && slot.health == ChainHealth::Connected => {
                if let Some(previous) = slot.subscriptions.insert(kind, handle) {
                    previous.abort();
                }
                true
            }
            _ => {
                handle.abort();
                false
            }
        }
    }

    /// Record that every subscription of `generation` is running. Only then
    /// does the reconnect counter start over.
    pub fn mark_subscribed(&self, chain_id: ChainId, generation: u64) {
        let mut registry = self.write_registry();
        if let Some(slot) = registry.slot_mut(chain_id) {
            if slot.generation == generation && slot.health == ChainHealth::Connected {
                if slot.reconnect_attempts > 0 {
                    debug!(chain_id, attempts = slot.reconnect_attempts, "Listeners restored, resetting reconnect attempts");
                }
                slot.reconnect_attempts = 0;
            }
        }
    }

    /// Tear down the subscriptions of one chain
    pub fn clear_subscriptions(&self, chain_id: ChainId) {
        if let Some(slot) = self.write_registry().slot_mut(chain_id) {
            slot.abort_subscriptions();
        }
    }

    /// Tear down every live subscription
    pub fn clear_all_subscriptions(&self) {
        for slot in self.write_registry().slots.values_mut() {
            slot.abort_subscriptions();
        }
    }

    /// Abort pending reconnect timers
    pub fn shutdown(&self) {
        let mut registry = self.write_registry();
        for slot in registry.slots.values_mut() {
            if let Some(task) = slot.reconnect_task.take() {
                task.abort();
            }
            slot.reconnect_pending = false;
            slot.abort_subscriptions();
        }
    }

    pub fn active_listeners(&self) -> usize {
        self.read_registry()
            .slots
            .values()
            .map(|slot| slot.subscriptions.len())
            .sum()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let registry = self.read_registry();
        ConnectionSnapshot {
            connected_chains: registry
                .slots
                .iter()
                .filter(|(_, slot)| slot.health == ChainHealth::Connected)
                .map(|(id, _)| *id)
                .collect(),
            active_listeners: registry.slots.values().map(|s| s.subscriptions.len()).sum(),
            reconnect_attempts: registry
                .slots
                .iter()
                .map(|(id, slot)| (*id, slot.reconnect_attempts))
                .collect(),
            health: registry
                .slots
                .iter()
                .map(|(id, slot)| (*id, slot.health))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_secs(10),
            max_attempts: 5,
            max_delay: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = policy();
        let delays: Vec<u64> = (0..5)
            .map(|attempt| policy.backoff_for_attempt(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![10_000, 20_000, 40_000, 80_000, 160_000]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff_for_attempt(6), Duration::from_secs(600));
        assert_eq!(policy.backoff_for_attempt(40), Duration::from_secs(600));
    }

    #[test]
    fn test_should_retry_until_max() {
        let policy = policy();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }

    #[test]
    fn test_policy_from_config_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy, self::policy());
    }

    #[test]
    fn test_unconfigured_slot_is_unavailable() {
        let slot = ChainSlot::new(ChainEndpoint {
            chain_id: 1,
            name: "eth".to_string(),
            rpc_url: None,
            bridge_address: None,
            min_confirmations: 12,
        });
        assert_eq!(slot.health, ChainHealth::Unavailable);
        assert!(slot.handle().is_none());
    }
}
