//! Shared mocks for the relayer integration tests
//!
//! `MockChain` stands in for one bridge deployment: a settable height, a log
//! history for range queries, canned transaction records, and live watch
//! streams the test pushes logs into. `MockConnector` hands those chains out
//! and can be told to fail connections per chain.

#![allow(dead_code)]

use async_trait::async_trait;
use eyre::{eyre, Result};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use bridge_relayer::alerts::{Alert, AlertSink, AlertType};
use bridge_relayer::chain::{
    BridgeChain, ChainConnector, LogPayload, LogStream, ObservedLog, TransactionRecord,
};
use bridge_relayer::config::{ChainEndpoint, Config};
use bridge_relayer::db::MemoryEventStore;
use bridge_relayer::types::{BridgeEventKind, ChainId};
use bridge_relayer::Relayer;

// ============================================================================
// Mock chain
// ============================================================================

#[derive(Default)]
struct ChainState {
    height: u64,
    height_fails: bool,
    watch_fails: bool,
    history: Vec<ObservedLog>,
    failing_queries: HashSet<BridgeEventKind>,
    queries: Vec<(BridgeEventKind, u64, u64)>,
    transactions: HashMap<String, TransactionRecord>,
    watchers: Vec<(BridgeEventKind, UnboundedSender<ObservedLog>)>,
}

pub struct MockChain {
    chain_id: ChainId,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(chain_id: ChainId, height: u64) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            state: Mutex::new(ChainState {
                height,
                ..Default::default()
            }),
        })
    }

    pub fn set_height(&self, height: u64) {
        let mut state = self.state.lock().unwrap();
        state.height = height;
        state.height_fails = false;
    }

    pub fn fail_height(&self) {
        self.state.lock().unwrap().height_fails = true;
    }

    /// Add a log to the history served by range queries
    pub fn add_history(&self, log: ObservedLog) {
        self.state.lock().unwrap().history.push(log);
    }

    /// Make every new `watch` call fail (or succeed again)
    pub fn set_watch_failing(&self, failing: bool) {
        self.state.lock().unwrap().watch_fails = failing;
    }

    pub fn fail_queries(&self, kind: BridgeEventKind) {
        self.state.lock().unwrap().failing_queries.insert(kind);
    }

    /// Ranges requested through `query_logs`
    pub fn queries(&self) -> Vec<(BridgeEventKind, u64, u64)> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn set_transaction(&self, tx_id: &str, target_chain: ChainId, target_address: &str) {
        self.state.lock().unwrap().transactions.insert(
            tx_id.to_string(),
            TransactionRecord {
                target_chain,
                target_address: target_address.to_string(),
            },
        );
    }

    /// Push a log to every open watch stream of its kind
    pub fn emit(&self, log: ObservedLog) {
        let state = self.state.lock().unwrap();
        for (kind, sender) in &state.watchers {
            if *kind == log.kind() {
                let _ = sender.unbounded_send(log.clone());
            }
        }
    }

    /// End every open watch stream, as a dropped transport would
    pub fn close_streams(&self) {
        self.state.lock().unwrap().watchers.clear();
    }

    /// Watch streams whose receiver is still alive
    pub fn open_watchers(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .watchers
            .iter()
            .filter(|(_, sender)| !sender.is_closed())
            .count()
    }
}

#[async_trait]
impl BridgeChain for MockChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64> {
        let state = self.state.lock().unwrap();
        if state.height_fails {
            Err(eyre!("connection refused"))
        } else {
            Ok(state.height)
        }
    }

    async fn get_transaction(&self, tx_id: &str) -> Result<TransactionRecord> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .get(tx_id)
            .cloned()
            .ok_or_else(|| eyre!("execution reverted: unknown transaction"))
    }

    async fn query_logs(
        &self,
        kind: BridgeEventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ObservedLog>> {
        let mut state = self.state.lock().unwrap();
        state.queries.push((kind, from_block, to_block));
        if state.failing_queries.contains(&kind) {
            return Err(eyre!("query returned more than 10000 results"));
        }
        Ok(state
            .history
            .iter()
            .filter(|log| {
                log.kind() == kind && log.block_number >= from_block && log.block_number <= to_block
            })
            .cloned()
            .collect())
    }

    async fn watch(&self, kind: BridgeEventKind) -> Result<LogStream> {
        let mut state = self.state.lock().unwrap();
        if state.watch_fails {
            return Err(eyre!("eth_newFilter: method not available"));
        }
        let (sender, receiver) = unbounded();
        state.watchers.push((kind, sender));
        Ok(receiver.boxed())
    }
}

// ============================================================================
// Mock connector
// ============================================================================

#[derive(Default)]
pub struct MockConnector {
    chains: Mutex<HashMap<ChainId, Arc<MockChain>>>,
    failing: Mutex<HashSet<ChainId>>,
    connects: Mutex<Vec<(ChainId, Instant)>>,
}

impl MockConnector {
    pub fn new(chains: &[Arc<MockChain>]) -> Arc<Self> {
        let connector = Self::default();
        {
            let mut map = connector.chains.lock().unwrap();
            for chain in chains {
                map.insert(chain.chain_id(), chain.clone());
            }
        }
        Arc::new(connector)
    }

    pub fn set_failing(&self, chain_id: ChainId, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(chain_id);
        } else {
            set.remove(&chain_id);
        }
    }

    /// Times at which `chain_id` was (re)connected, successful or not
    pub fn connect_times(&self, chain_id: ChainId) -> Vec<Instant> {
        self.connects
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == chain_id)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    async fn connect(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn BridgeChain>> {
        self.connects
            .lock()
            .unwrap()
            .push((endpoint.chain_id, Instant::now()));

        if self.failing.lock().unwrap().contains(&endpoint.chain_id) {
            return Err(eyre!("error sending request for url ({:?})", endpoint.rpc_url));
        }

        let chain: Arc<dyn BridgeChain> = self
            .chains
            .lock()
            .unwrap()
            .get(&endpoint.chain_id)
            .cloned()
            .ok_or_else(|| eyre!("no mock for chain {}", endpoint.chain_id))?;
        Ok(chain)
    }
}

// ============================================================================
// Recording alert sink
// ============================================================================

#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, alert_type: AlertType) -> usize {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.alert_type == alert_type)
            .count()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn send_alert(&self, alert: Alert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert);
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn endpoint(chain_id: ChainId, min_confirmations: u64) -> ChainEndpoint {
    ChainEndpoint {
        chain_id,
        name: format!("chain-{}", chain_id),
        rpc_url: Some(format!("http://rpc-{}.invalid", chain_id)),
        bridge_address: Some("0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0".to_string()),
        min_confirmations,
    }
}

pub fn config(chains: Vec<ChainEndpoint>) -> Config {
    Config {
        chains,
        ..Default::default()
    }
}

pub fn locked(tx_id: &str, block_number: u64, target_chain: ChainId) -> ObservedLog {
    ObservedLog {
        payload: LogPayload::TokenLocked {
            tx_id: tx_id.to_string(),
            user: "0x1111111111111111111111111111111111111111".to_string(),
            token: "0x2222222222222222222222222222222222222222".to_string(),
            amount: "1000000000000000000".to_string(),
            target_chain,
            target_address: "0x3333333333333333333333333333333333333333".to_string(),
        },
        block_number,
        transaction_hash: format!("0xhash{}", block_number),
    }
}

pub fn burned(tx_id: &str, block_number: u64) -> ObservedLog {
    ObservedLog {
        payload: LogPayload::TokenBurned {
            tx_id: tx_id.to_string(),
            user: "0x1111111111111111111111111111111111111111".to_string(),
            token: "0x2222222222222222222222222222222222222222".to_string(),
            amount: "42".to_string(),
        },
        block_number,
        transaction_hash: format!("0xhash{}", block_number),
    }
}

pub fn completed(tx_id: &str, block_number: u64) -> ObservedLog {
    ObservedLog {
        payload: LogPayload::BridgeCompleted {
            tx_id: tx_id.to_string(),
        },
        block_number,
        transaction_hash: format!("0xdone{}", block_number),
    }
}

/// A relayer over mock chains, plus handles to inspect it
pub struct Harness {
    pub relayer: Arc<Relayer>,
    pub store: Arc<MemoryEventStore>,
    pub connector: Arc<MockConnector>,
    pub alerts: Arc<RecordingAlerts>,
}

impl Harness {
    pub fn new(endpoints: Vec<ChainEndpoint>, chains: &[Arc<MockChain>]) -> Self {
        Self::with_config(&config(endpoints), chains)
    }

    pub fn with_config(config: &Config, chains: &[Arc<MockChain>]) -> Self {
        let store = Arc::new(MemoryEventStore::new());
        let connector = MockConnector::new(chains);
        let alerts = RecordingAlerts::new();
        let relayer = Relayer::new(
            config,
            connector.clone(),
            store.clone(),
            alerts.clone(),
        );

        Self {
            relayer,
            store,
            connector,
            alerts,
        }
    }

    /// Initialize and start listening
    pub async fn start(&self) {
        self.relayer.initialize().await;
        self.relayer.start_listening().await;
    }
}

/// Poll `condition` until it holds, panicking after a generous deadline
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
