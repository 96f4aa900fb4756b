use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alerts::AlertSink;
use crate::backfill::{BackfillScanner, ChainScan};
use crate::chain::ChainConnector;
use crate::config::{Config, RelayerConfig};
use crate::confirmation::ConfirmationTracker;
use crate::connection::{ConnectionEvent, ConnectionManager, ReconnectPolicy};
use crate::db::EventStore;
use crate::metrics;
use crate::processor::EventProcessor;
use crate::status::RelayerStatus;
use crate::subscriber::{run_consumer, LiveSubscriber};

#[derive(Default)]
struct Tasks {
    backfill: Option<JoinHandle<()>>,
    confirmation: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
}

/// Event-sourcing engine: wires connections, both ingestion paths and the
/// processor together and owns their background tasks
pub struct Relayer {
    config: RelayerConfig,
    listening: Arc<AtomicBool>,
    connections: Arc<ConnectionManager>,
    processor: Arc<EventProcessor>,
    subscriber: Arc<LiveSubscriber>,
    backfill: Arc<BackfillScanner>,
    confirmations: Arc<ConfirmationTracker>,
    tasks: Mutex<Tasks>,
}

impl Relayer {
    /// Build the engine and start its consumer tasks. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        config: &Config,
        connector: Arc<dyn ChainConnector>,
        store: Arc<dyn EventStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        let listening = Arc::new(AtomicBool::new(false));

        let (connections, connection_events) = ConnectionManager::new(
            config.chains.clone(),
            connector,
            alerts.clone(),
            ReconnectPolicy::from_config(&config.relayer),
            config.relayer.rpc_timeout(),
            listening.clone(),
        );
        let processor = Arc::new(EventProcessor::new(store.clone(), alerts));

        let (sender, receiver) = mpsc::channel(config.relayer.event_channel_capacity);
        let subscriber = Arc::new(LiveSubscriber::new(connections.clone(), sender));

        let backfill = Arc::new(BackfillScanner::new(
            connections.clone(),
            processor.clone(),
            listening.clone(),
            config.relayer.max_block_range,
        ));
        let confirmations = Arc::new(ConfirmationTracker::new(connections.clone(), store));

        let tasks = Tasks {
            consumer: Some(tokio::spawn(run_consumer(
                processor.clone(),
                listening.clone(),
                receiver,
            ))),
            supervisor: Some(tokio::spawn(supervise(
                connections.clone(),
                subscriber.clone(),
                listening.clone(),
                connection_events,
            ))),
            ..Default::default()
        };

        Arc::new(Self {
            config: config.relayer.clone(),
            listening,
            connections,
            processor,
            subscriber,
            backfill,
            confirmations,
            tasks: Mutex::new(tasks),
        })
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open connections to every configured chain. Returns how many connected.
    pub async fn initialize(&self) -> usize {
        let connected = self.connections.initialize().await;
        if connected == 0 {
            warn!("No chain connections could be initialized");
        } else {
            info!(connected, "Event listener initialized");
        }
        connected
    }

    /// Subscribe on every connected chain and start the periodic tasks
    pub async fn start_listening(&self) {
        if self.listening.swap(true, Ordering::SeqCst) {
            warn!("Event listener is already running");
            return;
        }
        metrics::set_listening(true);
        info!("Starting event listeners for all chains");

        for chain in self.connections.connected_chains() {
            let chain_id = chain.endpoint.chain_id;
            if let Err(e) = self.subscriber.subscribe_chain(chain_id).await {
                error!(chain_id, error = %e, "Failed to start chain listener");
                self.connections
                    .handle_disconnect(chain_id, "failed to start listener");
            }
        }

        let backfill = tokio::spawn(self.backfill.clone().run(self.config.backfill_interval()));
        let confirmation = tokio::spawn(
            self.confirmations
                .clone()
                .run(self.config.confirmation_interval()),
        );

        let mut tasks = self.tasks();
        tasks.backfill = Some(backfill);
        tasks.confirmation = Some(confirmation);
    }

    /// Cancel the periodic tasks and tear down every live subscription
    pub fn stop_listening(&self) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return;
        }

        {
            let mut tasks = self.tasks();
            if let Some(task) = tasks.backfill.take() {
                task.abort();
            }
            if let Some(task) = tasks.confirmation.take() {
                task.abort();
            }
        }
        self.subscriber.unsubscribe_all();
        metrics::set_listening(false);

        info!("Event listeners stopped");
    }

    /// Stop listening and end every background task
    pub fn shutdown(&self) {
        self.stop_listening();
        self.connections.shutdown();

        let mut tasks = self.tasks();
        if let Some(task) = tasks.consumer.take() {
            task.abort();
        }
        if let Some(task) = tasks.supervisor.take() {
            task.abort();
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RelayerStatus {
        RelayerStatus::new(self.is_listening(), self.connections.snapshot())
    }

    /// Run one backfill pass immediately
    pub async fn backfill_once(&self) -> Vec<ChainScan> {
        self.backfill.tick().await
    }

    /// Run one confirmation refresh pass immediately
    pub async fn refresh_confirmations(&self) -> usize {
        self.confirmations.refresh().await
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn processor(&self) -> &Arc<EventProcessor> {
        &self.processor
    }
}

/// Re-register live subscriptions after the connection manager replaced a
/// chain's connection
async fn supervise(
    connections: Arc<ConnectionManager>,
    subscriber: Arc<LiveSubscriber>,
    listening: Arc<AtomicBool>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Reconnected(chain_id) => {
                if !listening.load(Ordering::SeqCst) {
                    debug!(chain_id, "Reconnected while stopped, not subscribing");
                    continue;
                }
                if let Err(e) = subscriber.subscribe_chain(chain_id).await {
                    error!(chain_id, error = %e, "Failed to restart listener after reconnect");
                    connections.handle_disconnect(chain_id, "failed to restart listener");
                }
            }
        }
    }
}
