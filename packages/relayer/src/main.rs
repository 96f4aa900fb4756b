//! Bridge relayer node
//!
//! Connects to every configured chain, follows TokenLocked / TokenBurned /
//! BridgeCompleted on the bridge contracts and records them in the event
//! store. Live subscriptions are backed by a periodic historical scan so
//! events missed during disconnects are still picked up.

use std::sync::Arc;

use bridge_relayer::alerts::{AlertSink, LogAlertSink, WebhookAlertSink};
use bridge_relayer::api;
use bridge_relayer::chain::EvmConnector;
use bridge_relayer::config::Config;
use bridge_relayer::db::{EventStore, MemoryEventStore, PgEventStore};
use bridge_relayer::Relayer;
use tracing::{error, info, warn};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting bridge relayer");

    let config = Config::load()?;
    info!(
        chains = config.chains.len(),
        backfill_interval_ms = config.relayer.backfill_interval_ms,
        api = %config.api.bind_address,
        "Configuration loaded"
    );

    let store: Arc<dyn EventStore> = match config.database.url.as_deref() {
        Some(url) => {
            let store = PgEventStore::connect(url).await?;
            info!("Database connected, migrations applied");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory event store");
            Arc::new(MemoryEventStore::new())
        }
    };

    let alerts: Arc<dyn AlertSink> = match config.alerts.webhook_url.clone() {
        Some(url) => Arc::new(WebhookAlertSink::new(url)?),
        None => Arc::new(LogAlertSink),
    };

    let connector = Arc::new(EvmConnector::new(config.relayer.rpc_timeout()));
    let relayer = Relayer::new(&config, connector, store, alerts);

    relayer.initialize().await;
    relayer.start_listening().await;

    let api_relayer = relayer.clone();
    let bind_address = config.api.bind_address.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::start_api_server(&bind_address, api_relayer).await {
            error!(error = %e, "API server error");
        }
    });

    wait_for_shutdown_signal().await;

    relayer.shutdown();
    api_handle.abort();

    info!("Bridge relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
