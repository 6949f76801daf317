use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{self, EnvFilter};

use order_event_indexer::api;
use order_event_indexer::listener::retry_queue::spawn_retry_drain;
use order_event_indexer::listener::source::WsEventSourceFactory;
use order_event_indexer::listener::{ListenerController, ListenerSettings};
use order_event_indexer::metrics::Metrics;
use order_event_indexer::models::common::StorageConfig;
use order_event_indexer::storage::memory::MemoryStore;
use order_event_indexer::storage::mongo::MongoStore;
use order_event_indexer::storage::TransactionStore;
use order_event_indexer::utils::load_config;
use order_event_indexer::utils::retry::{retry, RetryConfig};

const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("=========================== INITIALIZING ===========================");

    // Load config
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {}", e);
            return Err(anyhow!(e));
        }
    };

    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        let contract = config
            .listener
            .contract_address
            .clone()
            .unwrap_or_else(|| "unconfigured".to_string());
        Some(Metrics::new(contract).context("failed to initialize metrics")?)
    } else {
        info!("Metrics are disabled");
        None
    };

    let store = connect_store(&config.storage).await?;

    let controller = Arc::new(ListenerController::new(
        ListenerSettings::from_config(&config),
        Arc::new(WsEventSourceFactory),
        store,
        metrics.clone(),
    ));

    // Create a shutdown signal handler
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Ok(()) = signal::ctrl_c().await {
            info!("Received Ctrl+C signal, initiating shutdown...");
            shutdown_signal.cancel();
        }
    });

    let drain_task = spawn_retry_drain(Arc::clone(&controller), shutdown.clone());

    if config.listener.auto_start {
        // A failed start is not fatal; it can be retried through /start
        if let Err(e) = controller.start().await {
            warn!("Automatic start failed: {}", e);
        }
    }

    let mut app = api::router(Arc::clone(&controller));
    if let Some(metrics_instance) = &metrics {
        app = app.merge(metrics_instance.router());
    }

    println!();
    info!("========================= STARTING LISTENER ========================");

    let served = api::serve(&config.server, app, shutdown.clone()).await;
    // Server errors still have to tear the listener down
    shutdown.cancel();

    if controller.is_listening() {
        if let Err(e) = controller.stop().await {
            error!("Error during shutdown: {}", e);
        }
    }
    if let Err(e) = drain_task.await {
        error!("Retry drain task failed: {}", e);
    }

    let queued = controller.failed_events().len();
    if queued > 0 {
        warn!("Shutting down with {} events still in the retry queue", queued);
    }

    info!("Shutdown complete");
    served
}

async fn connect_store(config: &StorageConfig) -> Result<Arc<dyn TransactionStore>> {
    let Some(uri) = config.mongodb_uri.as_deref().filter(|uri| !uri.trim().is_empty()) else {
        warn!("No MongoDB URI configured, transactions are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let store = MongoStore::connect(uri, config)
        .await
        .context("failed to create MongoDB client")?;
    retry(|| store.ping(), &RetryConfig::default(), "MongoDB ping")
        .await
        .context("failed to connect to MongoDB")?;
    store
        .ensure_indexes()
        .await
        .context("failed to create transaction indexes")?;
    info!("Successfully connected to MongoDB");

    Ok(Arc::new(store))
}
