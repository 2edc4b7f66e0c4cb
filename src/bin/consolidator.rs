//! # Consolidator Server
//!
//! Runs the consolidation pipeline as a standalone service: loads the layered
//! configuration, connects the document store and the queue backend, and
//! starts `dispatcher.workers` polling workers per bound input queue.
//!
//! ## Usage
//!
//! ```bash
//! # In-memory store and queues, default bindings from config/consolidator.toml
//! cargo run --bin consolidator
//!
//! # Production settings
//! CONSOLIDATOR_ENV=production cargo run --release --bin consolidator
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use consolidation_core::collaborators::{CachedNameParser, NoTiles};
use consolidation_core::completeness::ExpectedValueLookup;
use consolidation_core::config::{ConfigLoader, ConsolidatorConfig, MessagingBackend, StoreBackend};
use consolidation_core::consolidation::default_registry;
use consolidation_core::dispatcher::{ConsolidationWorker, MessageDispatcher};
use consolidation_core::logging::init_structured_logging;
use consolidation_core::messaging::{MessagingProvider, PgmqMessagingService};
use consolidation_core::store::{DocumentStore, InMemoryDocumentStore, PgDocumentStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::new().load().context("loading configuration")?;
    init_structured_logging(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        store = ?config.store.backend,
        messaging = ?config.messaging.backend,
        "Starting consolidator"
    );
    if config.engines.is_empty() {
        warn!("No engine bindings configured, workers will stay idle");
    }

    let store = build_store(&config).await?;
    let messaging = Arc::new(build_messaging(&config).await?);

    let lookup = Arc::new(ExpectedValueLookup::default());
    let registry = default_registry(
        lookup,
        CachedNameParser::default(),
        Arc::new(NoTiles),
        &config.completeness,
    )?;
    let chains = registry.build_chains(&config.engines)?;

    let dispatcher = Arc::new(MessageDispatcher::new(
        chains,
        Arc::clone(&messaging),
        store,
        config.dispatcher.clone(),
    ));
    messaging
        .ensure_queues(&dispatcher.queues())
        .await
        .context("creating queues")?;

    let mut workers = Vec::new();
    let mut handles = Vec::new();
    for queue in config.input_queues() {
        for worker_id in 0..config.dispatcher.workers {
            let worker = Arc::new(ConsolidationWorker::new(
                worker_id,
                queue.clone(),
                Arc::clone(&dispatcher),
                Arc::clone(&messaging),
                config.messaging.clone(),
            ));
            handles.push(Arc::clone(&worker).spawn());
            workers.push(worker);
        }
    }
    info!(workers = workers.len(), queues = ?config.input_queues(), "Consolidator running, press Ctrl+C to stop");

    shutdown_signal().await;
    info!("Shutdown signal received, stopping workers");

    for worker in &workers {
        worker.stop();
    }
    for handle in handles {
        if let Err(err) = handle.await {
            error!(error = %err, "Worker task ended abnormally");
        }
    }

    info!("Consolidator stopped");
    Ok(())
}

async fn build_store(config: &ConsolidatorConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryDocumentStore::new())),
        StoreBackend::Postgres => {
            let store = PgDocumentStore::connect(&config.store)
                .await
                .context("connecting document store")?;
            store.ensure_schema().await.context("creating documents table")?;
            Ok(Arc::new(store))
        }
    }
}

async fn build_messaging(config: &ConsolidatorConfig) -> anyhow::Result<MessagingProvider> {
    match config.messaging.backend {
        MessagingBackend::Memory => Ok(MessagingProvider::in_memory().0),
        MessagingBackend::Pgmq => {
            let url = config
                .messaging_database_url()
                .context("messaging.database_url is not configured")?;
            let service = PgmqMessagingService::connect(url, config.store.max_connections)
                .await
                .context("connecting to pgmq")?;
            Ok(MessagingProvider::Pgmq(service))
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
