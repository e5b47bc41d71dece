//! bosun scheduler.
//!
//! Registers with the cluster master as a framework, serves the control
//! API, and drives the event loop until shutdown. Exit status is zero on
//! graceful shutdown and non-zero on configuration errors or a fatal
//! master error event.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bosun_scheduler::api::{self, AppState};
use bosun_scheduler::config::Config;
use bosun_scheduler::controller::EventController;
use bosun_scheduler::master::{HttpMasterCaller, MasterCaller};
use bosun_scheduler::resource::ResourceManager;
use bosun_scheduler::storage::{SqliteStore, Storage};
use bosun_scheduler::task::TaskManager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting bosun scheduler");

    let config = Config::from_env().context("loading configuration")?;
    info!(
        master = %config.master_endpoint,
        framework = %config.framework_name,
        api_addr = %config.api_listen_addr,
        storage = %config.storage_path,
        "Configuration loaded"
    );

    let storage: Arc<dyn Storage> =
        Arc::new(SqliteStore::open(&config.storage_path).context("opening state store")?);
    let tasks = Arc::new(TaskManager::new(storage.clone(), config.persistence));
    let resources = Arc::new(ResourceManager::new());
    let caller: Arc<dyn MasterCaller> =
        Arc::new(HttpMasterCaller::new(&config).context("building master client")?);

    let (intents_tx, intents_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller = EventController::new(
        config.clone(),
        caller,
        tasks.clone(),
        resources.clone(),
        storage,
        intents_rx,
        shutdown_rx.clone(),
    );

    // Control API.
    let state = AppState::new(tasks, resources, intents_tx);
    let router = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(config.api_listen_addr)
        .await
        .context("binding control API listener")?;
    info!(addr = %listener.local_addr()?, "Control API listening");

    let api_shutdown = shutdown_rx.clone();
    let api_handle = tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(wait_for_shutdown(api_shutdown))
            .await;
        if let Err(err) = served {
            error!(error = %err, "Control API server failed");
        }
    });

    // Interrupt handling.
    let signal_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; shutting down");
            let _ = signal_shutdown.send(true);
        }
    });

    let result = controller.run().await;

    let _ = shutdown_tx.send(true);
    let _ = api_handle.await;

    result.context("event controller failed")?;
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
