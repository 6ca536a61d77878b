use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scraperdash_core::{
    load_config, validate_config, Config, EventBus, FleetRegistry, FleetSimulator,
    MemoryTaskStore, Orchestrator, SqliteTaskStore, StoreBackend, TaskStore,
};
use scraperdash_server::{create_router, AppState, WsBroadcaster};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("SCRAPERDASH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!(version = VERSION, "Configuration loaded successfully");
    info!("Task store backend: {}", config.store.backend.as_str());

    let store = create_store(&config)?;

    // Bus and fleet registry
    let bus = Arc::new(EventBus::new());
    let fleet = Arc::new(FleetRegistry::new());
    fleet
        .attach(&bus)
        .context("Failed to attach fleet registry")?;

    // WebSocket fan-out, attached before anything publishes
    let ws_broadcaster = WsBroadcaster::new(config.orchestrator.event_buffer);
    ws_broadcaster
        .attach(&bus)
        .context("Failed to attach WebSocket broadcaster")?;
    info!("WebSocket broadcaster initialized");

    // Simulated fleet, if enabled
    let simulator = if config.simulator.enabled {
        let sim = Arc::new(FleetSimulator::new(
            config.simulator.clone(),
            Arc::clone(&bus),
        ));
        sim.start()
            .await
            .context("Failed to start fleet simulator")?;
        info!(
            workers = config.simulator.workers.len(),
            "Fleet simulator started"
        );
        Some(sim)
    } else {
        info!("Fleet simulator disabled in config");
        None
    };

    // Orchestrator
    let orchestrator = Arc::new(
        Orchestrator::new(
            config.orchestrator.clone(),
            Arc::clone(&bus),
            store,
            Arc::clone(&fleet),
        )
        .context("Failed to create orchestrator")?
        .with_heartbeat_freshness(config.fleet.heartbeat_freshness_secs),
    );
    orchestrator
        .start()
        .await
        .context("Failed to start orchestrator")?;
    info!("Orchestrator started");

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&orchestrator),
        simulator.clone(),
        ws_broadcaster,
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    info!("Stopping orchestrator...");
    orchestrator.stop().await;
    info!("Orchestrator stopped");

    if let Some(sim) = simulator {
        sim.stop();
        info!("Fleet simulator stopped");
    }

    fleet.detach(&bus);

    Ok(())
}

fn create_store(config: &Config) -> Result<Arc<dyn TaskStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory task store");
            Ok(Arc::new(MemoryTaskStore::new()))
        }
        StoreBackend::Sqlite => {
            let path = config
                .store
                .path
                .as_deref()
                .context("store.path is required for the sqlite backend")?;
            let store = SqliteTaskStore::new(path)
                .with_context(|| format!("Failed to open task store at {:?}", path))?;
            info!("SQLite task store initialized at {:?}", path);
            Ok(Arc::new(store))
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
