//! Funnel engine entrypoint: loads config, opens the event store and serves the HTTP API
//! until Ctrl+C.

use funnel_engine::{
    config::{EngineConfig, StoreBackend},
    http::{create_router, AppState},
    logging::StructuredLogger,
    service::QueryService,
    storage::{EventStore, MemoryEventStore, SqliteEventStore},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn open_store(config: &EngineConfig) -> Result<Arc<dyn EventStore>, BoxError> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryEventStore::new())),
        StoreBackend::Sqlite => {
            std::fs::create_dir_all(&config.data_dir)?;
            let path = config.sqlite_path();
            let store = SqliteEventStore::open(&path)?;
            info!(path = %path.display(), version = store.version(), "sqlite store opened");
            Ok(Arc::new(store))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config_path = std::env::var("FUNNEL_CONFIG_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("config.json"));
    let loaded = EngineConfig::load(&config_path);
    let config = loaded.as_ref().cloned().unwrap_or_default();

    StructuredLogger::init(config.log.json, &config.log.level);
    if let Err(e) = &loaded {
        warn!(error = %e, "using default configuration");
    }

    info!(
        data_dir = ?config.data_dir,
        backend = ?config.store.backend,
        "funnel engine starting"
    );

    let store = open_store(&config)?;
    let service = QueryService::new(store, &config)?;
    let router = create_router(Arc::new(AppState::new(service)));

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("funnel engine stopped");
    Ok(())
}
