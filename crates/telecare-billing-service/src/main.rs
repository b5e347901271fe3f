//! Telecare Billing Service - payment webhook reconciliation and subscription activation.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telecare_billing_service::{create_router, AppState, ServiceConfig};
use telecare_billing_store::{PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,telecare_billing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Telecare Billing Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        postgres = %config.database_url.is_some(),
        data_dir = %config.data_dir,
        fee_tolerance_percent = %config.fee_tolerance_percent,
        supported_currencies = ?config.supported_currencies,
        accepted_event_types = ?config.accepted_event_types,
        signing_key_configured = %config.gateway_signing_key.is_some(),
        test_webhook = %config.enable_test_webhook,
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;

    let state = AppState::new(store, config.clone())?;

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// PostgreSQL when `DATABASE_URL` is set, otherwise `RocksDB` (if compiled in), otherwise memory.
async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if let Some(url) = &config.database_url {
        tracing::info!(
            max_connections = config.database_max_connections,
            "Connecting to PostgreSQL"
        );
        let store = PgStore::connect(url, config.database_max_connections).await?;
        store.migrate().await?;
        let store: Arc<dyn Store> = Arc::new(store);
        return Ok(store);
    }

    #[cfg(feature = "rocksdb-backend")]
    {
        tracing::info!(path = %config.data_dir, "Opening RocksDB store");
        let store: Arc<dyn Store> =
            Arc::new(telecare_billing_store::RocksStore::open(&config.data_dir)?);
        Ok(store)
    }

    #[cfg(not(feature = "rocksdb-backend"))]
    {
        tracing::warn!(
            "No DATABASE_URL and RocksDB not compiled in - using in-memory store, data will not survive a restart"
        );
        let store: Arc<dyn Store> = Arc::new(telecare_billing_store::MemoryStore::new());
        Ok(store)
    }
}
