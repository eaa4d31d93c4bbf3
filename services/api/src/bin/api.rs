//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{FileKeyValueStore, HttpBillingAdapter, PgIdentityProvider, PgRemoteStore},
    config::Config,
    error::ApiError,
    web::{router, state::AppState},
};
use custodyx_core::{
    migration::{DataMigrationService, MigrationFlow},
    remote::RemoteClient,
    session::SessionContext,
    snapshot::SnapshotReader,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let remote_store = Arc::new(PgRemoteStore::new(db_pool.clone()));
    info!("Running database migrations...");
    remote_store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let local_store = Arc::new(FileKeyValueStore::open(&config.local_store_path)?);
    let identity = Arc::new(PgIdentityProvider::new(
        db_pool.clone(),
        local_store.clone(),
        config.session_ttl,
    ));
    let billing = Arc::new(HttpBillingAdapter::new(
        config.billing_api_url.clone(),
        config.app_origin.clone(),
    ));

    // --- 4. Build the Core Services ---
    let remote = RemoteClient::new(remote_store);
    let migration = MigrationFlow::new(Arc::new(DataMigrationService::new(
        SnapshotReader::new(local_store),
        remote.clone(),
    )));
    let session = Arc::new(SessionContext::new(identity, remote));
    session.initialize().await;

    let shutdown = CancellationToken::new();
    let listener_task = session.clone().subscribe(shutdown.clone());

    // --- 5. Build the Shared AppState & Router ---
    let app_state = Arc::new(AppState::new(config.clone(), session, migration, billing));
    let app = router(app_state);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown requested.");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    listener_task.await?;
    Ok(())
}
