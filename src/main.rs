//! Ledger Service - Main Application Entry Point
//!
//! REST API server for customer currency accounts, idempotent postings, balance history
//! and usage metrics.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Build the ledger engine and HTTP router
//! 5. Serve until Ctrl-C, then drain in-flight requests and close the pool

use std::sync::Arc;

use ledger_service::{
    AppState, LedgerService, clock::SystemClock, config::Config, db, router, store::PgStore,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG, defaults to "info"
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    let settings = config.ledger_settings();
    tracing::info!(?settings, "Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let store = PgStore::new(pool.clone(), settings.lock_timeout);
    let ledger = LedgerService::new(store, settings, Arc::new(SystemClock));
    let app = router(AppState::new(ledger));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("Shut down cleanly");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        // Without a signal handler keep serving instead of exiting at once
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
