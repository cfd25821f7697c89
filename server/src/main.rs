//! Shopchat Server - Main Entry Point
//!
//! Real-time storefront assistant chat backend.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use shopchat_server::{api, config, db};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shopchat_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Shopchat Server"
    );

    // Initialize database
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;
    let store = Arc::new(db::PgStore::new(db_pool));

    if config.has_assistant() {
        info!(
            assistant = %config.assistant_name,
            timeout_secs = config.webhook_timeout().as_secs(),
            has_api_key = config.webhook_secret.is_some(),
            "Automation webhook configured"
        );
    } else {
        warn!("AUTOMATION_WEBHOOK_URL not set. Assistant replies disabled.");
    }

    // Build application state
    let bind_address = config.bind_address.clone();
    let state = api::AppState::new(store, config).context("Failed to build webhook client")?;

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
