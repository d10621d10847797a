//! # Sigil Server
//!
//! Main binary: loads configuration, connects the database, runs migrations,
//! starts the expiration sweep, and serves the REST API.

use sigil_api::{AppState, build_router};
use sigil_core::callback::LoggingCallbackSink;
use sigil_core::{ServiceConfig, Services, sweep};
use sigil_db::Database;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = sigil_common::config::init()?;

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sigil=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .init();

    tracing::info!("Starting Sigil v{}", env!("CARGO_PKG_VERSION"));

    // Connect and migrate
    let db = Database::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;
    db.migrate().await?;

    // === Service façade ===
    let services = Arc::new(Services::new(
        db,
        ServiceConfig {
            activation: config.activation.clone(),
            signature: config.signature.clone(),
            security: config.security.clone(),
        },
        Arc::new(LoggingCallbackSink),
    ));

    // === Expiration sweep ===
    // Uncommitted activations past their expiry become REMOVED even when no
    // client ever comes back for them.
    let sweep_handle = sweep::spawn_expiration_sweep(
        services.clone(),
        Duration::from_secs(config.sweep.interval_secs),
    );
    tracing::info!(
        interval_secs = config.sweep.interval_secs,
        "expiration sweep running"
    );

    // === REST API ===
    let router = build_router(AppState { services });
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("REST API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    sweep_handle.abort();
    Ok(())
}
