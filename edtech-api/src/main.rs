//! edtech-api - Classroom VLAN grouping service
//!
//! Accepts raw device snapshots over HTTP (or pulls them from a UniFi
//! controller), strips identifying data, asks the configured inference
//! backend for a VLAN grouping, and records every suggestion and reviewer
//! decision in a SQLite ledger.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use sqlx::SqlitePool;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edtech_api::audit::AuditLog;
use edtech_api::inference::heuristic::HeuristicBackend;
use edtech_api::inference::ollama::OllamaBackend;
use edtech_api::inference::InferenceBackend;
use edtech_api::ledger;
use edtech_api::poller::DevicePoller;
use edtech_api::services::{GroupingEngine, Sanitizer, UniFiClient};
use edtech_api::{AppState, HealthFlags};
use edtech_common::config::{BackendKind, ServiceConfig};

/// Command-line arguments for edtech-api
#[derive(Parser, Debug)]
#[command(name = "edtech-api")]
#[command(about = "VLAN grouping suggestion service for school networks")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5000", env = "EDTECH_PORT")]
    port: u16,

    /// Path to the SQLite ledger database
    #[arg(long, default_value = "edtech.db", env = "EDTECH_DB_PATH")]
    db_path: String,

    /// Path to the TOML configuration file
    #[arg(short, long, env = "EDTECH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edtech_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting edtech-api on port {}", args.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ServiceConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    info!(?config, "Configuration resolved");

    if config.api_key.is_empty() {
        warn!("API authentication disabled: no api_key configured");
    }

    // Open or create the ledger database
    let db = ledger::init_database_pool(&args.db_path)
        .await
        .context("Failed to open ledger database")?;

    // Pseudonymization key: explicit config wins, otherwise a generated
    // key persisted in the database so pseudonyms survive restarts
    let hash_key = match &config.hash_key {
        Some(key) => key.clone(),
        None => ledger::settings::ensure_hash_key(&db)
            .await
            .context("Failed to establish pseudonymization key")?,
    };

    let backend: Arc<dyn InferenceBackend> = match config.inference.backend {
        BackendKind::Heuristic => Arc::new(HeuristicBackend),
        BackendKind::Ollama => Arc::new(
            OllamaBackend::new(
                &config.inference.ollama_url,
                &config.inference.ollama_model,
                Duration::from_secs(config.inference.timeout_secs),
            )
            .context("Failed to build Ollama backend")?,
        ),
    };
    info!(backend = backend.name(), "Inference backend ready");

    let config = Arc::new(config);
    let sanitizer = Arc::new(Sanitizer::new(hash_key).with_denylist(&config.hostname_denylist));
    let engine = Arc::new(GroupingEngine::new(backend, config.review_threshold));
    let audit = Arc::new(AuditLog::new(config.audit_log_path.clone()));

    // Poller only makes sense with a static catalogue to group against
    let poller_active = config.poller.enabled && !config.vlans.is_empty();
    if config.poller.enabled && config.vlans.is_empty() {
        warn!("Poller enabled but no static VLAN catalogue configured; poller stays off");
    }
    let health = Arc::new(HealthFlags::new(poller_active));

    let state = AppState::new(
        db.clone(),
        config.clone(),
        sanitizer.clone(),
        engine.clone(),
        audit.clone(),
        health.clone(),
    );

    // Retention sweep: once at startup, then hourly
    tokio::spawn(retention_sweep_loop(db.clone(), config.retention_days));

    if poller_active {
        let client = build_unifi_client(&config).context("Failed to build controller client")?;
        let poller = DevicePoller::new(
            client,
            sanitizer,
            engine,
            db.clone(),
            audit,
            health,
            Duration::from_secs(config.poller.interval_secs),
            config.vlans.iter().cloned().map(Into::into).collect(),
        );
        tokio::spawn(poller.run());
    }

    let app = edtech_api::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn build_unifi_client(config: &ServiceConfig) -> Result<UniFiClient> {
    let url = config
        .poller
        .unifi_url
        .as_deref()
        .context("Poller enabled without unifi_url")?;
    Ok(UniFiClient::new(
        url,
        config.poller.unifi_username.as_deref().unwrap_or(""),
        config.poller.unifi_password.as_deref().unwrap_or(""),
        &config.poller.unifi_site,
    )?)
}

/// Delete ledger rows older than the retention window, forever
async fn retention_sweep_loop(db: SqlitePool, retention_days: u32) {
    let mut ticker = tokio::time::interval(Duration::from_secs(3600));
    loop {
        ticker.tick().await;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        match ledger::suggestions::prune_older_than(&db, cutoff).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Retention sweep removed expired ledger entries"),
            Err(e) => warn!("Retention sweep failed: {}", e),
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
