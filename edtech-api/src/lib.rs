//! edtech-api library interface
//!
//! Classroom VLAN grouping service: sanitizes device snapshots coming in
//! over HTTP or from the controller poller, asks a pluggable inference
//! backend for a grouping proposal, and records every suggestion and
//! reviewer decision in a SQLite ledger with an append-only audit trail.

pub mod api;
pub mod audit;
pub mod error;
pub mod inference;
pub mod ledger;
pub mod models;
pub mod pagination;
pub mod poller;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use crate::api::auth::{ApiKeyLayer, RequestGate};
use crate::api::rate_limit::ApiRateLimiter;
use crate::audit::AuditLog;
use crate::services::{GroupingEngine, Sanitizer};
use axum::Router;
use chrono::{DateTime, Utc};
use edtech_common::config::ServiceConfig;
use sqlx::SqlitePool;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Dependency flags surfaced by /health
pub struct HealthFlags {
    /// Raised by the poller after repeated fetch failures, cleared on the
    /// next success
    pub device_source_degraded: AtomicBool,
    pub poller_enabled: bool,
}

impl HealthFlags {
    pub fn new(poller_enabled: bool) -> Self {
        Self {
            device_source_degraded: AtomicBool::new(false),
            poller_enabled,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Ledger connection pool
    pub db: SqlitePool,
    pub config: Arc<ServiceConfig>,
    pub sanitizer: Arc<Sanitizer>,
    pub engine: Arc<GroupingEngine>,
    pub audit: Arc<AuditLog>,
    pub health: Arc<HealthFlags>,
    /// Service startup timestamp for uptime reporting
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        config: Arc<ServiceConfig>,
        sanitizer: Arc<Sanitizer>,
        engine: Arc<GroupingEngine>,
        audit: Arc<AuditLog>,
        health: Arc<HealthFlags>,
    ) -> Self {
        Self {
            db,
            config,
            sanitizer,
            engine,
            audit,
            health,
            started_at: Utc::now(),
        }
    }
}

/// Build application router
///
/// Health and version stay outside the key gate; every other route sits
/// behind API-key auth plus the per-caller rate limiter.
pub fn build_router(state: AppState) -> Router {
    let gate = Arc::new(RequestGate::new(
        state.config.api_key.clone(),
        ApiRateLimiter::new(&state.config.rate_limit),
    ));

    let protected = Router::new()
        .merge(api::vlan_group_routes())
        .merge(api::decision_routes())
        .merge(api::suggestion_routes())
        .layer(ApiKeyLayer::new(gate));

    Router::new()
        .merge(api::health_routes())
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
