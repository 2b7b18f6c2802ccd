//! Health and version endpoints
//!
//! Both are unauthenticated so monitors and load balancers can hit them
//! without credentials.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::Ordering;

use crate::AppState;

/// GET /health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub inference: InferenceHealth,
    /// Absent when the poller is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_source: Option<DeviceSourceHealth>,
}

#[derive(Debug, Serialize)]
pub struct InferenceHealth {
    pub backend: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeviceSourceHealth {
    pub degraded: bool,
}

/// GET /health
///
/// Live-probes the inference backend and reports the poller's
/// device-source flag. Always answers 200; trouble shows up as
/// `status: "degraded"`, never as an error.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.started_at);
    let probe = state.engine.backend().probe().await;

    let device_source = state.health.poller_enabled.then(|| DeviceSourceHealth {
        degraded: state.health.device_source_degraded.load(Ordering::Relaxed),
    });

    let degraded =
        !probe.reachable || device_source.as_ref().map(|d| d.degraded).unwrap_or(false);

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        service: "edtech-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        inference: InferenceHealth {
            backend: state.engine.backend().name().to_string(),
            reachable: probe.reachable,
            version: probe.version,
        },
        device_source,
    })
}

/// GET /api/version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub service: String,
    pub version: String,
    pub backend: BackendVersion,
}

#[derive(Debug, Serialize)]
pub struct BackendVersion {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// GET /api/version
pub async fn get_version(State(state): State<AppState>) -> Json<VersionResponse> {
    let probe = state.engine.backend().probe().await;
    Json(VersionResponse {
        service: "edtech-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: BackendVersion {
            name: state.engine.backend().name().to_string(),
            version: probe.version,
        },
    })
}

/// Build the unauthenticated routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/version", get(get_version))
}
