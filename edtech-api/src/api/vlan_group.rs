//! POST /vlan-group: the suggestion pipeline entry point
//!
//! Sanitizes the submitted devices, runs the grouping engine, records the
//! result in the ledger, appends to the audit trail, and answers with the
//! full suggestion. Nothing is logged or persisted before sanitization
//! succeeds, so raw identifiers from rejected requests leave no trace.

use axum::extract::rejection::JsonRejection;
use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::ledger::suggestions;
use crate::models::{RawDevice, Suggestion, SuggestionOrigin, VlanEntry};
use crate::AppState;

/// POST /vlan-group request
#[derive(Debug, Deserialize)]
pub struct VlanGroupRequest {
    pub devices: Vec<RawDevice>,
    /// Catalogue override for this request only; absent means the static
    /// configured catalogue
    #[serde(default)]
    pub vlans: Option<Vec<VlanEntry>>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// POST /vlan-group
pub async fn create_vlan_group(
    State(state): State<AppState>,
    payload: Result<Json<VlanGroupRequest>, JsonRejection>,
) -> ApiResult<Json<Suggestion>> {
    let Json(request) =
        payload.map_err(|e| ApiError::Validation(format!("Invalid request body: {}", e)))?;

    // Replay check first: a repeated key answers from the ledger without
    // touching the sanitizer or the backend
    if let Some(key) = &request.idempotency_key {
        if let Some(existing) = suggestions::find_by_idempotency_key(&state.db, key).await? {
            tracing::debug!(
                suggestion_id = %existing.suggestion_id,
                "Replaying stored suggestion for repeated idempotency key"
            );
            return Ok(Json(existing));
        }
    }

    let sanitized = state.sanitizer.sanitize_all(&request.devices)?;

    let catalogue: Vec<VlanEntry> = match request.vlans {
        Some(vlans) => vlans,
        None => state
            .config
            .vlans
            .iter()
            .cloned()
            .map(VlanEntry::from)
            .collect(),
    };

    let suggestion = state
        .engine
        .suggest(
            sanitized,
            catalogue,
            SuggestionOrigin::Api,
            request.idempotency_key,
        )
        .await?;

    // Recording runs in its own task so a client that disconnects after
    // the engine answered still gets its suggestion persisted
    let stored = {
        let db = state.db.clone();
        let audit = state.audit.clone();
        let suggestion = suggestion.clone();
        tokio::spawn(async move {
            let stored = suggestions::record(&db, &suggestion).await?;
            audit.log_suggestion(&stored).await;
            Ok::<_, edtech_common::Error>(stored)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Ledger write task failed: {}", e)))??
    };

    tracing::info!(
        suggestion_id = %stored.suggestion_id,
        backend = %stored.backend,
        devices = stored.devices.len(),
        confidence = stored.confidence,
        degraded = stored.degraded,
        "Recorded VLAN suggestion"
    );

    Ok(Json(stored))
}

/// Build the suggestion pipeline route
pub fn vlan_group_routes() -> Router<AppState> {
    Router::new().route("/vlan-group", post(create_vlan_group))
}
