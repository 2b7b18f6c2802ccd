//! POST /decisions/:id: reviewer verdicts on suggestions
//!
//! A verdict is terminal: the first decision for a suggestion wins and
//! any later attempt answers 409.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::{routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::ledger::decisions;
use crate::models::{AssignmentMap, Decision, DecisionOutcome};
use crate::AppState;

/// POST /decisions/:id request
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub outcome: DecisionOutcome,
    /// Replacement mapping; required iff outcome is `overridden`
    #[serde(default)]
    pub override_assignments: Option<AssignmentMap>,
    pub reviewer: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /decisions/:id response
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub suggestion_id: Uuid,
    pub outcome: DecisionOutcome,
    pub decided_at: DateTime<Utc>,
}

/// POST /decisions/:id
pub async fn record_decision(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<DecisionRequest>, JsonRejection>,
) -> ApiResult<Json<DecisionResponse>> {
    let Path(suggestion_id) =
        path.map_err(|_| ApiError::Validation("Invalid suggestion id".to_string()))?;
    let Json(request) =
        payload.map_err(|e| ApiError::Validation(format!("Invalid request body: {}", e)))?;

    validate_decision(&request)?;

    let decision = Decision {
        outcome: request.outcome,
        override_assignments: request.override_assignments,
        reviewer: request.reviewer,
        notes: request.notes,
        decided_at: Utc::now(),
    };

    // Spawned so a disconnecting reviewer cannot leave a half-done write
    {
        let db = state.db.clone();
        let audit = state.audit.clone();
        let to_write = decision.clone();
        tokio::spawn(async move {
            decisions::decide(&db, suggestion_id, &to_write).await?;
            audit.log_decision(suggestion_id, &to_write).await;
            Ok::<_, edtech_common::Error>(())
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Decision write task failed: {}", e)))??;
    }

    tracing::info!(
        %suggestion_id,
        outcome = decision.outcome.as_str(),
        reviewer = %decision.reviewer,
        "Recorded decision"
    );

    Ok(Json(DecisionResponse {
        suggestion_id,
        outcome: decision.outcome,
        decided_at: decision.decided_at,
    }))
}

fn validate_decision(request: &DecisionRequest) -> Result<(), ApiError> {
    if request.reviewer.trim().is_empty() {
        return Err(ApiError::Validation(
            "Reviewer must not be empty".to_string(),
        ));
    }
    match request.outcome {
        DecisionOutcome::Overridden => {
            let overrides = request.override_assignments.as_ref().ok_or_else(|| {
                ApiError::Validation(
                    "Outcome 'overridden' requires override_assignments".to_string(),
                )
            })?;
            if overrides.is_empty() {
                return Err(ApiError::Validation(
                    "override_assignments must not be empty".to_string(),
                ));
            }
            for (device_id, vlan_id) in overrides {
                if *vlan_id == 0 || *vlan_id > 4094 {
                    return Err(ApiError::Validation(format!(
                        "Override for {} names VLAN {} outside 1..=4094",
                        device_id, vlan_id
                    )));
                }
            }
        }
        DecisionOutcome::Approved | DecisionOutcome::Ignored => {
            if request.override_assignments.is_some() {
                return Err(ApiError::Validation(format!(
                    "override_assignments is not valid with outcome '{}'",
                    request.outcome.as_str()
                )));
            }
        }
    }
    Ok(())
}

/// Build the decision routes
pub fn decision_routes() -> Router<AppState> {
    Router::new().route("/decisions/:id", post(record_decision))
}
