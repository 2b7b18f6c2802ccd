//! GET /suggestions: paginated ledger view
//!
//! Newest first, keyset cursor. Each entry embeds its decision when one
//! has been recorded.

use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::ledger::suggestions;
use crate::models::{Decision, Suggestion};
use crate::pagination::{clamp_limit, Cursor};
use crate::AppState;

/// GET /suggestions query parameters
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// One ledger entry as returned to callers
#[derive(Debug, Serialize)]
pub struct SuggestionWithDecision {
    #[serde(flatten)]
    pub suggestion: Suggestion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

/// GET /suggestions response
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub suggestions: Vec<SuggestionWithDecision>,
    /// Opaque token for the next page; absent on the last page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// GET /suggestions?cursor=&limit=
pub async fn list_suggestions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    let cursor = query.cursor.as_deref().map(Cursor::decode).transpose()?;
    let limit = clamp_limit(query.limit);

    let page = suggestions::list(&state.db, limit, cursor).await?;

    Ok(Json(ListResponse {
        suggestions: page
            .entries
            .into_iter()
            .map(|entry| SuggestionWithDecision {
                suggestion: entry.suggestion,
                decision: entry.decision,
            })
            .collect(),
        next_cursor: page.next_cursor.map(|c| c.encode()),
    }))
}

/// Build the ledger listing route
pub fn suggestion_routes() -> Router<AppState> {
    Router::new().route("/suggestions", get(list_suggestions))
}
