//! Decision persistence: first-write-wins per suggestion
//!
//! A suggestion takes at most one decision, enforced by the primary key
//! on `decisions.suggestion_id`. The existence check and the insert run
//! inside one transaction, so a suggestion pruned mid-flight cannot pick
//! up an orphaned decision.

use crate::ledger::suggestions::{from_json, from_us, to_json};
use crate::models::Decision;
use crate::utils::db_retry::retry_on_lock;
use edtech_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const WRITE_RETRY_BUDGET_MS: u64 = 2000;

/// Attach a decision to a suggestion.
///
/// Fails with `NotFound` when the suggestion does not exist and with
/// `Conflict` when a decision has already been recorded; neither failure
/// modifies the ledger.
pub async fn decide(pool: &SqlitePool, suggestion_id: Uuid, decision: &Decision) -> Result<()> {
    retry_on_lock("decision insert", WRITE_RETRY_BUDGET_MS, || {
        try_decide(pool, suggestion_id, decision)
    })
    .await
}

async fn try_decide(pool: &SqlitePool, suggestion_id: Uuid, decision: &Decision) -> Result<()> {
    let mut tx = pool.begin().await?;

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM suggestions WHERE suggestion_id = ?")
        .bind(suggestion_id.to_string())
        .fetch_one(&mut *tx)
        .await?;
    if exists == 0 {
        return Err(Error::NotFound(format!(
            "Suggestion {} not found",
            suggestion_id
        )));
    }

    let override_json = decision
        .override_assignments
        .as_ref()
        .map(to_json)
        .transpose()?;
    let result = sqlx::query(
        r#"
        INSERT INTO decisions (
            suggestion_id, outcome, override_assignments, reviewer, notes, decided_at_us
        )
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(suggestion_id) DO NOTHING
        "#,
    )
    .bind(suggestion_id.to_string())
    .bind(decision.outcome.as_str())
    .bind(override_json)
    .bind(&decision.reviewer)
    .bind(&decision.notes)
    .bind(decision.decided_at.timestamp_micros())
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "Suggestion {} already has a decision",
            suggestion_id
        )));
    }

    tx.commit().await?;
    Ok(())
}

/// Fetch the decision for a suggestion, if one exists
pub async fn get_decision(pool: &SqlitePool, suggestion_id: Uuid) -> Result<Option<Decision>> {
    let row = sqlx::query(
        "SELECT outcome, override_assignments, reviewer, notes, decided_at_us
         FROM decisions WHERE suggestion_id = ?",
    )
    .bind(suggestion_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        let outcome_text: String = r.try_get("outcome")?;
        let override_json: Option<String> = r.try_get("override_assignments")?;
        Ok(Decision {
            outcome: outcome_text.parse()?,
            override_assignments: override_json.as_deref().map(from_json).transpose()?,
            reviewer: r.try_get("reviewer")?,
            notes: r.try_get("notes")?,
            decided_at: from_us(r.try_get("decided_at_us")?)?,
        })
    })
    .transpose()
}
