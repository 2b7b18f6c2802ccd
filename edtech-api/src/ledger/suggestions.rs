//! Suggestion persistence: idempotent recording and keyset listing
//!
//! Rows are immutable once written. Idempotency uses the `UNIQUE`
//! constraint on `idempotency_key` with insert-or-nothing, so concurrent
//! calls with the same key converge on a single stored row and both
//! callers get that row back.

use crate::models::{Decision, SanitizedDevice, Suggestion};
use crate::pagination::Cursor;
use crate::utils::db_retry::retry_on_lock;
use chrono::{DateTime, Utc};
use edtech_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

/// Wall-clock budget for lock retries on ledger writes
const WRITE_RETRY_BUDGET_MS: u64 = 2000;

/// A suggestion with its decision, if one has been recorded
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub suggestion: Suggestion,
    pub decision: Option<Decision>,
}

/// One newest-first page of the ledger
#[derive(Debug)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    pub next_cursor: Option<Cursor>,
}

/// Record a suggestion.
///
/// When the suggestion carries an idempotency key that has been seen
/// before, the stored suggestion is returned and nothing is written; the
/// unique constraint closes the race between concurrent writers.
pub async fn record(pool: &SqlitePool, suggestion: &Suggestion) -> Result<Suggestion> {
    if let Some(key) = &suggestion.idempotency_key {
        if let Some(existing) = find_by_idempotency_key(pool, key).await? {
            debug!(
                suggestion_id = %existing.suggestion_id,
                "Replaying stored suggestion for repeated idempotency key"
            );
            return Ok(existing);
        }
    }

    let inserted = retry_on_lock("suggestion insert", WRITE_RETRY_BUDGET_MS, || {
        insert_suggestion(pool, suggestion)
    })
    .await?;

    if inserted {
        return Ok(suggestion.clone());
    }
    // A concurrent writer with the same key got there first
    let key = suggestion.idempotency_key.as_deref().ok_or_else(|| {
        Error::Internal("Suggestion insert ignored without an idempotency key".to_string())
    })?;
    find_by_idempotency_key(pool, key)
        .await?
        .ok_or_else(|| Error::Internal("Conflicting suggestion row disappeared".to_string()))
}

async fn insert_suggestion(pool: &SqlitePool, suggestion: &Suggestion) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO suggestions (
            suggestion_id, idempotency_key, origin, backend, devices,
            assignments, confidence, rationale, human_review_required,
            degraded, created_at_us
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(idempotency_key) DO NOTHING
        "#,
    )
    .bind(suggestion.suggestion_id.to_string())
    .bind(&suggestion.idempotency_key)
    .bind(suggestion.origin.as_str())
    .bind(&suggestion.backend)
    .bind(to_json(&suggestion.devices)?)
    .bind(to_json(&suggestion.assignments)?)
    .bind(suggestion.confidence)
    .bind(&suggestion.rationale)
    .bind(suggestion.human_review_required)
    .bind(suggestion.degraded)
    .bind(suggestion.created_at.timestamp_micros())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Look up the stored suggestion for an idempotency key
pub async fn find_by_idempotency_key(
    pool: &SqlitePool,
    key: &str,
) -> Result<Option<Suggestion>> {
    let row = sqlx::query(
        "SELECT suggestion_id, idempotency_key, origin, backend, devices, assignments,
                confidence, rationale, human_review_required, degraded, created_at_us
         FROM suggestions WHERE idempotency_key = ?",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;
    row.map(|r| suggestion_from_row(&r)).transpose()
}

/// Fetch one suggestion with its decision, if any
pub async fn get(pool: &SqlitePool, suggestion_id: Uuid) -> Result<Option<LedgerEntry>> {
    let row = sqlx::query(&format!("{} WHERE s.suggestion_id = ?", LIST_BASE))
        .bind(suggestion_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(|r| entry_from_row(&r).map(|(_, entry)| entry))
        .transpose()
}

/// List the ledger newest-first with keyset pagination.
///
/// Returns up to `limit` entries plus the cursor for the next page when
/// more rows remain. Rows inserted between calls sort above every
/// already-returned position, so pre-existing rows are never duplicated
/// or skipped.
pub async fn list(
    pool: &SqlitePool,
    limit: u32,
    cursor: Option<Cursor>,
) -> Result<LedgerPage> {
    let fetch = i64::from(limit) + 1;
    let rows = match cursor {
        Some(c) => {
            let query = format!(
                "{} WHERE s.created_at_us < ? OR (s.created_at_us = ? AND s.suggestion_id < ?)
                 ORDER BY s.created_at_us DESC, s.suggestion_id DESC LIMIT ?",
                LIST_BASE
            );
            sqlx::query(&query)
                .bind(c.created_at_us)
                .bind(c.created_at_us)
                .bind(c.suggestion_id.to_string())
                .bind(fetch)
                .fetch_all(pool)
                .await?
        }
        None => {
            let query = format!(
                "{} ORDER BY s.created_at_us DESC, s.suggestion_id DESC LIMIT ?",
                LIST_BASE
            );
            sqlx::query(&query).bind(fetch).fetch_all(pool).await?
        }
    };

    let has_more = rows.len() as i64 > i64::from(limit);
    let mut entries = Vec::with_capacity(rows.len().min(limit as usize));
    let mut last_position = None;
    for row in rows.iter().take(limit as usize) {
        let (created_at_us, entry) = entry_from_row(row)?;
        last_position = Some(Cursor {
            created_at_us,
            suggestion_id: entry.suggestion.suggestion_id,
        });
        entries.push(entry);
    }

    Ok(LedgerPage {
        entries,
        next_cursor: if has_more { last_position } else { None },
    })
}

/// Delete suggestion/decision pairs older than the cutoff.
///
/// Runs as one transaction so a decision never outlives its suggestion.
/// Returns the number of suggestions removed.
pub async fn prune_older_than(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let cutoff_us = cutoff.timestamp_micros();
    retry_on_lock("retention prune", WRITE_RETRY_BUDGET_MS, || {
        try_prune(pool, cutoff_us)
    })
    .await
}

async fn try_prune(pool: &SqlitePool, cutoff_us: i64) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM decisions WHERE suggestion_id IN
         (SELECT suggestion_id FROM suggestions WHERE created_at_us < ?)",
    )
    .bind(cutoff_us)
    .execute(&mut *tx)
    .await?;
    let result = sqlx::query("DELETE FROM suggestions WHERE created_at_us < ?")
        .bind(cutoff_us)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected())
}

const LIST_BASE: &str = "SELECT s.suggestion_id, s.idempotency_key, s.origin, s.backend,
        s.devices, s.assignments, s.confidence, s.rationale,
        s.human_review_required, s.degraded, s.created_at_us,
        d.outcome, d.override_assignments, d.reviewer, d.notes, d.decided_at_us
 FROM suggestions s LEFT JOIN decisions d ON d.suggestion_id = s.suggestion_id";

// ============================================================================
// Row mapping
// ============================================================================

fn suggestion_from_row(row: &SqliteRow) -> Result<Suggestion> {
    let id_text: String = row.try_get("suggestion_id")?;
    let origin_text: String = row.try_get("origin")?;
    let devices_json: String = row.try_get("devices")?;
    let assignments_json: String = row.try_get("assignments")?;
    let devices: Vec<SanitizedDevice> = from_json(&devices_json)?;

    Ok(Suggestion {
        suggestion_id: id_text
            .parse::<Uuid>()
            .map_err(|e| Error::Internal(format!("Corrupt suggestion id: {}", e)))?,
        origin: origin_text.parse()?,
        backend: row.try_get("backend")?,
        devices,
        assignments: from_json(&assignments_json)?,
        confidence: row.try_get("confidence")?,
        rationale: row.try_get("rationale")?,
        human_review_required: row.try_get("human_review_required")?,
        degraded: row.try_get("degraded")?,
        created_at: from_us(row.try_get("created_at_us")?)?,
        idempotency_key: row.try_get("idempotency_key")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<(i64, LedgerEntry)> {
    let created_at_us: i64 = row.try_get("created_at_us")?;
    let suggestion = suggestion_from_row(row)?;

    let decision = match row.try_get::<Option<String>, _>("outcome")? {
        Some(outcome_text) => {
            let override_json: Option<String> = row.try_get("override_assignments")?;
            Some(Decision {
                outcome: outcome_text.parse()?,
                override_assignments: override_json.as_deref().map(from_json).transpose()?,
                reviewer: row.try_get("reviewer")?,
                notes: row.try_get("notes")?,
                decided_at: from_us(row.try_get("decided_at_us")?)?,
            })
        }
        None => None,
    };

    Ok((created_at_us, LedgerEntry { suggestion, decision }))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Cannot serialize ledger column: {}", e)))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json)
        .map_err(|e| Error::Internal(format!("Corrupt ledger column: {}", e)))
}

pub(crate) fn from_us(us: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| Error::Internal(format!("Timestamp {} out of range", us)))
}
