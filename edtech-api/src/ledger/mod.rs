//! Decision ledger: SQLite-backed persistence
//!
//! Two append-only tables: `suggestions` (immutable once written) and
//! `decisions` (at most one row per suggestion, enforced by its primary
//! key). Idempotent recording and conflict detection ride on SQLite
//! constraints rather than in-process locks, so several service replicas
//! sharing one database file stay correct.

pub mod decisions;
pub mod settings;
pub mod suggestions;

use edtech_common::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Open the ledger database, creating file and tables as needed
pub async fn init_database_pool(db_path: &str) -> Result<SqlitePool> {
    let url = format!("sqlite://{}?mode=rwc", db_path);
    info!("Opening ledger database at {}", db_path);
    let pool = SqlitePool::connect(&url).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create tables and indexes idempotently
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS suggestions (
            suggestion_id         TEXT PRIMARY KEY,
            idempotency_key       TEXT UNIQUE,
            origin                TEXT NOT NULL,
            backend               TEXT NOT NULL,
            devices               TEXT NOT NULL,
            assignments           TEXT NOT NULL,
            confidence            REAL NOT NULL,
            rationale             TEXT NOT NULL,
            human_review_required INTEGER NOT NULL,
            degraded              INTEGER NOT NULL DEFAULT 0,
            created_at_us         INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Keyset pagination scans this order
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_suggestions_created
         ON suggestions(created_at_us DESC, suggestion_id DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS decisions (
            suggestion_id        TEXT PRIMARY KEY,
            outcome              TEXT NOT NULL,
            override_assignments TEXT,
            reviewer             TEXT NOT NULL,
            notes                TEXT,
            decided_at_us        INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
