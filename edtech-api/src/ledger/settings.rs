//! Service-level key/value settings
//!
//! Holds small operational values that must survive restarts, most
//! importantly the pseudonymization hash key. The key is generated on
//! first start and then reused, so device pseudonyms stay stable for
//! the life of the database.

use edtech_common::Result;
use rand::Rng;
use sqlx::SqlitePool;
use tracing::info;

/// Settings row holding the sanitizer hash key
const HASH_KEY_SETTING: &str = "sanitizer_hash_key";

/// Read a setting value
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value)
}

/// Write a setting value, replacing any existing one
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Return the persisted pseudonymization key, generating one on first use.
///
/// Insert-or-nothing keeps concurrent first starts convergent: whichever
/// writer lands first wins and everyone reads that key back.
pub async fn ensure_hash_key(pool: &SqlitePool) -> Result<String> {
    if let Some(key) = get_setting(pool, HASH_KEY_SETTING).await? {
        return Ok(key);
    }

    let generated = generate_hash_key();
    let result = sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING",
    )
    .bind(HASH_KEY_SETTING)
    .bind(&generated)
    .execute(pool)
    .await?;
    if result.rows_affected() > 0 {
        info!("Generated new pseudonymization hash key");
    }

    get_setting(pool, HASH_KEY_SETTING)
        .await?
        .ok_or_else(|| edtech_common::Error::Internal("Hash key row disappeared".to_string()))
}

fn generate_hash_key() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
