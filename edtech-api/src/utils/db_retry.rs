//! Retry logic for transient SQLite lock errors
//!
//! SQLite allows one writer at a time; concurrent ledger writes can hit
//! `database is locked`. Those calls retry with exponential backoff until
//! a wall-clock budget elapses. Every other error fails immediately.

use edtech_common::{Error, Result};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 500;

fn is_lock_error(err: &Error) -> bool {
    let message = err.to_string();
    message.contains("database is locked") || message.contains("database table is locked")
}

/// Run a database operation, retrying lock errors until `max_wait_ms`
/// elapses. Backoff starts at 10ms and doubles up to 500ms per wait.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let budget = Duration::from_millis(max_wait_ms);
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if is_lock_error(&err) => {
                let elapsed = start.elapsed();
                if elapsed >= budget {
                    error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Database still locked after retry budget"
                    );
                    return Err(err);
                }
                warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, retrying after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err),
        }
    }
}
