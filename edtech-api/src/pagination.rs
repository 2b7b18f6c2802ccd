//! Opaque cursor pagination for ledger listings
//!
//! Cursors encode the (created_at, suggestion_id) position of the last row
//! the caller has seen; the next page selects rows strictly below that
//! position in (created_at DESC, id DESC) order. Rows inserted between page
//! fetches sort above every already-returned position, so pre-existing rows
//! are never duplicated or skipped while paging.
//!
//! The token is base64 so callers treat it as opaque; its layout may change
//! between releases.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use edtech_common::{Error, Result};
use uuid::Uuid;

/// Page size when the caller does not pass `limit`
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Hard cap on caller-supplied `limit`
pub const MAX_PAGE_SIZE: u32 = 100;

/// Position of the last returned row in (created_at_us, suggestion_id)
/// descending order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Creation timestamp, microseconds since the Unix epoch
    pub created_at_us: i64,
    pub suggestion_id: Uuid,
}

impl Cursor {
    /// Encode as an opaque URL-safe token
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.created_at_us, self.suggestion_id))
    }

    /// Decode a caller-supplied token
    ///
    /// Any malformed token maps to a validation error; the message never
    /// echoes the token back.
    pub fn decode(token: &str) -> Result<Cursor> {
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| bad_cursor())?;
        let text = String::from_utf8(bytes).map_err(|_| bad_cursor())?;
        let (ts, id) = text.split_once(':').ok_or_else(bad_cursor)?;
        Ok(Cursor {
            created_at_us: ts.parse().map_err(|_| bad_cursor())?,
            suggestion_id: id.parse().map_err(|_| bad_cursor())?,
        })
    }
}

fn bad_cursor() -> Error {
    Error::Validation("Invalid pagination cursor".to_string())
}

/// Clamp a caller-supplied limit into 1..=MAX_PAGE_SIZE
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE)
}
