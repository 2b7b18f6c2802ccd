//! Domain types for the VLAN suggestion pipeline
//!
//! `RawDevice` is the only type that ever carries unsanitized input. It is
//! deliberately not `Serialize` and its `Debug` output is redacted, so raw
//! identifiers cannot reach the ledger, the audit log, or a log line. Every
//! layer past the sanitizer works on `SanitizedDevice`.

use chrono::{DateTime, Utc};
use edtech_common::config::VlanConfigEntry;
use edtech_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Assignment map: pseudonymous device ID to VLAN ID
///
/// BTreeMap keeps key order deterministic in serialized output.
pub type AssignmentMap = BTreeMap<String, u16>;

/// A device exactly as reported by a caller or the controller poller
#[derive(Clone, Deserialize)]
pub struct RawDevice {
    /// Hardware MAC address, `aa:bb:cc:dd:ee:ff` or `AA-BB-...` form
    pub mac: String,
    /// SSID the device associated with
    pub ssid: String,
    /// Received signal strength, dBm
    pub signal: i32,
    /// Free-text hostname as reported; may embed personal information
    #[serde(default)]
    pub hostname: Option<String>,
}

impl fmt::Debug for RawDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDevice")
            .field("mac", &"[redacted]")
            .field("ssid", &self.ssid)
            .field("signal", &self.signal)
            .field("hostname", &self.hostname.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// A device after sanitization: pseudonymous ID, cleaned hostname
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SanitizedDevice {
    /// Stable pseudonym, `device-` + keyed hash prefix
    pub device_id: String,
    pub ssid: String,
    pub signal: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// One VLAN the engine may assign devices to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VlanEntry {
    /// 802.1Q VLAN identifier, 1..=4094
    pub id: u16,
    /// Human label, matched against SSIDs by the heuristic
    pub label: String,
    /// Soft capacity hint surfaced to the inference backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
}

impl VlanEntry {
    pub fn validate(&self) -> Result<()> {
        if self.id == 0 || self.id > 4094 {
            return Err(Error::Validation(format!(
                "VLAN id {} outside 1..=4094",
                self.id
            )));
        }
        if self.label.trim().is_empty() {
            return Err(Error::Validation(format!(
                "VLAN {} has an empty label",
                self.id
            )));
        }
        Ok(())
    }
}

impl From<VlanConfigEntry> for VlanEntry {
    fn from(entry: VlanConfigEntry) -> Self {
        VlanEntry {
            id: entry.id,
            label: entry.label,
            capacity: entry.capacity,
        }
    }
}

/// Where a suggestion entered the pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionOrigin {
    /// Direct POST /vlan-group call
    Api,
    /// Background device-source poller
    Poller,
}

impl SuggestionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionOrigin::Api => "api",
            SuggestionOrigin::Poller => "poller",
        }
    }
}

impl FromStr for SuggestionOrigin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "api" => Ok(SuggestionOrigin::Api),
            "poller" => Ok(SuggestionOrigin::Poller),
            other => Err(Error::Internal(format!("Unknown origin '{}'", other))),
        }
    }
}

/// Reviewer verdict on a suggestion; terminal, at most one per suggestion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecisionOutcome {
    Approved,
    Overridden,
    Ignored,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Approved => "approved",
            DecisionOutcome::Overridden => "overridden",
            DecisionOutcome::Ignored => "ignored",
        }
    }
}

impl FromStr for DecisionOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "approved" => Ok(DecisionOutcome::Approved),
            "overridden" => Ok(DecisionOutcome::Overridden),
            "ignored" => Ok(DecisionOutcome::Ignored),
            other => Err(Error::Internal(format!("Unknown outcome '{}'", other))),
        }
    }
}

/// An immutable grouping suggestion as produced by the engine and stored
/// in the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggestion_id: Uuid,
    pub origin: SuggestionOrigin,
    /// Name of the backend that produced the accepted mapping
    pub backend: String,
    /// Snapshot of the sanitized devices this suggestion covers
    pub devices: Vec<SanitizedDevice>,
    pub assignments: AssignmentMap,
    /// Backend confidence, clamped to 0.0..=1.0
    pub confidence: f64,
    pub rationale: String,
    pub human_review_required: bool,
    /// True when the configured backend failed and the heuristic answered
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// A recorded decision on a suggestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    /// Replacement mapping; present iff the outcome is `overridden`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_assignments: Option<AssignmentMap>,
    pub reviewer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}
