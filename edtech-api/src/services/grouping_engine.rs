//! Grouping engine: devices + VLAN catalogue in, suggestion out
//!
//! The engine renders a prompt, asks the configured inference backend for
//! a proposal, and validates the proposal against the coverage invariant
//! (every device assigned exactly once, only catalogue VLANs). Any backend
//! failure degrades to the deterministic heuristic, so `suggest` only
//! fails on invalid input, never on inference trouble.

use crate::inference::{
    heuristic::{heuristic_assignments, HEURISTIC_CONFIDENCE},
    infer_with_retry, InferenceBackend, InferenceInput, DEFAULT_BASE_BACKOFF,
    DEFAULT_MAX_RETRIES,
};
use crate::models::{
    AssignmentMap, SanitizedDevice, Suggestion, SuggestionOrigin, VlanEntry,
};
use chrono::Utc;
use edtech_common::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Degradation note recorded when the backend could not be reached
const NOTE_UNAVAILABLE: &str =
    "Inference backend unavailable; deterministic fallback applied.";

/// Degradation note recorded when the backend answered unusably
const NOTE_UNUSABLE: &str =
    "Inference output failed validation; deterministic fallback applied.";

pub struct GroupingEngine {
    backend: Arc<dyn InferenceBackend>,
    /// Suggestions below this confidence require human review
    review_threshold: f64,
    max_retries: u32,
    base_backoff: Duration,
}

/// A validated proposal, whichever backend produced it
struct Proposal {
    assignments: AssignmentMap,
    confidence: f64,
    rationale: String,
    backend_name: String,
}

/// Wire shape the backends are asked to produce
#[derive(Deserialize)]
struct ProposalWire {
    assignments: AssignmentMap,
    confidence: f64,
    #[serde(default)]
    rationale: Option<String>,
}

impl GroupingEngine {
    pub fn new(backend: Arc<dyn InferenceBackend>, review_threshold: f64) -> Self {
        GroupingEngine {
            backend,
            review_threshold,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: DEFAULT_BASE_BACKOFF,
        }
    }

    /// Override the retry policy (tests use tiny backoffs)
    pub fn with_retry_policy(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    /// Produce a suggestion for the given sanitized devices.
    ///
    /// Fails only on invalid input: an empty device list, an empty or
    /// malformed VLAN catalogue. Inference failures degrade to the
    /// heuristic with a note in the rationale and `degraded = true`.
    pub async fn suggest(
        &self,
        devices: Vec<SanitizedDevice>,
        vlans: Vec<VlanEntry>,
        origin: SuggestionOrigin,
        idempotency_key: Option<String>,
    ) -> Result<Suggestion> {
        validate_request(&devices, &vlans)?;

        let input = InferenceInput {
            prompt: render_prompt(&devices, &vlans),
            devices,
            vlans,
        };

        let (proposal, degraded) = match infer_with_retry(
            self.backend.as_ref(),
            &input,
            self.max_retries,
            self.base_backoff,
        )
        .await
        {
            Ok(text) => match parse_proposal(&text, &input.devices, &input.vlans) {
                Ok(wire) => (
                    Proposal {
                        assignments: wire.assignments,
                        confidence: wire.confidence.clamp(0.0, 1.0),
                        rationale: wire
                            .rationale
                            .unwrap_or_else(|| "No rationale provided.".to_string()),
                        backend_name: self.backend.name().to_string(),
                    },
                    false,
                ),
                Err(reason) => {
                    warn!(
                        backend = self.backend.name(),
                        "Discarding inference proposal: {}", reason
                    );
                    (self.fallback(&input, NOTE_UNUSABLE), true)
                }
            },
            Err(err) => {
                warn!(
                    backend = self.backend.name(),
                    "Inference failed, falling back: {}", err
                );
                (self.fallback(&input, NOTE_UNAVAILABLE), true)
            }
        };

        let human_review_required = proposal.confidence < self.review_threshold;
        debug!(
            backend = %proposal.backend_name,
            confidence = proposal.confidence,
            degraded,
            human_review_required,
            device_count = input.devices.len(),
            "Produced grouping proposal"
        );

        Ok(Suggestion {
            suggestion_id: Uuid::new_v4(),
            origin,
            backend: proposal.backend_name,
            devices: input.devices,
            assignments: proposal.assignments,
            confidence: proposal.confidence,
            rationale: proposal.rationale,
            human_review_required,
            degraded,
            created_at: Utc::now(),
            idempotency_key,
        })
    }

    /// Deterministic fallback; cannot fail for a validated request
    fn fallback(&self, input: &InferenceInput, note: &str) -> Proposal {
        let assignments = heuristic_assignments(&input.devices, &input.vlans);
        Proposal {
            assignments,
            confidence: HEURISTIC_CONFIDENCE,
            rationale: format!("{} Rule-based SSID/label match applied.", note),
            backend_name: "heuristic".to_string(),
        }
    }
}

fn validate_request(devices: &[SanitizedDevice], vlans: &[VlanEntry]) -> Result<()> {
    if devices.is_empty() {
        return Err(Error::Validation("Device list is empty".to_string()));
    }
    if vlans.is_empty() {
        return Err(Error::Validation("VLAN catalogue is empty".to_string()));
    }
    let mut ids = HashSet::new();
    for vlan in vlans {
        vlan.validate()?;
        if !ids.insert(vlan.id) {
            return Err(Error::Validation(format!("Duplicate VLAN id {}", vlan.id)));
        }
    }
    Ok(())
}

/// Validate proposal text against the request it answers.
///
/// Checks, in order: a JSON object can be extracted, it parses to the
/// expected shape, its confidence is finite, it covers every device
/// exactly once, and every assigned VLAN exists in the catalogue.
fn parse_proposal(
    text: &str,
    devices: &[SanitizedDevice],
    vlans: &[VlanEntry],
) -> std::result::Result<ProposalWire, String> {
    let object = extract_json_object(text).ok_or("no JSON object in response")?;
    let wire: ProposalWire =
        serde_json::from_str(object).map_err(|e| format!("unparseable proposal: {}", e))?;

    if !wire.confidence.is_finite() {
        return Err("confidence is not a finite number".to_string());
    }

    let expected: HashSet<&str> = devices.iter().map(|d| d.device_id.as_str()).collect();
    let proposed: HashSet<&str> = wire.assignments.keys().map(String::as_str).collect();
    if expected != proposed {
        return Err(format!(
            "assignment keys cover {} of {} devices",
            proposed.intersection(&expected).count(),
            expected.len()
        ));
    }

    let catalogue: HashSet<u16> = vlans.iter().map(|v| v.id).collect();
    for (device_id, vlan_id) in &wire.assignments {
        if !catalogue.contains(vlan_id) {
            return Err(format!(
                "{} assigned to VLAN {} which is not in the catalogue",
                device_id, vlan_id
            ));
        }
    }
    Ok(wire)
}

/// Extract the first balanced JSON object from free-form model output,
/// tolerating fenced or prose-wrapped responses
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Received-signal bucket used as a prompt feature
fn signal_bucket(dbm: i32) -> &'static str {
    if dbm >= -55 {
        "strong"
    } else if dbm >= -70 {
        "medium"
    } else {
        "weak"
    }
}

/// Render the inference prompt from sanitized data only.
///
/// The devices carry pseudonymous IDs and redacted hostnames; nothing
/// else ever reaches the prompt.
fn render_prompt(devices: &[SanitizedDevice], vlans: &[VlanEntry]) -> String {
    let pre_pass = heuristic_assignments(devices, vlans);

    let device_features: Vec<serde_json::Value> = devices
        .iter()
        .map(|d| {
            let candidates: Vec<u16> = vlans
                .iter()
                .filter(|v| v.label.eq_ignore_ascii_case(&d.ssid))
                .map(|v| v.id)
                .collect();
            json!({
                "device_id": d.device_id,
                "ssid": d.ssid,
                "signal": signal_bucket(d.signal),
                "hostname": d.hostname,
                "candidate_vlans": candidates,
            })
        })
        .collect();

    let vlan_features: Vec<serde_json::Value> = vlans
        .iter()
        .map(|v| {
            let assigned = pre_pass.values().filter(|id| **id == v.id).count();
            json!({
                "id": v.id,
                "label": v.label,
                "capacity": v.capacity,
                "rule_based_assigned": assigned,
            })
        })
        .collect();

    format!(
        "You are a network planning assistant for a school campus network.\n\
         Group the observed client devices into the available VLANs.\n\n\
         Observed devices (pseudonymous IDs, hardware identifiers removed):\n{}\n\n\
         Available VLANs:\n{}\n\n\
         Consider:\n\
         1. A device belongs on the VLAN whose label matches its SSID.\n\
         2. Balance device counts against VLAN capacity hints.\n\
         3. Weak-signal devices may be roaming; keep them with their SSID match.\n\
         4. Hostnames are redacted; treat them as coarse purpose hints only.\n\n\
         Respond with ONLY a JSON object in exactly this format:\n\
         {{\"assignments\": {{\"<device-id>\": <vlan-id>}}, \"confidence\": 0.0, \"rationale\": \"<one sentence>\"}}\n\
         Every device ID must appear exactly once in \"assignments\".",
        serde_json::to_string_pretty(&device_features).unwrap_or_default(),
        serde_json::to_string_pretty(&vlan_features).unwrap_or_default(),
    )
}
