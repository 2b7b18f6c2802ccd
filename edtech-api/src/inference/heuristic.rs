//! Deterministic label-match backend
//!
//! Assigns each device to the VLAN whose label equals its SSID, balancing
//! load on ties. Also serves as the mandatory fallback: the grouping
//! engine reuses [`heuristic_assignments`] whenever the configured backend
//! fails, so a suggestion is always produced.

use super::{BackendProbe, InferenceBackend, InferenceError, InferenceInput};
use crate::models::{AssignmentMap, SanitizedDevice, VlanEntry};
use serde_json::json;
use std::collections::BTreeMap;

/// Fixed confidence for rule-based proposals, kept below the default
/// review threshold so heuristic suggestions queue for human review
pub const HEURISTIC_CONFIDENCE: f64 = 0.6;

pub struct HeuristicBackend;

#[async_trait::async_trait]
impl InferenceBackend for HeuristicBackend {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn infer(&self, input: &InferenceInput) -> Result<String, InferenceError> {
        let assignments = heuristic_assignments(&input.devices, &input.vlans);
        Ok(json!({
            "assignments": assignments,
            "confidence": HEURISTIC_CONFIDENCE,
            "rationale": describe(&input.devices, &input.vlans),
        })
        .to_string())
    }

    async fn probe(&self) -> BackendProbe {
        BackendProbe {
            reachable: true,
            version: Some("builtin".to_string()),
        }
    }
}

/// Assign every device to its best-matching VLAN.
///
/// Match quality is exact SSID/label equality, case-insensitive. Among
/// equally matching VLANs the one with fewer devices assigned so far in
/// this batch wins; remaining ties go to the lowest VLAN id, giving a
/// total, reproducible order. Devices whose SSID matches no label run the
/// same tie-break over the whole catalogue, so coverage is always total
/// (for a non-empty catalogue).
pub fn heuristic_assignments(devices: &[SanitizedDevice], vlans: &[VlanEntry]) -> AssignmentMap {
    let mut load: BTreeMap<u16, u32> = vlans.iter().map(|v| (v.id, 0)).collect();
    let mut assignments = AssignmentMap::new();

    for device in devices {
        let matched: Vec<&VlanEntry> = vlans
            .iter()
            .filter(|v| v.label.eq_ignore_ascii_case(&device.ssid))
            .collect();
        let candidates: Vec<&VlanEntry> = if matched.is_empty() {
            vlans.iter().collect()
        } else {
            matched
        };

        let chosen = candidates
            .into_iter()
            .min_by_key(|v| (load.get(&v.id).copied().unwrap_or(0), v.id));
        if let Some(vlan) = chosen {
            *load.entry(vlan.id).or_insert(0) += 1;
            assignments.insert(device.device_id.clone(), vlan.id);
        }
    }
    assignments
}

fn describe(devices: &[SanitizedDevice], vlans: &[VlanEntry]) -> String {
    let unmatched = devices
        .iter()
        .filter(|d| !vlans.iter().any(|v| v.label.eq_ignore_ascii_case(&d.ssid)))
        .count();
    let mut text = format!(
        "Rule-based SSID/label match for {} device(s) across {} VLAN(s).",
        devices.len(),
        vlans.len()
    );
    if unmatched > 0 {
        text.push_str(&format!(
            " {} device(s) matched no label and were balanced across the catalogue.",
            unmatched
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn device(id: &str, ssid: &str) -> SanitizedDevice {
        SanitizedDevice {
            device_id: id.to_string(),
            ssid: ssid.to_string(),
            signal: -50,
            hostname: None,
            observed_at: Utc::now(),
        }
    }

    fn vlan(id: u16, label: &str) -> VlanEntry {
        VlanEntry {
            id,
            label: label.to_string(),
            capacity: None,
        }
    }

    #[test]
    fn test_label_match_scenario() {
        let devices = vec![
            device("d1", "lab-101"),
            device("d2", "lab-101"),
            device("d3", "guest-wifi"),
        ];
        let vlans = vec![vlan(101, "lab-101"), vlan(900, "guest-wifi")];

        let assignments = heuristic_assignments(&devices, &vlans);
        assert_eq!(assignments.get("d1"), Some(&101));
        assert_eq!(assignments.get("d2"), Some(&101));
        assert_eq!(assignments.get("d3"), Some(&900));
        assert_eq!(assignments.len(), 3);
    }

    #[test]
    fn test_identical_labels_balance_by_load_then_id() {
        // Two VLANs carry the same label; devices should spread across
        // them, lowest id first
        let devices = vec![
            device("d1", "lab"),
            device("d2", "lab"),
            device("d3", "lab"),
        ];
        let vlans = vec![vlan(20, "lab"), vlan(10, "lab")];

        let assignments = heuristic_assignments(&devices, &vlans);
        assert_eq!(assignments.get("d1"), Some(&10));
        assert_eq!(assignments.get("d2"), Some(&20));
        assert_eq!(assignments.get("d3"), Some(&10));
    }

    #[test]
    fn test_unmatched_ssid_still_covered() {
        let devices = vec![device("d1", "never-heard-of-it")];
        let vlans = vec![vlan(101, "lab-101"), vlan(900, "guest-wifi")];

        let assignments = heuristic_assignments(&devices, &vlans);
        // Least-loaded tie, then lowest id
        assert_eq!(assignments.get("d1"), Some(&101));
    }

    #[test]
    fn test_match_case_insensitive() {
        let devices = vec![device("d1", "Lab-101")];
        let vlans = vec![vlan(900, "guest-wifi"), vlan(101, "lab-101")];

        let assignments = heuristic_assignments(&devices, &vlans);
        assert_eq!(assignments.get("d1"), Some(&101));
    }

    #[test]
    fn test_coverage_is_total() {
        let devices: Vec<SanitizedDevice> = (0..25)
            .map(|i| device(&format!("d{}", i), if i % 2 == 0 { "lab-101" } else { "mystery" }))
            .collect();
        let vlans = vec![vlan(101, "lab-101"), vlan(900, "guest-wifi")];

        let assignments = heuristic_assignments(&devices, &vlans);
        assert_eq!(assignments.len(), devices.len());
        for d in &devices {
            assert!(assignments.contains_key(&d.device_id));
        }
    }

    #[test]
    fn test_empty_inputs() {
        assert!(heuristic_assignments(&[], &[vlan(1, "x")]).is_empty());
        assert!(heuristic_assignments(&[device("d1", "x")], &[]).is_empty());
    }

    #[tokio::test]
    async fn test_backend_emits_parseable_proposal() {
        let backend = HeuristicBackend;
        let input = InferenceInput {
            prompt: String::new(),
            devices: vec![device("d1", "lab-101")],
            vlans: vec![vlan(101, "lab-101")],
        };
        let text = backend.infer(&input).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["assignments"]["d1"], 101);
        assert_eq!(parsed["confidence"], HEURISTIC_CONFIDENCE);
        assert!(parsed["rationale"].is_string());
    }
}
