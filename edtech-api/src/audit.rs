//! Append-only JSONL audit trail
//!
//! Every recorded suggestion and decision lands as one JSON line in the
//! audit file. Writes are best-effort: the ledger is the source of
//! truth, so audit failures are logged and swallowed rather than failing
//! the request. Lines carry pseudonymous device counts only, never MACs
//! or hostnames.

use crate::models::{Decision, Suggestion};
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

pub struct AuditLog {
    path: PathBuf,
    // Serializes appends so concurrent events never interleave mid-line
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an audit line for a recorded suggestion
    pub async fn log_suggestion(&self, suggestion: &Suggestion) {
        self.append(json!({
            "at": Utc::now().to_rfc3339(),
            "event": "suggestion",
            "suggestion_id": suggestion.suggestion_id,
            "origin": suggestion.origin.as_str(),
            "backend": suggestion.backend,
            "device_count": suggestion.devices.len(),
            "confidence": suggestion.confidence,
            "human_review_required": suggestion.human_review_required,
            "degraded": suggestion.degraded,
        }))
        .await;
    }

    /// Append an audit line for a recorded decision
    pub async fn log_decision(&self, suggestion_id: Uuid, decision: &Decision) {
        self.append(json!({
            "at": Utc::now().to_rfc3339(),
            "event": "decision",
            "suggestion_id": suggestion_id,
            "outcome": decision.outcome.as_str(),
            "reviewer": decision.reviewer,
        }))
        .await;
    }

    async fn append(&self, line: serde_json::Value) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.try_append(&line).await {
            warn!(path = %self.path.display(), "Audit append failed: {}", e);
        }
    }

    async fn try_append(&self, line: &serde_json::Value) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        let mut buf = line.to_string().into_bytes();
        buf.push(b'\n');
        file.write_all(&buf).await?;
        // tokio::fs::File buffers internally; without this the OS write
        // lands on a background thread after the lock is released
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecisionOutcome, SuggestionOrigin};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_suggestion() -> Suggestion {
        Suggestion {
            suggestion_id: Uuid::new_v4(),
            origin: SuggestionOrigin::Api,
            backend: "heuristic".to_string(),
            devices: vec![],
            assignments: BTreeMap::new(),
            confidence: 0.6,
            rationale: "Rule-based SSID/label match applied.".to_string(),
            human_review_required: true,
            degraded: false,
            created_at: Utc::now(),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_suggestion_and_decision_lines_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("audit.log"));

        let suggestion = sample_suggestion();
        audit.log_suggestion(&suggestion).await;
        audit
            .log_decision(
                suggestion.suggestion_id,
                &Decision {
                    outcome: DecisionOutcome::Approved,
                    override_assignments: None,
                    reviewer: "taylor".to_string(),
                    notes: None,
                    decided_at: Utc::now(),
                },
            )
            .await;

        let contents = std::fs::read_to_string(audit.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "suggestion");
        assert_eq!(first["origin"], "api");
        assert_eq!(first["device_count"], 0);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "decision");
        assert_eq!(second["outcome"], "approved");
        assert_eq!(second["reviewer"], "taylor");
    }

    #[tokio::test]
    async fn test_missing_parent_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("nested/deeper/audit.log"));
        audit.log_suggestion(&sample_suggestion()).await;
        assert!(audit.path().exists());
    }

    #[tokio::test]
    async fn test_unwritable_path_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        // Parent path is a regular file, so every append must fail quietly
        let audit = AuditLog::new(blocker.join("audit.log"));
        audit.log_suggestion(&sample_suggestion()).await;
    }
}
