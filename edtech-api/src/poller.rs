//! Background device-source poller
//!
//! Periodically snapshots the wireless controller's station list,
//! sanitizes it, and runs newly seen devices through the grouping engine.
//! Resulting suggestions land in the ledger exactly like API-originated
//! ones, marked with origin `poller`.
//!
//! The loop never exits on error: fetch failures are counted and surfaced
//! through the health flags once they repeat.

use crate::audit::AuditLog;
use crate::ledger::suggestions;
use crate::models::{SanitizedDevice, SuggestionOrigin, VlanEntry};
use crate::services::{GroupingEngine, Sanitizer, UniFiClient};
use crate::HealthFlags;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Consecutive fetch failures before /health reports the source degraded
const DEGRADE_AFTER_FAILURES: u32 = 3;

pub struct DevicePoller {
    client: UniFiClient,
    sanitizer: Arc<Sanitizer>,
    engine: Arc<GroupingEngine>,
    db: SqlitePool,
    audit: Arc<AuditLog>,
    interval: Duration,
    /// Static catalogue; per-request overrides do not apply to the poller
    catalogue: Vec<VlanEntry>,
    /// Pseudonymous IDs present in the previous snapshot
    seen: HashSet<String>,
    status: SourceStatus,
}

impl DevicePoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: UniFiClient,
        sanitizer: Arc<Sanitizer>,
        engine: Arc<GroupingEngine>,
        db: SqlitePool,
        audit: Arc<AuditLog>,
        health: Arc<HealthFlags>,
        interval: Duration,
        catalogue: Vec<VlanEntry>,
    ) -> Self {
        Self {
            client,
            sanitizer,
            engine,
            db,
            audit,
            interval,
            catalogue,
            seen: HashSet::new(),
            status: SourceStatus::new(health),
        }
    }

    /// Poll until the process shuts down
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.interval.as_secs(),
            "Device poller started"
        );
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        let raw = match self.client.fetch_devices().await {
            Ok(raw) => raw,
            Err(e) => {
                let crossed = self.status.record_failure();
                warn!(
                    failures = self.status.failures(),
                    "Controller fetch failed: {}", e
                );
                if crossed {
                    warn!("Device source degraded after repeated fetch failures");
                }
                return;
            }
        };
        self.status.record_success();

        // Controller rows can carry junk; skip bad ones instead of dropping
        // the whole snapshot like the API batch path does
        let mut sanitized = Vec::with_capacity(raw.len());
        let mut skipped = 0usize;
        for device in &raw {
            match self.sanitizer.sanitize(device) {
                Ok(clean) => sanitized.push(clean),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(skipped, "Skipped controller rows failing sanitization");
        }

        let new_devices = newly_seen(&sanitized, &self.seen);
        self.seen = sanitized.iter().map(|d| d.device_id.clone()).collect();

        if new_devices.is_empty() {
            debug!(devices = sanitized.len(), "No newly seen devices");
            return;
        }
        info!(
            new = new_devices.len(),
            total = sanitized.len(),
            "Newly seen devices; requesting grouping"
        );

        let suggestion = match self
            .engine
            .suggest(
                new_devices,
                self.catalogue.clone(),
                SuggestionOrigin::Poller,
                None,
            )
            .await
        {
            Ok(suggestion) => suggestion,
            Err(e) => {
                warn!("Poller grouping failed: {}", e);
                return;
            }
        };

        match suggestions::record(&self.db, &suggestion).await {
            Ok(stored) => self.audit.log_suggestion(&stored).await,
            Err(e) => warn!("Poller ledger write failed: {}", e),
        }
    }
}

/// Consecutive fetch-failure accounting behind the /health device-source
/// flag. Two failures in a row pass quietly; the third raises the degraded
/// flag, and any success clears both the counter and the flag.
struct SourceStatus {
    failures: u32,
    flags: Arc<HealthFlags>,
}

impl SourceStatus {
    fn new(flags: Arc<HealthFlags>) -> Self {
        Self { failures: 0, flags }
    }

    fn failures(&self) -> u32 {
        self.failures
    }

    /// Count one failed fetch; true when this is the failure that crossed
    /// the threshold
    fn record_failure(&mut self) -> bool {
        self.failures += 1;
        let crossed = self.failures == DEGRADE_AFTER_FAILURES;
        if crossed {
            self.flags
                .device_source_degraded
                .store(true, Ordering::Relaxed);
        }
        crossed
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.flags
            .device_source_degraded
            .store(false, Ordering::Relaxed);
    }
}

/// Devices present in the current snapshot but not the previous one
fn newly_seen(current: &[SanitizedDevice], seen: &HashSet<String>) -> Vec<SanitizedDevice> {
    current
        .iter()
        .filter(|d| !seen.contains(&d.device_id))
        .cloned()
        .collect()
}
