//! Configuration loading for the edtech services
//!
//! Every option resolves in priority order:
//! 1. Command-line argument (where the binary defines one)
//! 2. Environment variable (`EDTECH_*`)
//! 3. TOML config file
//! 4. Compiled default
//!
//! The binary handles step 1 via clap; [`ServiceConfig::load`] covers the
//! rest. Secrets (API key, pseudonymization key, controller password) are
//! redacted from the `Debug` output so the resolved config can be logged.

use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Period component of a rate-limit specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePeriod {
    Second,
    Minute,
    Hour,
}

impl RatePeriod {
    /// Window length in seconds
    pub fn as_secs(&self) -> u64 {
        match self {
            RatePeriod::Second => 1,
            RatePeriod::Minute => 60,
            RatePeriod::Hour => 3600,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RatePeriod::Second => "second",
            RatePeriod::Minute => "minute",
            RatePeriod::Hour => "hour",
        }
    }
}

/// Rate limit expressed as requests per period, e.g. `10/minute`
///
/// Accepts both `N/period` and `N per period` spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSpec {
    pub max_requests: u32,
    pub period: RatePeriod,
}

impl FromStr for RateLimitSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let (count_part, period_part) = normalized
            .split_once('/')
            .or_else(|| normalized.split_once(" per "))
            .ok_or_else(|| {
                Error::Config(format!(
                    "Invalid rate limit '{}': expected 'N/second|minute|hour'",
                    s
                ))
            })?;

        let max_requests: u32 = count_part
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Invalid rate limit count in '{}'", s)))?;
        if max_requests == 0 {
            return Err(Error::Config(format!(
                "Rate limit count must be at least 1 in '{}'",
                s
            )));
        }

        let period = match period_part.trim() {
            "second" | "sec" | "s" => RatePeriod::Second,
            "minute" | "min" | "m" => RatePeriod::Minute,
            "hour" | "h" => RatePeriod::Hour,
            other => {
                return Err(Error::Config(format!(
                    "Invalid rate limit period '{}': expected second, minute, or hour",
                    other
                )))
            }
        };

        Ok(RateLimitSpec {
            max_requests,
            period,
        })
    }
}

impl fmt::Display for RateLimitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.period.as_str())
    }
}

/// Which inference backend the grouping engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Deterministic label-match heuristic, no network calls
    Heuristic,
    /// Local Ollama instance over HTTP
    Ollama,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Heuristic => "heuristic",
            BackendKind::Ollama => "ollama",
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Ok(BackendKind::Heuristic),
            "ollama" => Ok(BackendKind::Ollama),
            other => Err(Error::Config(format!(
                "Unknown inference backend '{}': expected 'heuristic' or 'ollama'",
                other
            ))),
        }
    }
}

/// One VLAN in the static catalogue (`[[vlans]]` in the config file)
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VlanConfigEntry {
    /// 802.1Q VLAN identifier, 1..=4094
    pub id: u16,
    /// Human label, matched against SSIDs by the heuristic
    pub label: String,
    /// Soft capacity hint passed to the inference prompt
    #[serde(default)]
    pub capacity: Option<u32>,
}

/// Inference backend settings
#[derive(Clone)]
pub struct InferenceConfig {
    pub backend: BackendKind,
    pub ollama_url: String,
    pub ollama_model: String,
    /// Per-attempt timeout for backend calls, seconds
    pub timeout_secs: u64,
}

/// Device-source poller settings
#[derive(Clone)]
pub struct PollerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub unifi_url: Option<String>,
    pub unifi_username: Option<String>,
    pub unifi_password: Option<String>,
    pub unifi_site: String,
}

/// Fully resolved service configuration
#[derive(Clone)]
pub struct ServiceConfig {
    /// Pre-shared API key; empty string disables authentication
    pub api_key: String,
    pub inference: InferenceConfig,
    /// Suggestions below this confidence require human review
    pub review_threshold: f64,
    pub rate_limit: RateLimitSpec,
    /// Pseudonymization key; `None` falls back to a persisted generated key
    pub hash_key: Option<String>,
    pub poller: PollerConfig,
    /// Ledger retention window, days
    pub retention_days: u32,
    pub audit_log_path: PathBuf,
    /// Extra hostname words redacted by the sanitizer, beyond its built-in
    /// heuristics
    pub hostname_denylist: Vec<String>,
    /// Static VLAN catalogue used when a request supplies none
    pub vlans: Vec<VlanConfigEntry>,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("api_key", &redact(&self.api_key))
            .field("backend", &self.inference.backend)
            .field("ollama_url", &self.inference.ollama_url)
            .field("ollama_model", &self.inference.ollama_model)
            .field("inference_timeout_secs", &self.inference.timeout_secs)
            .field("review_threshold", &self.review_threshold)
            .field("rate_limit", &self.rate_limit.to_string())
            .field("hash_key", &self.hash_key.as_deref().map(redact))
            .field("poller_enabled", &self.poller.enabled)
            .field("poller_interval_secs", &self.poller.interval_secs)
            .field("unifi_url", &self.poller.unifi_url)
            .field("unifi_site", &self.poller.unifi_site)
            .field("retention_days", &self.retention_days)
            .field("audit_log_path", &self.audit_log_path)
            .field("vlans", &self.vlans.len())
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(unset)"
    } else {
        "(set)"
    }
}

// ============================================================================
// TOML file shape
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    api_key: Option<String>,
    review_threshold: Option<f64>,
    rate_limit: Option<String>,
    hash_key: Option<String>,
    retention_days: Option<u32>,
    audit_log: Option<String>,
    #[serde(default)]
    hostname_denylist: Vec<String>,
    #[serde(default)]
    inference: FileInference,
    #[serde(default)]
    poller: FilePoller,
    #[serde(default)]
    vlans: Vec<VlanConfigEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct FileInference {
    backend: Option<String>,
    ollama_url: Option<String>,
    ollama_model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FilePoller {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    unifi_url: Option<String>,
    unifi_username: Option<String>,
    unifi_password: Option<String>,
    unifi_site: Option<String>,
}

// ============================================================================
// Resolution
// ============================================================================

impl ServiceConfig {
    /// Load configuration from the given TOML file (or the default
    /// location), then apply environment overrides and validate.
    ///
    /// An explicitly supplied path must exist; the default path is optional.
    pub fn load(explicit_path: Option<&Path>) -> Result<ServiceConfig> {
        let file = match explicit_path {
            Some(path) => read_file_config(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_file_config(&path)?,
                _ => FileConfig::default(),
            },
        };
        Self::resolve(file)
    }

    fn resolve(file: FileConfig) -> Result<ServiceConfig> {
        let api_key = env_string("EDTECH_API_KEY")
            .or(file.api_key)
            .unwrap_or_default();

        let backend = match env_string("EDTECH_INFERENCE_BACKEND").or(file.inference.backend) {
            Some(s) => s.parse()?,
            None => BackendKind::Heuristic,
        };

        let inference = InferenceConfig {
            backend,
            ollama_url: env_string("EDTECH_OLLAMA_URL")
                .or(file.inference.ollama_url)
                .unwrap_or_else(|| "http://ollama:11434".to_string()),
            ollama_model: env_string("EDTECH_OLLAMA_MODEL")
                .or(file.inference.ollama_model)
                .unwrap_or_else(|| "llama3:8b".to_string()),
            timeout_secs: env_parse("EDTECH_INFERENCE_TIMEOUT_SECS")
                .or(file.inference.timeout_secs)
                .unwrap_or(5),
        };

        let review_threshold = env_parse("EDTECH_REVIEW_THRESHOLD")
            .or(file.review_threshold)
            .unwrap_or(0.7);
        if !(0.0..=1.0).contains(&review_threshold) {
            return Err(Error::Config(format!(
                "review_threshold must be within 0.0..=1.0, got {}",
                review_threshold
            )));
        }

        let rate_limit = match env_string("EDTECH_RATE_LIMIT").or(file.rate_limit) {
            Some(s) => s.parse()?,
            None => RateLimitSpec {
                max_requests: 10,
                period: RatePeriod::Minute,
            },
        };

        let hash_key = env_string("EDTECH_HASH_KEY").or(file.hash_key);

        let poller = PollerConfig {
            enabled: env_bool("EDTECH_POLLER_ENABLED")
                .or(file.poller.enabled)
                .unwrap_or(false),
            interval_secs: env_parse("EDTECH_POLL_INTERVAL_SECS")
                .or(file.poller.interval_secs)
                .unwrap_or(30),
            unifi_url: env_string("EDTECH_UNIFI_URL").or(file.poller.unifi_url),
            unifi_username: env_string("EDTECH_UNIFI_USERNAME").or(file.poller.unifi_username),
            unifi_password: env_string("EDTECH_UNIFI_PASSWORD").or(file.poller.unifi_password),
            unifi_site: env_string("EDTECH_UNIFI_SITE")
                .or(file.poller.unifi_site)
                .unwrap_or_else(|| "default".to_string()),
        };
        if poller.interval_secs == 0 {
            return Err(Error::Config(
                "poller interval_secs must be at least 1".to_string(),
            ));
        }
        if poller.enabled && poller.unifi_url.is_none() {
            return Err(Error::Config(
                "poller enabled but no unifi_url configured".to_string(),
            ));
        }

        let retention_days = env_parse("EDTECH_RETENTION_DAYS")
            .or(file.retention_days)
            .unwrap_or(90);
        if retention_days == 0 {
            return Err(Error::Config(
                "retention_days must be at least 1".to_string(),
            ));
        }

        let audit_log_path = env_string("EDTECH_AUDIT_LOG")
            .or(file.audit_log)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/logs/ai-decisions.log"));

        validate_catalogue(&file.vlans)?;

        Ok(ServiceConfig {
            api_key,
            inference,
            review_threshold,
            rate_limit,
            hash_key,
            poller,
            retention_days,
            audit_log_path,
            hostname_denylist: file.hostname_denylist,
            vlans: file.vlans,
        })
    }
}

/// Reject static catalogues the heuristic could not use deterministically
fn validate_catalogue(vlans: &[VlanConfigEntry]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for vlan in vlans {
        if vlan.id == 0 || vlan.id > 4094 {
            return Err(Error::Config(format!(
                "VLAN id {} outside 1..=4094",
                vlan.id
            )));
        }
        if vlan.label.trim().is_empty() {
            return Err(Error::Config(format!("VLAN {} has an empty label", vlan.id)));
        }
        if !seen.insert(vlan.id) {
            return Err(Error::Config(format!("Duplicate VLAN id {}", vlan.id)));
        }
    }
    Ok(())
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read config file {:?}: {}", path, e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Cannot parse config file {:?}: {}", path, e)))
}

/// Default configuration file path for the platform
///
/// User config directory first (`~/.config/edtech/edtech-api.toml` on
/// Linux), then the system-wide `/etc/edtech/edtech-api.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = dirs::config_dir().map(|d| d.join("edtech").join("edtech-api.toml")) {
        if path.exists() {
            return Some(path);
        }
    }
    if cfg!(target_os = "linux") {
        let system = PathBuf::from("/etc/edtech/edtech-api.toml");
        if system.exists() {
            return Some(system);
        }
    }
    None
}

// ============================================================================
// Environment helpers
// ============================================================================

fn env_string(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = env_string(name)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("Ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}
