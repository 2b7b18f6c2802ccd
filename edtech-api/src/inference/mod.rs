//! Pluggable inference backends for the grouping engine
//!
//! A backend turns one [`InferenceInput`] into proposal text; the engine
//! parses and validates that text the same way no matter which backend
//! produced it. The input carries both the rendered prompt (what an LLM
//! consumes) and the structured device/VLAN view (what the deterministic
//! backend consumes), so both sides of the seam share one contract.

pub mod heuristic;
pub mod ollama;

pub use heuristic::HeuristicBackend;
pub use ollama::OllamaBackend;

use crate::models::{SanitizedDevice, VlanEntry};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Retry budget for transport failures (attempts = retries + 1)
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// First backoff wait; doubles per retry
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(250);

/// Errors surfaced by inference backends
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Transport failure or 5xx; worth retrying
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// Per-attempt timeout elapsed
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Backend rejected the request (4xx); retrying cannot help
    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    /// Backend answered but the output could not be used
    #[error("Backend returned unusable output: {0}")]
    Unusable(String),
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InferenceError::Unreachable(_) | InferenceError::Timeout(_)
        )
    }
}

/// Everything a backend may look at for one proposal
#[derive(Debug, Clone)]
pub struct InferenceInput {
    /// Rendered natural-language prompt
    pub prompt: String,
    /// Structured view of the same request
    pub devices: Vec<SanitizedDevice>,
    pub vlans: Vec<VlanEntry>,
}

/// Reachability report used by /health and /api/version
#[derive(Debug, Clone)]
pub struct BackendProbe {
    pub reachable: bool,
    pub version: Option<String>,
}

/// A grouping proposal source
#[async_trait::async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short name recorded on suggestions for provenance
    fn name(&self) -> &'static str;

    /// Produce proposal text for the given input
    async fn infer(&self, input: &InferenceInput) -> Result<String, InferenceError>;

    /// Cheap reachability check; reports instead of failing
    async fn probe(&self) -> BackendProbe;
}

/// Call a backend with bounded retries and exponential backoff.
///
/// Transport failures retry up to `max_retries` times, waiting
/// `base_backoff` doubled per retry. Rejections and unusable output return
/// immediately; retrying cannot change them.
pub async fn infer_with_retry(
    backend: &dyn InferenceBackend,
    input: &InferenceInput,
    max_retries: u32,
    base_backoff: Duration,
) -> Result<String, InferenceError> {
    let mut backoff = base_backoff;
    let mut attempt = 0u32;
    loop {
        match backend.infer(input).await {
            Ok(text) => return Ok(text),
            Err(err) if err.is_retryable() && attempt < max_retries => {
                attempt += 1;
                warn!(
                    backend = backend.name(),
                    attempt,
                    max_retries,
                    "Inference attempt failed ({}), retrying in {:?}",
                    err,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}
