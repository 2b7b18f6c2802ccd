//! Ollama HTTP backend
//!
//! Talks to a local Ollama instance: `POST /api/generate` for proposals,
//! `GET /api/version` for liveness. Each call carries a strict per-attempt
//! timeout; retry policy lives in [`super::infer_with_retry`].

use super::{BackendProbe, InferenceBackend, InferenceError, InferenceInput};
use edtech_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Liveness probe timeout, independent of the inference timeout
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Cannot build Ollama HTTP client: {}", e)))?;
        Ok(OllamaBackend {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn infer(&self, input: &InferenceInput) -> std::result::Result<String, InferenceError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt: &input.prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout))?;

        let status = response.status();
        if status.is_success() {
            let body: GenerateResponse = response.json().await.map_err(|e| {
                InferenceError::Unusable(format!("Invalid generate response: {}", e))
            })?;
            Ok(body.response)
        } else if status.is_server_error() {
            Err(InferenceError::Unreachable(format!(
                "Ollama returned {}",
                status
            )))
        } else {
            // 4xx: wrong model name, bad request; retrying cannot help
            Err(InferenceError::Rejected(format!(
                "Ollama returned {}",
                status
            )))
        }
    }

    async fn probe(&self) -> BackendProbe {
        let url = format!("{}/api/version", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                let version = response
                    .json::<VersionResponse>()
                    .await
                    .ok()
                    .map(|v| v.version);
                BackendProbe {
                    reachable: true,
                    version,
                }
            }
            _ => BackendProbe {
                reachable: false,
                version: None,
            },
        }
    }
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout(timeout)
    } else {
        InferenceError::Unreachable(err.to_string())
    }
}
