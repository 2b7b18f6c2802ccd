//! API-key authentication and per-caller rate limiting
//!
//! Protected routes require an `X-API-Key` header matching the configured
//! key. Keys are compared as SHA-256 digests in constant time, so the
//! response latency does not reveal how much of a guess matched. An empty
//! configured key disables authentication; rate limiting then falls back
//! to one shared anonymous bucket.
//!
//! Implemented as a tower `Layer` so the whole protected router is gated
//! before any extractor runs.

use crate::api::rate_limit::ApiRateLimiter;
use crate::error::ApiError;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use edtech_common::auth::{key_digest, verify_key};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared admission check: key verification plus the rate limiter
pub struct RequestGate {
    api_key: String,
    limiter: ApiRateLimiter,
}

impl RequestGate {
    pub fn new(api_key: String, limiter: ApiRateLimiter) -> Self {
        Self { api_key, limiter }
    }

    /// Decide whether a request may proceed.
    ///
    /// Returns the rejection to send when it may not. The rate limiter is
    /// consulted only after the key checks out, so unauthenticated probes
    /// cannot drain a caller's bucket.
    fn admit(&self, request: &Request) -> Result<(), ApiError> {
        let caller = if self.api_key.is_empty() {
            "anonymous".to_string()
        } else {
            let presented = request
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("");
            if !verify_key(presented, &self.api_key) {
                return Err(ApiError::Auth);
            }
            // Bucket by digest so the raw key never sits in limiter state
            key_digest(presented)
        };

        self.limiter
            .check(&caller)
            .map_err(|retry_after_secs| ApiError::RateLimited { retry_after_secs })
    }
}

/// Tower layer applying [`RequestGate`] to every request it wraps
#[derive(Clone)]
pub struct ApiKeyLayer {
    gate: Arc<RequestGate>,
}

impl ApiKeyLayer {
    pub fn new(gate: Arc<RequestGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for ApiKeyLayer {
    type Service = ApiKeyMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyMiddleware {
            inner,
            gate: self.gate.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ApiKeyMiddleware<S> {
    inner: S,
    gate: Arc<RequestGate>,
}

impl<S> Service<Request> for ApiKeyMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let gate = self.gate.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match gate.admit(&request) {
                Ok(()) => inner.call(request).await,
                Err(rejection) => Ok(rejection.into_response()),
            }
        })
    }
}
