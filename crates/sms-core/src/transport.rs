use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportFailure;
use crate::provider::{HttpRequest, Provider, TransportType};

/// A provider request with every placeholder resolved.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum RenderedRequest {
    Http(HttpRequest),
}

/// Normalized result of one provider attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { raw: Value },
    Failure { reason: TransportFailure },
}

impl Outcome {
    pub fn success(raw: Value) -> Self {
        Outcome::Success { raw }
    }

    pub fn failure(reason: TransportFailure) -> Self {
        Outcome::Failure { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Executes one outbound call to one provider.
///
/// Implementations never fail for expected conditions (bad status, network
/// error, timeout); those are [`Outcome::Failure`].
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// The provider transport type this client serves.
    fn transport_type(&self) -> TransportType;

    async fn call(&self, provider: &Provider, request: &RenderedRequest) -> Outcome;
}

/// Best-effort conversion of a provider response body into JSON.
///
/// Non-JSON bodies are wrapped as `{"raw": "<text>"}`.
pub fn raw_response(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::json!({ "raw": text }))
}
