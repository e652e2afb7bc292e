//! Inference provider trait and the OpenRouter implementation.

pub mod openrouter;

use async_trait::async_trait;

use crate::types::{ChatRequest, ChatResponse};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors the inference collaborator may return. The invoker converts every
/// variant into a failed [`ModelResponse`](crate::types::ModelResponse);
/// nothing propagates past that boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited")]
    RateLimit,

    #[error("Invalid API key")]
    InvalidKey,

    #[error("Model not available: {0}")]
    ModelUnavailable(String),

    #[error("Timeout")]
    Timeout,

    #[error("Provider error: {0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Unified interface to the inference endpoint. Tests inject mock
/// implementations with controllable latency and failure modes.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Human-readable display name.
    fn name(&self) -> &str;

    /// One non-streaming completion. The fixed external contract:
    /// `POST {model, messages, temperature, max_tokens}` → text + usage.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}
