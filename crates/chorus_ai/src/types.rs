use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A single chat message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ChatMessage {
    /// Create a simple text message.
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// The specialty slot a backend model fills in the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// Low-latency generalist; the guaranteed-available fallback.
    Fast,
    /// High-quality reasoning model, slower and rate-limit-prone.
    Quality,
    /// Creative/brainstorming specialist.
    Creative,
    /// Image-capable model.
    Vision,
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fast => "fast",
            Self::Quality => "quality",
            Self::Creative => "creative",
            Self::Vision => "vision",
        };
        f.write_str(s)
    }
}

/// Immutable description of one backend model. Built once at startup by the
/// [`ModelRegistry`](crate::registry::ModelRegistry); never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Opaque backend identifier (OpenRouter `org/model` format).
    pub id: String,
    pub display_name: String,
    pub role: ModelRole,
    /// Tags this model is considered strong at (e.g. "technical", "creative").
    pub specialties: HashSet<String>,
    /// Prior reliability estimate in [0, 1]; seeds the availability tracker.
    pub declared_reliability: f64,
    pub declared_avg_latency_ms: u64,
    /// Minimum spacing between invocations (rate-limit-prone backends).
    pub cooldown: Duration,
    /// Per-invocation time budget for this model.
    pub call_budget: Duration,
}

// ---------------------------------------------------------------------------
// Turn input
// ---------------------------------------------------------------------------

/// Reference to an attachment supplied by the caller. The core only needs to
/// know attachments exist; their content stays with the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub mime_type: String,
}

/// Per-turn options supplied by the caller.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub fusion_enabled: bool,
    pub force_quality: bool,
    /// Overrides the configured total timeout for this turn.
    pub timeout: Option<Duration>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            fusion_enabled: true,
            force_quality: false,
            timeout: None,
        }
    }
}

/// One user turn as handed to [`ChorusService::process_turn`](crate::service::ChorusService::process_turn).
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub message: String,
    pub attachments: Vec<AttachmentRef>,
    pub context: Vec<ChatMessage>,
    pub options: TurnOptions,
}

// ---------------------------------------------------------------------------
// Invocation results
// ---------------------------------------------------------------------------

/// Terminal status of one model invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Timeout,
}

/// Result of one invoker call. Failures are values, never errors — the
/// coordinator treats every outcome uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub model_id: String,
    pub text: String,
    /// Heuristic quality estimate in [0, 1].
    pub confidence: f64,
    pub processing_time_ms: u64,
    pub status: ResponseStatus,
    pub error_detail: Option<String>,
}

impl ModelResponse {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Build a failure response with the given status and elapsed time.
    pub fn failure(
        model_id: impl Into<String>,
        status: ResponseStatus,
        detail: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            text: String::new(),
            confidence: 0.0,
            processing_time_ms: elapsed_ms,
            status,
            error_detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fusion
// ---------------------------------------------------------------------------

/// How a turn will be (or was) executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FusionStrategy {
    SingleFast,
    SingleQuality,
    FusionParallel,
    FusionSequential,
    FusionConsensus,
}

impl FusionStrategy {
    pub fn is_fusion(self) -> bool {
        matches!(
            self,
            Self::FusionParallel | Self::FusionSequential | Self::FusionConsensus
        )
    }
}

impl std::fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SingleFast => "single-fast",
            Self::SingleQuality => "single-quality",
            Self::FusionParallel => "fusion-parallel",
            Self::FusionSequential => "fusion-sequential",
            Self::FusionConsensus => "fusion-consensus",
        };
        f.write_str(s)
    }
}

/// Final output of one user turn, returned to the caller. The caller decides
/// persistence; the core holds nothing after the turn completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResult {
    pub text: String,
    pub contributing_models: Vec<String>,
    pub overall_confidence: f64,
    pub strategy_used: String,
    pub total_processing_ms: u64,
}

// ---------------------------------------------------------------------------
// Provider wire types
// ---------------------------------------------------------------------------

/// A request to the inference collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_max_tokens() -> u32 {
    4096
}

/// Token usage statistics returned by the inference endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Complete response from the inference collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}
