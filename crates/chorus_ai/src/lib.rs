pub mod availability;
pub mod classifier;
pub mod fallback;
pub mod fusion;
pub mod invoker;
pub mod providers;
pub mod registry;
pub mod routing;
pub mod service;
pub mod types;

// Re-export core types at crate root for convenience.
pub use availability::{AvailabilitySnapshot, AvailabilityTracker};
pub use classifier::{Category, ComplexityClassifier, ComplexityProfile};
pub use fallback::{FallbackController, FALLBACK_STATIC_STRATEGY};
pub use fusion::{FusionConfig, FusionCoordinator, FusionError, FusionStage, StageEvent};
pub use invoker::{ConfidenceWeights, ModelInvoker, ResponseCache};
pub use providers::openrouter::OpenRouterProvider;
pub use providers::{InferenceProvider, ProviderError};
pub use registry::ModelRegistry;
pub use routing::{DefaultPolicy, RouteHints, Router, RoutingDecision, StrategyPolicy};
pub use service::ChorusService;
pub use types::*;
