//! Fallback controller.
//!
//! Wraps the fusion coordinator in a hard timeout race and guarantees the
//! caller always receives a [`FusionResult`]: coordinator failure or timeout
//! degrades to a single call against the guaranteed-available primary model,
//! and if that also fails, to a static apology message. Worst-case latency is
//! bounded by `total_timeout + secondary_timeout`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::fusion::FusionCoordinator;
use crate::invoker::ModelInvoker;
use crate::registry::ModelRegistry;
use crate::routing::RoutingDecision;
use crate::types::{ChatMessage, FusionResult};

/// Strategy label carried by static-apology results.
pub const FALLBACK_STATIC_STRATEGY: &str = "fallback-static";

/// Default budget for the degraded single-model call.
pub const DEFAULT_SECONDARY_TIMEOUT: Duration = Duration::from_secs(5);

const APOLOGY_POOL: &[&str] = &[
    "I'm having trouble reaching my language models right now. Please try again in a moment.",
    "Sorry, I couldn't generate a response this time. Give it another try shortly.",
    "Something went wrong while processing your request. Please retry in a few seconds.",
    "My backends are not responding at the moment. Please try again soon.",
];

fn pick_apology() -> &'static str {
    let idx = rand::rng().random_range(0..APOLOGY_POOL.len());
    APOLOGY_POOL[idx]
}

// ---------------------------------------------------------------------------
// FallbackController
// ---------------------------------------------------------------------------

/// Final safety net around a fusion round. Never returns an error.
pub struct FallbackController {
    coordinator: Arc<FusionCoordinator>,
    invoker: Arc<ModelInvoker>,
    registry: Arc<ModelRegistry>,
    secondary_timeout: Duration,
}

impl FallbackController {
    pub fn new(
        coordinator: Arc<FusionCoordinator>,
        invoker: Arc<ModelInvoker>,
        registry: Arc<ModelRegistry>,
        secondary_timeout: Duration,
    ) -> Self {
        Self {
            coordinator,
            invoker,
            registry,
            secondary_timeout,
        }
    }

    /// Run one routing decision with full degradation: coordinator, then the
    /// primary model alone, then a static apology. Always returns a result.
    pub async fn run_with_fallback(
        &self,
        decision: &RoutingDecision,
        prompt: &str,
        context: &[ChatMessage],
        total_timeout: Duration,
    ) -> FusionResult {
        let started = Instant::now();

        let outcome =
            tokio::time::timeout(total_timeout, self.coordinator.run(decision, prompt, context))
                .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(error = %err, "Fusion round failed, degrading to primary model");
                self.run_secondary(prompt, context, started).await
            }
            Err(_) => {
                // Abandoned coordinator tasks self-terminate on their own
                // per-call budgets.
                warn!(
                    total_timeout_ms = total_timeout.as_millis() as u64,
                    "Fusion round exceeded total timeout, degrading to primary model"
                );
                self.run_secondary(prompt, context, started).await
            }
        }
    }

    async fn run_secondary(
        &self,
        prompt: &str,
        context: &[ChatMessage],
        started: Instant,
    ) -> FusionResult {
        let primary = self.registry.primary();
        let response = self
            .invoker
            .invoke(primary, prompt, context, self.secondary_timeout)
            .await;

        if response.is_success() {
            info!(model = %primary.id, "Secondary fallback succeeded");
            return FusionResult {
                text: response.text,
                contributing_models: vec![response.model_id],
                overall_confidence: response.confidence,
                strategy_used: "single-fast".into(),
                total_processing_ms: started.elapsed().as_millis() as u64,
            };
        }

        warn!(model = %primary.id, "Secondary fallback failed, returning static apology");
        FusionResult {
            text: pick_apology().to_owned(),
            contributing_models: Vec::new(),
            overall_confidence: 0.0,
            strategy_used: FALLBACK_STATIC_STRATEGY.into(),
            total_processing_ms: started.elapsed().as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::AvailabilityTracker;
    use crate::fusion::FusionConfig;
    use crate::providers::{InferenceProvider, ProviderError};
    use crate::types::{
        ChatRequest, ChatResponse, FusionStrategy, ModelDescriptor, ModelRole, TokenUsage,
    };
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};

    #[derive(Clone)]
    struct Behavior {
        reply: String,
        delay: Duration,
        fail: bool,
    }

    struct ScriptedProvider {
        behaviors: HashMap<String, Behavior>,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                behaviors: HashMap::new(),
            }
        }

        fn replies(mut self, model: &str, reply: &str, delay: Duration) -> Self {
            self.behaviors.insert(
                model.into(),
                Behavior {
                    reply: reply.into(),
                    delay,
                    fail: false,
                },
            );
            self
        }

        fn fails(mut self, model: &str) -> Self {
            self.behaviors.insert(
                model.into(),
                Behavior {
                    reply: String::new(),
                    delay: Duration::ZERO,
                    fail: true,
                },
            );
            self
        }
    }

    #[async_trait]
    impl InferenceProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "Scripted"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let behavior = self
                .behaviors
                .get(&request.model)
                .cloned()
                .unwrap_or(Behavior {
                    reply: "default".into(),
                    delay: Duration::ZERO,
                    fail: false,
                });
            if !behavior.delay.is_zero() {
                tokio::time::sleep(behavior.delay).await;
            }
            if behavior.fail {
                return Err(ProviderError::Other("scripted failure".into()));
            }
            Ok(ChatResponse {
                content: behavior.reply,
                model: request.model.clone(),
                usage: TokenUsage::default(),
            })
        }
    }

    fn descriptor(id: &str, role: ModelRole) -> ModelDescriptor {
        ModelDescriptor {
            id: id.into(),
            display_name: id.into(),
            role,
            specialties: HashSet::new(),
            declared_reliability: 0.9,
            declared_avg_latency_ms: 1_000,
            cooldown: Duration::ZERO,
            call_budget: Duration::from_secs(60),
        }
    }

    fn controller(provider: ScriptedProvider, fusion: FusionConfig) -> FallbackController {
        let registry = Arc::new(
            crate::registry::ModelRegistry::new(vec![
                descriptor("fast", ModelRole::Fast),
                descriptor("quality", ModelRole::Quality),
            ])
            .unwrap(),
        );
        let tracker = Arc::new(AvailabilityTracker::from_registry(&registry));
        let invoker = Arc::new(ModelInvoker::new(
            Arc::new(provider),
            Arc::clone(&tracker),
            Duration::from_secs(60),
            256,
        ));
        let coordinator = Arc::new(FusionCoordinator::new(
            Arc::clone(&invoker),
            tracker,
            Arc::clone(&registry),
            fusion,
        ));
        FallbackController::new(coordinator, invoker, registry, DEFAULT_SECONDARY_TIMEOUT)
    }

    fn quality_decision() -> RoutingDecision {
        RoutingDecision {
            strategy: FusionStrategy::SingleQuality,
            selected: vec![descriptor("quality", ModelRole::Quality)],
            reason: "test".into(),
            canned_reply: None,
        }
    }

    #[tokio::test]
    async fn successful_round_passes_through() {
        let provider = ScriptedProvider::new().replies("quality", "deep answer", Duration::ZERO);
        let ctl = controller(provider, FusionConfig::standard());

        let result = ctl
            .run_with_fallback(&quality_decision(), "explain", &[], Duration::from_secs(30))
            .await;
        assert_eq!(result.text, "deep answer");
        assert_eq!(result.strategy_used, "single-quality");
    }

    #[tokio::test]
    async fn coordinator_failure_degrades_to_primary() {
        let provider = ScriptedProvider::new()
            .fails("quality")
            .replies("fast", "quick answer", Duration::ZERO);
        let ctl = controller(provider, FusionConfig::standard());

        let result = ctl
            .run_with_fallback(&quality_decision(), "explain", &[], Duration::from_secs(30))
            .await;
        assert_eq!(result.text, "quick answer");
        assert_eq!(result.contributing_models, vec!["fast".to_string()]);
        assert_eq!(result.strategy_used, "single-fast");
    }

    #[tokio::test(start_paused = true)]
    async fn total_timeout_abandons_coordinator() {
        let provider = ScriptedProvider::new()
            .replies("quality", "too late", Duration::from_secs(300))
            .replies("fast", "rescue", Duration::from_millis(10));
        let ctl = controller(provider, FusionConfig::standard());

        let result = ctl
            .run_with_fallback(&quality_decision(), "explain", &[], Duration::from_millis(500))
            .await;
        assert_eq!(result.text, "rescue");
        assert_eq!(result.strategy_used, "single-fast");
    }

    #[tokio::test]
    async fn all_failures_yield_static_apology() {
        let provider = ScriptedProvider::new().fails("quality").fails("fast");
        let ctl = controller(provider, FusionConfig::standard());

        let result = ctl
            .run_with_fallback(&quality_decision(), "explain", &[], Duration::from_secs(30))
            .await;
        assert_eq!(result.strategy_used, FALLBACK_STATIC_STRATEGY);
        assert_eq!(result.overall_confidence, 0.0);
        assert!(APOLOGY_POOL.contains(&result.text.as_str()));
        assert!(result.contributing_models.is_empty());
    }

    #[test]
    fn apology_pool_is_nonempty_and_picked_from() {
        for _ in 0..20 {
            assert!(APOLOGY_POOL.contains(&pick_apology()));
        }
    }
}
