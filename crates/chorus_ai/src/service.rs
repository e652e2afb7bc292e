//! Top-level orchestration service.
//!
//! Owns the whole pipeline — classifier, router, invoker, coordinator,
//! fallback — with every collaborator injected at construction. One instance
//! per process, shared behind an `Arc`; [`ChorusService::process_turn`] is the
//! single public entry point for a user turn and never returns an error.

use std::sync::Arc;
use std::time::Duration;

use chorus_core::ChorusConfig;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::availability::AvailabilityTracker;
use crate::classifier::ComplexityClassifier;
use crate::fallback::FallbackController;
use crate::fusion::{FusionConfig, FusionCoordinator, StageEvent};
use crate::invoker::ModelInvoker;
use crate::providers::openrouter::OpenRouterProvider;
use crate::providers::InferenceProvider;
use crate::registry::ModelRegistry;
use crate::routing::{RouteHints, Router};
use crate::types::{FusionResult, TurnInput};

/// How often the maintenance task sweeps expired cache entries.
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

fn fusion_config_from(config: &ChorusConfig) -> FusionConfig {
    let mut fusion = FusionConfig::standard();
    fusion.fusion_enabled = config.fusion_enabled;
    fusion.max_concurrent_models = config.max_concurrent_models;
    fusion.quality_threshold = config.quality_threshold;
    fusion.global_deadline = Duration::from_millis(config.global_deadline_ms);
    fusion
}

// ---------------------------------------------------------------------------
// ChorusService
// ---------------------------------------------------------------------------

/// The orchestration subsystem. Construct once at startup.
pub struct ChorusService {
    config: ChorusConfig,
    registry: Arc<ModelRegistry>,
    tracker: Arc<AvailabilityTracker>,
    classifier: ComplexityClassifier,
    router: Router,
    invoker: Arc<ModelInvoker>,
    coordinator: Arc<FusionCoordinator>,
    fallback: FallbackController,
}

impl ChorusService {
    /// Service wired to the OpenRouter gateway with the default model roster.
    pub fn new(config: ChorusConfig) -> Self {
        let provider: Arc<dyn InferenceProvider> = Arc::new(OpenRouterProvider::with_base_url(
            config.openrouter_api_key.clone().unwrap_or_default(),
            config.inference_base_url.clone(),
        ));
        Self::with_provider(config, provider, Arc::new(ModelRegistry::with_defaults()))
    }

    /// Service with an injected provider and roster. This is the seam tests
    /// and alternative gateways use.
    pub fn with_provider(
        config: ChorusConfig,
        provider: Arc<dyn InferenceProvider>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        let tracker = Arc::new(AvailabilityTracker::from_registry(&registry));
        let invoker = Arc::new(ModelInvoker::new(
            provider,
            Arc::clone(&tracker),
            Duration::from_secs(config.cache_ttl_minutes * 60),
            config.cache_max_entries,
        ));
        let coordinator = Arc::new(FusionCoordinator::new(
            Arc::clone(&invoker),
            Arc::clone(&tracker),
            Arc::clone(&registry),
            fusion_config_from(&config),
        ));
        let fallback = FallbackController::new(
            Arc::clone(&coordinator),
            Arc::clone(&invoker),
            Arc::clone(&registry),
            Duration::from_millis(config.secondary_timeout_ms),
        );
        let router = Router::new(Arc::clone(&registry), Arc::clone(&tracker));

        Self {
            config,
            registry,
            tracker,
            classifier: ComplexityClassifier::new(),
            router,
            invoker,
            coordinator,
            fallback,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &AvailabilityTracker {
        &self.tracker
    }

    /// Subscribe to fusion stage events. Replaces any previous subscriber.
    pub fn subscribe_progress(&self) -> mpsc::UnboundedReceiver<StageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.coordinator.set_progress_sink(tx);
        rx
    }

    /// Spawn the periodic cache sweep. Returns the task handle so the caller
    /// controls its lifetime.
    pub fn start_maintenance(&self) -> tokio::task::JoinHandle<()> {
        let invoker = Arc::clone(&self.invoker);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = invoker.cache().sweep();
                if dropped > 0 {
                    debug!(dropped, "Swept expired cache entries");
                }
            }
        })
    }

    /// Process one user turn end to end. Always produces a [`FusionResult`];
    /// every failure mode degrades inside the fallback controller.
    pub async fn process_turn(&self, input: TurnInput) -> FusionResult {
        let turn_id = uuid::Uuid::new_v4();
        let profile = self.classifier.classify(&input.message);
        let hints = RouteHints {
            has_attachments: !input.attachments.is_empty(),
            fusion_enabled: self.config.fusion_enabled && input.options.fusion_enabled,
            force_quality: input.options.force_quality,
        };
        let decision = self.router.route(&profile, &hints);

        let total_timeout = input
            .options
            .timeout
            .unwrap_or(Duration::from_millis(self.config.total_timeout_ms));

        let result = self
            .fallback
            .run_with_fallback(&decision, &input.message, &input.context, total_timeout)
            .await;

        info!(
            turn_id = %turn_id,
            strategy = %result.strategy_used,
            models = ?result.contributing_models,
            confidence = result.overall_confidence,
            elapsed_ms = result.total_processing_ms,
            "Turn completed"
        );
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FALLBACK_STATIC_STRATEGY;
    use crate::fusion::FusionStage;
    use crate::providers::ProviderError;
    use crate::types::{
        AttachmentRef, ChatRequest, ChatResponse, ModelRole, TokenUsage, TurnOptions,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Provider that answers every model with a canned reply and records the
    /// models it was asked for.
    struct EchoProvider {
        reply: String,
        fail_all: bool,
        asked: Mutex<Vec<String>>,
    }

    impl EchoProvider {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.into(),
                fail_all: false,
                asked: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail_all: true,
                ..Self::replying("")
            }
        }

        fn asked_models(&self) -> Vec<String> {
            self.asked.lock().clone()
        }
    }

    #[async_trait]
    impl crate::providers::InferenceProvider for EchoProvider {
        fn name(&self) -> &str {
            "Echo"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.asked.lock().push(request.model.clone());
            if self.fail_all {
                return Err(ProviderError::Other("down".into()));
            }
            Ok(ChatResponse {
                content: self.reply.clone(),
                model: request.model.clone(),
                usage: TokenUsage::default(),
            })
        }
    }

    fn service(provider: Arc<EchoProvider>) -> ChorusService {
        ChorusService::with_provider(
            ChorusConfig::default(),
            provider,
            Arc::new(ModelRegistry::with_defaults()),
        )
    }

    fn turn(message: &str) -> TurnInput {
        TurnInput {
            message: message.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn simple_question_uses_one_fast_call() {
        let provider = Arc::new(EchoProvider::replying("Four."));
        let svc = service(Arc::clone(&provider));

        let result = svc.process_turn(turn("What is 2+2?")).await;
        assert_eq!(result.text, "Four.");
        assert_eq!(result.strategy_used, "single-fast");
        assert_eq!(provider.asked_models().len(), 1);
        assert_eq!(provider.asked_models()[0], svc.registry().primary().id);
    }

    #[tokio::test]
    async fn complex_question_fans_out() {
        let provider = Arc::new(EchoProvider::replying("A thorough comparison."));
        let svc = service(Arc::clone(&provider));

        let result = svc
            .process_turn(turn(
                "Compare the architecture trade-offs of these two algorithms",
            ))
            .await;
        assert_eq!(result.strategy_used, "fusion-parallel");
        // Two fan-out calls plus one synthesis call.
        assert_eq!(provider.asked_models().len(), 3);
        assert_eq!(result.contributing_models.len(), 2);
    }

    #[tokio::test]
    async fn fusion_disabled_per_turn() {
        let provider = Arc::new(EchoProvider::replying("One deep answer."));
        let svc = service(Arc::clone(&provider));

        let input = TurnInput {
            message: "Compare the architecture trade-offs of these two algorithms".into(),
            options: TurnOptions {
                fusion_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = svc.process_turn(input).await;
        assert_eq!(result.strategy_used, "single-quality");
        assert_eq!(provider.asked_models().len(), 1);
    }

    #[tokio::test]
    async fn attachments_route_to_vision() {
        let provider = Arc::new(EchoProvider::replying("It is a cat."));
        let svc = service(Arc::clone(&provider));

        let input = TurnInput {
            message: "What is in this picture?".into(),
            attachments: vec![AttachmentRef {
                id: "a1".into(),
                mime_type: "image/png".into(),
            }],
            ..Default::default()
        };
        let result = svc.process_turn(input).await;
        assert_eq!(result.text, "It is a cat.");
        let asked = provider.asked_models();
        assert_eq!(asked.len(), 1);
        let vision = svc.registry().get(&asked[0]).unwrap();
        assert_eq!(vision.role, ModelRole::Vision);
    }

    #[tokio::test]
    async fn total_failure_returns_apology_not_error() {
        let provider = Arc::new(EchoProvider::failing());
        let svc = service(provider);

        let result = svc.process_turn(turn("hello")).await;
        assert_eq!(result.strategy_used, FALLBACK_STATIC_STRATEGY);
        assert_eq!(result.overall_confidence, 0.0);
        assert!(!result.text.is_empty());
    }

    #[tokio::test]
    async fn progress_events_observable() {
        let provider = Arc::new(EchoProvider::replying("Four."));
        let svc = service(provider);
        let mut rx = svc.subscribe_progress();

        svc.process_turn(turn("What is 2+2?")).await;

        let mut saw_completed = false;
        while let Ok(event) = rx.try_recv() {
            if event.stage == FusionStage::Completed {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn repeated_turn_hits_cache() {
        let provider = Arc::new(EchoProvider::replying("Four."));
        let svc = service(Arc::clone(&provider));

        svc.process_turn(turn("What is 2+2?")).await;
        svc.process_turn(turn("What is 2+2?")).await;
        assert_eq!(provider.asked_models().len(), 1);
    }
}
