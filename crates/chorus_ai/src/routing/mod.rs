//! Routing.
//!
//! Combines the complexity profile, the model registry, and the availability
//! tracker into a [`RoutingDecision`]. Strategy selection is a pluggable
//! policy object so alternative behaviors are compositions, not subclasses.

mod policy;

pub use policy::{DefaultPolicy, StrategyPolicy};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::availability::AvailabilityTracker;
use crate::classifier::ComplexityProfile;
use crate::registry::ModelRegistry;
use crate::types::{FusionStrategy, ModelDescriptor};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Caller-supplied routing hints that text classification cannot see.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteHints {
    pub has_attachments: bool,
    pub fusion_enabled: bool,
    pub force_quality: bool,
}

/// Immutable result of one routing pass. Consumed by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub strategy: FusionStrategy,
    /// Selected models in priority order.
    pub selected: Vec<ModelDescriptor>,
    /// Human-readable justification.
    pub reason: String,
    /// When set, the coordinator returns this text directly with zero
    /// invocations (vision-unavailable path).
    pub canned_reply: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Produces routing decisions. Holds shared, injected registry and tracker
/// state; the selection algorithm lives in the policy.
pub struct Router {
    registry: Arc<ModelRegistry>,
    tracker: Arc<AvailabilityTracker>,
    policy: Box<dyn StrategyPolicy>,
}

impl Router {
    /// Router with the default selection policy.
    pub fn new(registry: Arc<ModelRegistry>, tracker: Arc<AvailabilityTracker>) -> Self {
        Self::with_policy(registry, tracker, Box::new(DefaultPolicy))
    }

    /// Router with a custom selection policy.
    pub fn with_policy(
        registry: Arc<ModelRegistry>,
        tracker: Arc<AvailabilityTracker>,
        policy: Box<dyn StrategyPolicy>,
    ) -> Self {
        Self {
            registry,
            tracker,
            policy,
        }
    }

    /// Route one request. Never fails: the worst case selects the primary
    /// fast model.
    pub fn route(&self, profile: &ComplexityProfile, hints: &RouteHints) -> RoutingDecision {
        let decision = self
            .policy
            .select(profile, hints, &self.registry, &self.tracker);

        info!(
            strategy = %decision.strategy,
            models = ?decision.selected.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            reason = %decision.reason,
            "Routing decision"
        );
        decision
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ComplexityClassifier;
    use crate::types::ModelRole;

    fn setup() -> (Router, ComplexityClassifier) {
        let registry = Arc::new(ModelRegistry::with_defaults());
        let tracker = Arc::new(AvailabilityTracker::from_registry(&registry));
        (Router::new(registry, tracker), ComplexityClassifier::new())
    }

    fn hints(fusion: bool) -> RouteHints {
        RouteHints {
            has_attachments: false,
            fusion_enabled: fusion,
            force_quality: false,
        }
    }

    #[test]
    fn simple_question_routes_single_fast() {
        let (router, classifier) = setup();
        let profile = classifier.classify("What is 2+2?");
        let decision = router.route(&profile, &hints(true));
        assert_eq!(decision.strategy, FusionStrategy::SingleFast);
        assert_eq!(decision.selected.len(), 1);
        assert_eq!(decision.selected[0].role, ModelRole::Fast);
        assert!(decision.canned_reply.is_none());
    }

    #[test]
    fn complex_request_with_fusion_routes_parallel() {
        let (router, classifier) = setup();
        let profile =
            classifier.classify("Compare the architecture trade-offs of these two algorithms");
        assert!(profile.requires_high_quality);

        let decision = router.route(&profile, &hints(true));
        assert_eq!(decision.strategy, FusionStrategy::FusionParallel);
        assert_eq!(decision.selected.len(), 2);
        // One fast, one quality, both distinct
        assert_ne!(decision.selected[0].id, decision.selected[1].id);
    }

    #[test]
    fn complex_request_without_fusion_routes_single_quality() {
        let (router, classifier) = setup();
        let profile =
            classifier.classify("Compare the architecture trade-offs of these two algorithms");
        let decision = router.route(&profile, &hints(false));
        assert_eq!(decision.strategy, FusionStrategy::SingleQuality);
        assert_eq!(decision.selected.len(), 1);
        assert_eq!(decision.selected[0].role, ModelRole::Quality);
    }

    #[test]
    fn quality_unavailable_degrades_to_single_fast() {
        let registry = Arc::new(ModelRegistry::with_defaults());
        let tracker = Arc::new(AvailabilityTracker::from_registry(&registry));
        // Drive every quality model below its success threshold.
        for model in registry.by_role(ModelRole::Quality) {
            for _ in 0..30 {
                tracker.record_outcome(&model.id, 100, false);
            }
        }
        let router = Router::new(Arc::clone(&registry), tracker);
        let classifier = ComplexityClassifier::new();
        let profile =
            classifier.classify("Compare the architecture trade-offs of these two algorithms");

        let decision = router.route(&profile, &hints(true));
        assert_eq!(decision.strategy, FusionStrategy::SingleFast);
        assert_eq!(decision.selected[0].id, registry.primary().id);
    }

    #[test]
    fn attachments_route_to_vision_model() {
        let (router, classifier) = setup();
        let profile = classifier.classify("What is in this picture?");
        let decision = router.route(
            &profile,
            &RouteHints {
                has_attachments: true,
                fusion_enabled: true,
                force_quality: false,
            },
        );
        assert_eq!(decision.selected[0].role, ModelRole::Vision);
        assert!(decision.canned_reply.is_none());
    }

    #[test]
    fn attachments_without_vision_get_canned_reply() {
        let registry = Arc::new(ModelRegistry::with_defaults());
        let tracker = Arc::new(AvailabilityTracker::from_registry(&registry));
        // Vision models enter cooldown immediately after an invocation.
        for model in registry.by_role(ModelRole::Vision) {
            tracker.record_outcome(&model.id, 100, true);
        }
        let router = Router::new(registry, tracker);
        let classifier = ComplexityClassifier::new();
        let profile = classifier.classify("What is in this picture?");

        let decision = router.route(
            &profile,
            &RouteHints {
                has_attachments: true,
                fusion_enabled: true,
                force_quality: false,
            },
        );
        assert_eq!(decision.strategy, FusionStrategy::SingleFast);
        assert!(decision.canned_reply.is_some());
        assert!(decision.selected.is_empty());
    }

    #[test]
    fn force_quality_upgrades_simple_request() {
        let (router, classifier) = setup();
        let profile = classifier.classify("hi");
        let decision = router.route(
            &profile,
            &RouteHints {
                has_attachments: false,
                fusion_enabled: false,
                force_quality: true,
            },
        );
        assert_eq!(decision.strategy, FusionStrategy::SingleQuality);
    }

    #[test]
    fn routing_is_deterministic() {
        let (router, classifier) = setup();
        let profile =
            classifier.classify("Compare the architecture trade-offs of these two algorithms");
        let a = router.route(&profile, &hints(true));
        let b = router.route(&profile, &hints(true));
        assert_eq!(a.strategy, b.strategy);
        let ids_a: Vec<_> = a.selected.iter().map(|m| &m.id).collect();
        let ids_b: Vec<_> = b.selected.iter().map(|m| &m.id).collect();
        assert_eq!(ids_a, ids_b);
    }
}
