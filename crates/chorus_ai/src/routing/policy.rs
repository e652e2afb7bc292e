//! Strategy selection policies.
//!
//! The router delegates model selection to a [`StrategyPolicy`]; contextual
//! or ensemble behaviors are alternative implementations of this trait.

use std::cmp::Ordering;

use crate::availability::AvailabilityTracker;
use crate::classifier::ComplexityProfile;
use crate::registry::ModelRegistry;
use crate::types::{FusionStrategy, ModelDescriptor, ModelRole};

use super::{RouteHints, RoutingDecision};

/// Canned reply for requests with attachments when no vision model can be
/// invoked. The coordinator returns it without any network call.
const VISION_UNAVAILABLE_REPLY: &str =
    "I can't analyze images right now. Please describe the image and I'll do my best to help.";

/// Composite-score weights: latency term, success term, relevance term.
const W_LATENCY: f64 = 0.4;
const W_SUCCESS: f64 = 0.4;
const W_RELEVANCE: f64 = 0.2;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Picks a strategy and an ordered model subset for one request.
pub trait StrategyPolicy: Send + Sync {
    fn select(
        &self,
        profile: &ComplexityProfile,
        hints: &RouteHints,
        registry: &ModelRegistry,
        tracker: &AvailabilityTracker,
    ) -> RoutingDecision;
}

// ---------------------------------------------------------------------------
// DefaultPolicy
// ---------------------------------------------------------------------------

/// The standard selection algorithm:
/// 1. attachments → vision model, or a canned-reply decision when none is
///    available;
/// 2. high-quality requests → parallel fusion over [fastest, best quality]
///    when fusion is enabled, single quality call otherwise;
/// 3. everything else → the primary fast model, unconditionally.
pub struct DefaultPolicy;

impl StrategyPolicy for DefaultPolicy {
    fn select(
        &self,
        profile: &ComplexityProfile,
        hints: &RouteHints,
        registry: &ModelRegistry,
        tracker: &AvailabilityTracker,
    ) -> RoutingDecision {
        if hints.has_attachments {
            return self.route_vision(registry, tracker);
        }

        let needs_quality = profile.requires_high_quality || hints.force_quality;
        if needs_quality
            && let Some(best_quality) = self.best_available(
                registry.by_role(ModelRole::Quality),
                profile,
                tracker,
            )
        {
            if hints.fusion_enabled {
                return self.route_fusion(profile, registry, tracker, best_quality);
            }
            return RoutingDecision {
                strategy: FusionStrategy::SingleQuality,
                reason: format!(
                    "High-quality request (score {}), fusion disabled: {}",
                    profile.score, best_quality.id
                ),
                selected: vec![best_quality.clone()],
                canned_reply: None,
            };
        }

        // Guaranteed fallback: the primary has no cooldown and a zero
        // success threshold, so this path always succeeds.
        let primary = registry.primary();
        RoutingDecision {
            strategy: FusionStrategy::SingleFast,
            reason: format!("Standard request (score {}): {}", profile.score, primary.id),
            selected: vec![primary.clone()],
            canned_reply: None,
        }
    }
}

impl DefaultPolicy {
    fn route_vision(
        &self,
        registry: &ModelRegistry,
        tracker: &AvailabilityTracker,
    ) -> RoutingDecision {
        let vision = registry
            .by_role(ModelRole::Vision)
            .into_iter()
            .find(|m| tracker.is_available(&m.id));

        match vision {
            Some(model) => RoutingDecision {
                strategy: FusionStrategy::SingleQuality,
                reason: format!("Attachments present: vision model {}", model.id),
                selected: vec![model.clone()],
                canned_reply: None,
            },
            None => RoutingDecision {
                strategy: FusionStrategy::SingleFast,
                reason: "Attachments present but no vision model available".into(),
                selected: Vec::new(),
                canned_reply: Some(VISION_UNAVAILABLE_REPLY.into()),
            },
        }
    }

    fn route_fusion(
        &self,
        profile: &ComplexityProfile,
        registry: &ModelRegistry,
        tracker: &AvailabilityTracker,
        best_quality: &ModelDescriptor,
    ) -> RoutingDecision {
        // Fastest available companion: lowest EMA latency among available
        // models other than the chosen quality model; the primary qualifies
        // by construction.
        let fastest = registry
            .iter()
            .filter(|m| m.id != best_quality.id && tracker.is_available(&m.id))
            .min_by(|a, b| {
                let la = ema_latency(tracker, a);
                let lb = ema_latency(tracker, b);
                la.partial_cmp(&lb)
                    .unwrap_or(Ordering::Equal)
                    .then(a.declared_avg_latency_ms.cmp(&b.declared_avg_latency_ms))
            })
            .unwrap_or(registry.primary());

        let mut pair = vec![fastest.clone(), best_quality.clone()];
        pair.sort_by(|a, b| {
            let sa = composite_score(tracker, a, profile);
            let sb = composite_score(tracker, b, profile);
            sb.partial_cmp(&sa)
                .unwrap_or(Ordering::Equal)
                .then(a.declared_avg_latency_ms.cmp(&b.declared_avg_latency_ms))
        });
        pair.dedup_by(|a, b| a.id == b.id);

        RoutingDecision {
            strategy: FusionStrategy::FusionParallel,
            reason: format!(
                "High-quality request (score {}): fusing {} models",
                profile.score,
                pair.len()
            ),
            selected: pair,
            canned_reply: None,
        }
    }

    /// Best available model from `candidates` by composite score, tie-broken
    /// on declared latency. Returns `None` when nothing is available.
    fn best_available<'a>(
        &self,
        candidates: Vec<&'a ModelDescriptor>,
        profile: &ComplexityProfile,
        tracker: &AvailabilityTracker,
    ) -> Option<&'a ModelDescriptor> {
        candidates
            .into_iter()
            .filter(|m| tracker.is_available(&m.id))
            .max_by(|a, b| {
                let sa = composite_score(tracker, a, profile);
                let sb = composite_score(tracker, b, profile);
                sa.partial_cmp(&sb)
                    .unwrap_or(Ordering::Equal)
                    // On equal score, prefer the lower declared latency.
                    .then(b.declared_avg_latency_ms.cmp(&a.declared_avg_latency_ms))
            })
    }
}

// ---------------------------------------------------------------------------
// Scoring helpers
// ---------------------------------------------------------------------------

fn ema_latency(tracker: &AvailabilityTracker, model: &ModelDescriptor) -> f64 {
    tracker
        .snapshot(&model.id)
        .map(|s| s.ema_latency_ms)
        .unwrap_or(model.declared_avg_latency_ms as f64)
}

/// `0.4 * (1 / ema_latency_ms) + 0.4 * ema_success + 0.2 * role_relevance`.
fn composite_score(
    tracker: &AvailabilityTracker,
    model: &ModelDescriptor,
    profile: &ComplexityProfile,
) -> f64 {
    let (latency_ms, success) = tracker
        .snapshot(&model.id)
        .map(|s| (s.ema_latency_ms, s.ema_success_rate))
        .unwrap_or((model.declared_avg_latency_ms as f64, model.declared_reliability));

    W_LATENCY * (1.0 / latency_ms.max(1.0))
        + W_SUCCESS * success
        + W_RELEVANCE * role_relevance(model, profile)
}

/// Fraction of the profile's matched categories covered by the model's
/// specialty tags, in [0, 1].
fn role_relevance(model: &ModelDescriptor, profile: &ComplexityProfile) -> f64 {
    if profile.matched_categories.is_empty() {
        return 0.0;
    }
    let covered = profile
        .matched_categories
        .iter()
        .filter(|c| model.specialties.contains(c.as_tag()))
        .count();
    covered as f64 / profile.matched_categories.len() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
