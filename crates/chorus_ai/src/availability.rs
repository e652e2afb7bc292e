//! Availability tracker.
//!
//! Per-model rolling health: last-invocation timestamp, cooldown gating, and
//! exponential-moving-average latency and success rate. Mutated from every
//! invocation completion, concurrently; the whole map sits behind one
//! `parking_lot::RwLock` so per-model updates are atomic and nothing blocks
//! across a network await.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::registry::ModelRegistry;
use crate::types::{ModelDescriptor, ModelRole};

/// EMA decay factors: `new = old_weight * old + sample_weight * sample`.
const LATENCY_OLD_WEIGHT: f64 = 0.8;
const LATENCY_SAMPLE_WEIGHT: f64 = 0.2;
const SUCCESS_OLD_WEIGHT: f64 = 0.9;
const SUCCESS_SAMPLE_WEIGHT: f64 = 0.1;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Rolling state for one model. Never reset except at process start.
#[derive(Debug, Clone)]
struct AvailabilityState {
    last_invoked_at: Option<Instant>,
    cooldown: Duration,
    ema_latency_ms: f64,
    ema_success_rate: f64,
    /// Minimum success rate required for `is_available` to pass.
    success_threshold: f64,
}

/// Read-only view of one model's rolling state, used by the router's scoring.
#[derive(Debug, Clone, Copy)]
pub struct AvailabilitySnapshot {
    pub ema_latency_ms: f64,
    pub ema_success_rate: f64,
}

/// Success-rate bar per model role. Quality models are costlier to invoke
/// speculatively, so they use a higher threshold; the fast primary uses zero
/// so it is always eligible.
fn threshold_for_role(role: ModelRole) -> f64 {
    match role {
        ModelRole::Fast => 0.0,
        ModelRole::Quality => 0.3,
        ModelRole::Creative | ModelRole::Vision => 0.2,
    }
}

// ---------------------------------------------------------------------------
// AvailabilityTracker
// ---------------------------------------------------------------------------

/// Tracks per-model invocation health. One instance per orchestration
/// subsystem, shared behind an `Arc`.
pub struct AvailabilityTracker {
    states: RwLock<HashMap<String, AvailabilityState>>,
}

impl AvailabilityTracker {
    /// Build a tracker seeded from the registry: EMA latency starts at the
    /// declared average, success rate at the declared reliability prior.
    pub fn from_registry(registry: &ModelRegistry) -> Self {
        let tracker = Self {
            states: RwLock::new(HashMap::new()),
        };
        for model in registry.iter() {
            tracker.register(model);
        }
        tracker
    }

    /// Register (or re-seed) one model.
    pub fn register(&self, model: &ModelDescriptor) {
        let state = AvailabilityState {
            last_invoked_at: None,
            cooldown: model.cooldown,
            ema_latency_ms: model.declared_avg_latency_ms as f64,
            ema_success_rate: model.declared_reliability.clamp(0.0, 1.0),
            success_threshold: threshold_for_role(model.role),
        };
        self.states.write().insert(model.id.clone(), state);
    }

    /// Whether a model may be invoked now: its cooldown has elapsed AND its
    /// success-rate EMA is above the role threshold. Unknown models are never
    /// available.
    pub fn is_available(&self, model_id: &str) -> bool {
        let states = self.states.read();
        let Some(state) = states.get(model_id) else {
            return false;
        };

        if let Some(last) = state.last_invoked_at
            && last.elapsed() < state.cooldown
        {
            return false;
        }

        state.ema_success_rate > state.success_threshold
    }

    /// Record the outcome of one invocation attempt (success or failure,
    /// including cancellation at the elapsed time). Updates both EMAs and
    /// unconditionally stamps `last_invoked_at`.
    pub fn record_outcome(&self, model_id: &str, latency_ms: u64, success: bool) {
        let mut states = self.states.write();
        let Some(state) = states.get_mut(model_id) else {
            debug!(model = model_id, "Outcome for unregistered model ignored");
            return;
        };

        state.ema_latency_ms =
            LATENCY_OLD_WEIGHT * state.ema_latency_ms + LATENCY_SAMPLE_WEIGHT * latency_ms as f64;
        let sample = if success { 1.0 } else { 0.0 };
        state.ema_success_rate = (SUCCESS_OLD_WEIGHT * state.ema_success_rate
            + SUCCESS_SAMPLE_WEIGHT * sample)
            .clamp(0.0, 1.0);
        state.last_invoked_at = Some(Instant::now());

        debug!(
            model = model_id,
            latency_ms,
            success,
            ema_latency = state.ema_latency_ms,
            ema_success = state.ema_success_rate,
            "Invocation outcome recorded"
        );
    }

    /// Current EMA values for a model, for routing-score computation.
    pub fn snapshot(&self, model_id: &str) -> Option<AvailabilitySnapshot> {
        self.states.read().get(model_id).map(|s| AvailabilitySnapshot {
            ema_latency_ms: s.ema_latency_ms,
            ema_success_rate: s.ema_success_rate,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn descriptor(id: &str, role: ModelRole, cooldown: Duration) -> ModelDescriptor {
        ModelDescriptor {
            id: id.into(),
            display_name: id.into(),
            role,
            specialties: HashSet::new(),
            declared_reliability: 0.9,
            declared_avg_latency_ms: 1_000,
            cooldown,
            call_budget: Duration::from_secs(10),
        }
    }

    fn tracker_with(models: &[ModelDescriptor]) -> AvailabilityTracker {
        let tracker = AvailabilityTracker {
            states: RwLock::new(HashMap::new()),
        };
        for m in models {
            tracker.register(m);
        }
        tracker
    }

    #[test]
    fn unknown_model_never_available() {
        let tracker = tracker_with(&[]);
        assert!(!tracker.is_available("ghost/model"));
    }

    #[test]
    fn seeded_from_declared_values() {
        let tracker = tracker_with(&[descriptor("m", ModelRole::Quality, Duration::ZERO)]);
        let snap = tracker.snapshot("m").unwrap();
        assert_eq!(snap.ema_latency_ms, 1_000.0);
        assert_eq!(snap.ema_success_rate, 0.9);
    }

    #[test]
    fn cooldown_gates_until_elapsed() {
        let tracker = tracker_with(&[descriptor(
            "m",
            ModelRole::Quality,
            Duration::from_millis(50),
        )]);
        assert!(tracker.is_available("m"));

        tracker.record_outcome("m", 100, true);
        assert!(!tracker.is_available("m"));

        std::thread::sleep(Duration::from_millis(60));
        assert!(tracker.is_available("m"));
    }

    #[test]
    fn zero_cooldown_model_stays_available() {
        let tracker = tracker_with(&[descriptor("fast", ModelRole::Fast, Duration::ZERO)]);
        tracker.record_outcome("fast", 100, true);
        assert!(tracker.is_available("fast"));
    }

    #[test]
    fn ema_latency_update() {
        let tracker = tracker_with(&[descriptor("m", ModelRole::Quality, Duration::ZERO)]);
        tracker.record_outcome("m", 2_000, true);
        let snap = tracker.snapshot("m").unwrap();
        // 0.8 * 1000 + 0.2 * 2000
        assert!((snap.ema_latency_ms - 1_200.0).abs() < 1e-9);
    }

    #[test]
    fn ema_success_rate_update_and_bounds() {
        let tracker = tracker_with(&[descriptor("m", ModelRole::Quality, Duration::ZERO)]);
        tracker.record_outcome("m", 100, false);
        let snap = tracker.snapshot("m").unwrap();
        // 0.9 * 0.9 + 0.1 * 0.0
        assert!((snap.ema_success_rate - 0.81).abs() < 1e-9);

        for _ in 0..100 {
            tracker.record_outcome("m", 100, false);
        }
        let snap = tracker.snapshot("m").unwrap();
        assert!(snap.ema_success_rate >= 0.0 && snap.ema_success_rate <= 1.0);
    }

    #[test]
    fn repeated_failures_make_quality_model_unavailable() {
        let tracker = tracker_with(&[descriptor("q", ModelRole::Quality, Duration::ZERO)]);
        for _ in 0..12 {
            tracker.record_outcome("q", 100, false);
        }
        // 0.9 * 0.9^12 ≈ 0.25 < 0.3 threshold
        assert!(!tracker.is_available("q"));
    }

    #[test]
    fn fast_model_available_even_after_failures() {
        let tracker = tracker_with(&[descriptor("fast", ModelRole::Fast, Duration::ZERO)]);
        for _ in 0..50 {
            tracker.record_outcome("fast", 100, false);
        }
        assert!(tracker.is_available("fast"));
    }

    #[test]
    fn concurrent_writers_no_lost_updates() {
        let tracker = Arc::new(tracker_with(&[descriptor(
            "m",
            ModelRole::Quality,
            Duration::ZERO,
        )]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.record_outcome("m", 500, true);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = tracker.snapshot("m").unwrap();
        assert!(snap.ema_success_rate > 0.89 && snap.ema_success_rate <= 1.0);
        assert!(snap.ema_latency_ms > 0.0);
    }
}
