//! Fusion coordinator.
//!
//! Executes one routing decision: single-model calls directly, fusion
//! strategies as a concurrent fan-out under a global deadline with a
//! fixed-interval monitoring loop, early completion once enough
//! high-confidence responses have arrived, and a final synthesis step.
//!
//! Stage transitions per round:
//! `initializing → querying → {early-check loop} → synthesizing → completed`,
//! with `querying → error` when every invocation fails. Total failure is the
//! only error this module surfaces; the fallback controller handles it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::availability::AvailabilityTracker;
use crate::invoker::ModelInvoker;
use crate::registry::ModelRegistry;
use crate::routing::RoutingDecision;
use crate::types::{ChatMessage, FusionResult, ModelResponse, ResponseStatus};

/// Extra confidence granted to a multi-response fusion over its average
/// contributor.
const FUSION_CONFIDENCE_BONUS: f64 = 0.15;

/// Fraction of the deadline that must elapse before early completion with
/// two adequate responses / one strong response.
const EARLY_TWO_RESPONSE_FRACTION: f64 = 0.6;
const EARLY_ONE_RESPONSE_FRACTION: f64 = 0.8;

/// How many top-ranked responses feed the synthesis prompt.
const SYNTHESIS_TOP_N: usize = 3;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// One configuration object for every fusion variant. Historical "turbo" and
/// "standard" modes are presets of this struct, not separate code paths.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub fusion_enabled: bool,
    pub max_concurrent_models: usize,
    /// Average-confidence bar for early completion.
    pub quality_threshold: f64,
    /// Hard ceiling on one fusion round.
    pub global_deadline: Duration,
    /// Monitoring-loop check interval.
    pub poll_interval: Duration,
    /// Minimum remaining budget to attempt the synthesis call; below this the
    /// best response is returned verbatim.
    pub synthesis_reserve: Duration,
}

impl FusionConfig {
    /// Balanced defaults for interactive chat.
    pub fn standard() -> Self {
        Self {
            fusion_enabled: true,
            max_concurrent_models: 3,
            quality_threshold: 0.7,
            global_deadline: Duration::from_secs(25),
            poll_interval: Duration::from_millis(500),
            synthesis_reserve: Duration::from_secs(3),
        }
    }

    /// Latency-first preset: tighter deadline, looser quality bar.
    pub fn turbo() -> Self {
        Self {
            fusion_enabled: true,
            max_concurrent_models: 2,
            quality_threshold: 0.6,
            global_deadline: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            synthesis_reserve: Duration::from_millis(1_500),
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionStage {
    Initializing,
    Querying,
    EarlyCheck,
    Synthesizing,
    Completed,
    Error,
}

impl std::fmt::Display for FusionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Querying => "querying",
            Self::EarlyCheck => "early-check",
            Self::Synthesizing => "synthesizing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One stage transition in a fusion round. Consumers (the UI layer) subscribe
/// to the stream; the core never knows how progress is displayed.
#[derive(Debug, Clone)]
pub struct StageEvent {
    pub stage: FusionStage,
    pub elapsed_ms: u64,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error("All {attempted} model invocations failed")]
    AllModelsFailed { attempted: usize },
}

// ---------------------------------------------------------------------------
// FusionCoordinator
// ---------------------------------------------------------------------------

/// Runs routing decisions to completion. All collaborators are injected;
/// the coordinator itself is stateless across rounds apart from the optional
/// progress sink.
pub struct FusionCoordinator {
    invoker: Arc<ModelInvoker>,
    tracker: Arc<AvailabilityTracker>,
    registry: Arc<ModelRegistry>,
    config: FusionConfig,
    progress: Mutex<Option<mpsc::UnboundedSender<StageEvent>>>,
}

impl FusionCoordinator {
    pub fn new(
        invoker: Arc<ModelInvoker>,
        tracker: Arc<AvailabilityTracker>,
        registry: Arc<ModelRegistry>,
        config: FusionConfig,
    ) -> Self {
        Self {
            invoker,
            tracker,
            registry,
            config,
            progress: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Attach a stage-event sink. Replaces any previous sink; dropped
    /// receivers detach automatically.
    pub fn set_progress_sink(&self, tx: mpsc::UnboundedSender<StageEvent>) {
        *self.progress.lock() = Some(tx);
    }

    fn emit(&self, stage: FusionStage, detail: impl Into<String>, started: Instant) {
        let mut guard = self.progress.lock();
        if let Some(tx) = guard.as_ref() {
            let event = StageEvent {
                stage,
                elapsed_ms: started.elapsed().as_millis() as u64,
                detail: detail.into(),
            };
            if tx.send(event).is_err() {
                *guard = None;
            }
        }
    }

    /// Execute one routing decision. The only error is total failure; every
    /// other outcome is a [`FusionResult`].
    pub async fn run(
        &self,
        decision: &RoutingDecision,
        prompt: &str,
        context: &[ChatMessage],
    ) -> Result<FusionResult, FusionError> {
        let started = Instant::now();
        self.emit(FusionStage::Initializing, decision.reason.clone(), started);

        // Canned-reply decisions (vision unavailable) short-circuit with zero
        // invocations.
        if let Some(reply) = &decision.canned_reply {
            info!(strategy = %decision.strategy, "Returning canned reply, no invocation");
            self.emit(FusionStage::Completed, "canned reply", started);
            return Ok(FusionResult {
                text: reply.clone(),
                contributing_models: Vec::new(),
                overall_confidence: 0.0,
                strategy_used: decision.strategy.to_string(),
                total_processing_ms: started.elapsed().as_millis() as u64,
            });
        }

        if decision.strategy.is_fusion() && decision.selected.len() > 1 {
            self.run_parallel(decision, prompt, context, started).await
        } else {
            self.run_single(decision, prompt, context, started).await
        }
    }

    // -----------------------------------------------------------------------
    // Single-model path
    // -----------------------------------------------------------------------

    async fn run_single(
        &self,
        decision: &RoutingDecision,
        prompt: &str,
        context: &[ChatMessage],
        started: Instant,
    ) -> Result<FusionResult, FusionError> {
        let Some(model) = decision.selected.first() else {
            return Err(FusionError::AllModelsFailed { attempted: 0 });
        };

        self.emit(FusionStage::Querying, model.id.clone(), started);
        let budget = model.call_budget.min(self.config.global_deadline);
        let response = self.invoker.invoke(model, prompt, context, budget).await;

        if !response.is_success() {
            self.emit(FusionStage::Error, model.id.clone(), started);
            return Err(FusionError::AllModelsFailed { attempted: 1 });
        }

        self.emit(FusionStage::Completed, model.id.clone(), started);
        Ok(FusionResult {
            text: response.text,
            contributing_models: vec![response.model_id],
            overall_confidence: response.confidence,
            strategy_used: decision.strategy.to_string(),
            total_processing_ms: started.elapsed().as_millis() as u64,
        })
    }

    // -----------------------------------------------------------------------
    // Parallel fan-out
    // -----------------------------------------------------------------------

    async fn run_parallel(
        &self,
        decision: &RoutingDecision,
        prompt: &str,
        context: &[ChatMessage],
        started: Instant,
    ) -> Result<FusionResult, FusionError> {
        let deadline = self.config.global_deadline;
        let models: Vec<_> = decision
            .selected
            .iter()
            .take(self.config.max_concurrent_models)
            .cloned()
            .collect();

        self.emit(
            FusionStage::Querying,
            format!("{} models in parallel", models.len()),
            started,
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<ModelResponse>();
        let mut handles = Vec::with_capacity(models.len());
        for model in &models {
            let invoker = Arc::clone(&self.invoker);
            let tx = tx.clone();
            let model = model.clone();
            let prompt = prompt.to_owned();
            let context = context.to_vec();
            let budget = model.call_budget.min(deadline);
            handles.push(tokio::spawn(async move {
                let response = invoker.invoke(&model, &prompt, &context, budget).await;
                let _ = tx.send(response);
            }));
        }
        drop(tx);

        // Monitoring loop: process arrivals, check early completion at the
        // polling interval, stop hard at the deadline.
        let mut responses: Vec<ModelResponse> = Vec::new();
        let sleep = tokio::time::sleep(deadline);
        tokio::pin!(sleep);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(response) => {
                        debug!(
                            model = %response.model_id,
                            status = ?response.status,
                            confidence = response.confidence,
                            "Fan-out response arrived"
                        );
                        responses.push(response);
                        if responses.len() == models.len() {
                            break;
                        }
                        if self.early_completion_ready(&responses, started, deadline) {
                            self.emit(FusionStage::EarlyCheck, "early completion", started);
                            break;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if self.early_completion_ready(&responses, started, deadline) {
                        self.emit(FusionStage::EarlyCheck, "early completion", started);
                        break;
                    }
                }
                _ = &mut sleep => {
                    warn!(deadline_ms = deadline.as_millis() as u64, "Fusion deadline reached");
                    break;
                }
            }
        }

        // Cancel stragglers. A cancelled call records success=false at the
        // elapsed time, same as a timeout, so tracker state stays coherent.
        for handle in &handles {
            handle.abort();
        }
        // Responses already queued on the channel when the loop broke still
        // count; dropping them would double-record those models as failures.
        while let Ok(response) = rx.try_recv() {
            responses.push(response);
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let responded: Vec<String> = responses.iter().map(|r| r.model_id.clone()).collect();
        for model in &models {
            if !responded.iter().any(|id| id == &model.id) {
                self.tracker.record_outcome(&model.id, elapsed_ms, false);
                responses.push(ModelResponse::failure(
                    &model.id,
                    ResponseStatus::Timeout,
                    "Cancelled before completion",
                    elapsed_ms,
                ));
            }
        }

        self.synthesize(decision, responses, prompt, started).await
    }

    /// Early-completion policy: (a) two responses whose average confidence
    /// clears the quality threshold once 60% of the deadline has elapsed, or
    /// (b) one response clearing threshold + 0.1 once 80% has elapsed.
    fn early_completion_ready(
        &self,
        responses: &[ModelResponse],
        started: Instant,
        deadline: Duration,
    ) -> bool {
        let successes: Vec<_> = responses.iter().filter(|r| r.is_success()).collect();
        if successes.is_empty() {
            return false;
        }

        let elapsed = started.elapsed().as_secs_f64();
        let total = deadline.as_secs_f64();

        if successes.len() >= 2 {
            let avg: f64 =
                successes.iter().map(|r| r.confidence).sum::<f64>() / successes.len() as f64;
            if avg >= self.config.quality_threshold && elapsed >= EARLY_TWO_RESPONSE_FRACTION * total
            {
                return true;
            }
        }

        let strong_bar = self.config.quality_threshold + 0.1;
        successes.iter().any(|r| r.confidence >= strong_bar)
            && elapsed >= EARLY_ONE_RESPONSE_FRACTION * total
    }

    // -----------------------------------------------------------------------
    // Synthesis
    // -----------------------------------------------------------------------

    async fn synthesize(
        &self,
        decision: &RoutingDecision,
        responses: Vec<ModelResponse>,
        prompt: &str,
        started: Instant,
    ) -> Result<FusionResult, FusionError> {
        let mut successes: Vec<&ModelResponse> =
            responses.iter().filter(|r| r.is_success()).collect();
        // Rank by confidence, tie-broken by model id so the result is
        // deterministic for a given response set regardless of arrival order.
        successes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model_id.cmp(&b.model_id))
        });

        if successes.is_empty() {
            self.emit(FusionStage::Error, "all invocations failed", started);
            return Err(FusionError::AllModelsFailed {
                attempted: responses.len(),
            });
        }

        let strategy_used = decision.strategy.to_string();

        if successes.len() == 1 {
            // Single contributor: returned directly, no synthesis call.
            let only = successes[0];
            self.emit(FusionStage::Completed, only.model_id.clone(), started);
            return Ok(FusionResult {
                text: only.text.clone(),
                contributing_models: vec![only.model_id.clone()],
                overall_confidence: only.confidence,
                strategy_used,
                total_processing_ms: started.elapsed().as_millis() as u64,
            });
        }

        let contributing: Vec<String> = successes.iter().map(|r| r.model_id.clone()).collect();
        let avg: f64 =
            successes.iter().map(|r| r.confidence).sum::<f64>() / successes.len() as f64;
        let overall_confidence = (avg + FUSION_CONFIDENCE_BONUS).min(1.0);

        let remaining = self.config.global_deadline.saturating_sub(started.elapsed());
        let text = if remaining >= self.config.synthesis_reserve {
            self.emit(FusionStage::Synthesizing, format!("{} responses", successes.len()), started);
            let primary = self.registry.primary();
            let synthesis_prompt = build_synthesis_prompt(prompt, &successes);
            let budget = primary.call_budget.min(remaining);
            let merged = self
                .invoker
                .invoke(primary, &synthesis_prompt, &[], budget)
                .await;
            if merged.is_success() {
                merged.text
            } else {
                // Synthesis failure degrades to the best raw response.
                warn!(model = %primary.id, "Synthesis call failed, returning best response");
                successes[0].text.clone()
            }
        } else {
            debug!(
                remaining_ms = remaining.as_millis() as u64,
                "Budget exhausted, skipping synthesis call"
            );
            successes[0].text.clone()
        };

        self.emit(FusionStage::Completed, format!("{} contributors", contributing.len()), started);
        Ok(FusionResult {
            text,
            contributing_models: contributing,
            overall_confidence,
            strategy_used,
            total_processing_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Prompt for the lightweight merge call issued to the fast model.
fn build_synthesis_prompt(original: &str, ranked: &[&ModelResponse]) -> String {
    let mut out = String::from(
        "Multiple assistants answered the same question. Merge their answers into one \
         coherent response, keeping the strongest points and removing repetition. \
         Answer directly, without mentioning the assistants.\n\n",
    );
    out.push_str(&format!("Question:\n{original}\n"));
    for (i, r) in ranked.iter().take(SYNTHESIS_TOP_N).enumerate() {
        out.push_str(&format!("\nAnswer {}:\n{}\n", i + 1, r.text));
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
