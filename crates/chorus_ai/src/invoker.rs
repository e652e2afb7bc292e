//! Per-model invoker.
//!
//! Wraps every provider call in a uniform envelope: timeout enforcement,
//! response caching, in-flight deduplication, confidence scoring, and
//! availability bookkeeping. Failures come back as values — `invoke` never
//! returns `Err`, so the coordinator treats all outcomes uniformly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::availability::AvailabilityTracker;
use crate::providers::{InferenceProvider, ProviderError};
use crate::types::{ChatMessage, ChatRequest, MessageRole, ModelDescriptor, ModelResponse, ResponseStatus};

// ---------------------------------------------------------------------------
// Confidence scoring
// ---------------------------------------------------------------------------

/// Tunable weights for the structural confidence heuristic. Defaults match
/// the production tuning; tests override individual terms.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceWeights {
    pub base: f64,
    /// Added when the response exceeds 200 characters.
    pub length_bonus: f64,
    /// Added when the response contains list structure.
    pub list_bonus: f64,
    /// Added when the response contains example markers.
    pub example_bonus: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            base: 0.5,
            length_bonus: 0.2,
            list_bonus: 0.15,
            example_bonus: 0.15,
        }
    }
}

impl ConfidenceWeights {
    /// Score a response text, capped at 1.0. Purely structural; no semantic
    /// judgment.
    pub fn score(&self, text: &str) -> f64 {
        let mut score = self.base;
        if text.len() > 200 {
            score += self.length_bonus;
        }
        if has_list_structure(text) {
            score += self.list_bonus;
        }
        if has_example_markers(text) {
            score += self.example_bonus;
        }
        score.min(1.0)
    }
}

fn has_list_structure(text: &str) -> bool {
    text.lines().any(|line| {
        let t = line.trim_start();
        t.starts_with("- ")
            || t.starts_with("* ")
            || t.chars().next().is_some_and(|c| c.is_ascii_digit()) && t.contains(". ")
    })
}

fn has_example_markers(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("for example") || lower.contains("e.g.") || text.contains("```")
}

// ---------------------------------------------------------------------------
// Response cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    response: ModelResponse,
    created_at: Instant,
}

/// TTL + capacity bounded cache of successful responses, keyed by request
/// fingerprint. Expired entries are dropped lazily on read and by the
/// periodic sweep.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<ModelResponse> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(e) if e.created_at.elapsed() < self.ttl => return Some(e.response.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop it under the write lock.
        self.entries.write().remove(key);
        None
    }

    pub fn insert(&self, key: String, response: ModelResponse) {
        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries
            && !entries.contains_key(&key)
            && let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone())
        {
            entries.remove(&oldest);
        }
        entries.insert(
            key,
            CacheEntry {
                response,
                created_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry. Called from the service's maintenance task.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.created_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Cache/dedup key for one request. Cheap and collision-tolerant: model id
/// plus prompt length plus a prompt prefix.
fn request_fingerprint(model_id: &str, prompt: &str) -> String {
    let prefix: String = prompt.chars().take(128).collect();
    format!("{model_id}:{}:{prefix}", prompt.len())
}

// ---------------------------------------------------------------------------
// ModelInvoker
// ---------------------------------------------------------------------------

type InflightMap = Mutex<HashMap<String, broadcast::Sender<ModelResponse>>>;

/// Removes an in-flight dedup entry when dropped. The fan-out coordinator may
/// abort a leader task at any await point; dropping the sender here closes
/// the channel so waiters fall through to their own direct call instead of
/// blocking on a result that will never arrive.
struct InflightGuard<'a> {
    inflight: &'a InflightMap,
    key: String,
    armed: bool,
}

impl<'a> InflightGuard<'a> {
    fn new(inflight: &'a InflightMap, key: String) -> Self {
        Self {
            inflight,
            key,
            armed: true,
        }
    }

    /// Normal completion: remove the entry and broadcast the result to any
    /// waiters in one step.
    fn finish(mut self, response: &ModelResponse) {
        self.armed = false;
        if let Some(tx) = self.inflight.lock().remove(&self.key) {
            // Receiver count may be zero; that is fine.
            let _ = tx.send(response.clone());
        }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inflight.lock().remove(&self.key);
        }
    }
}

/// Executes single-model invocations. Shared by the coordinator's fan-out
/// tasks and the fallback controller.
pub struct ModelInvoker {
    provider: Arc<dyn InferenceProvider>,
    tracker: Arc<AvailabilityTracker>,
    cache: ResponseCache,
    weights: ConfidenceWeights,
    inflight: InflightMap,
}

impl ModelInvoker {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        tracker: Arc<AvailabilityTracker>,
        cache_ttl: Duration,
        cache_max_entries: usize,
    ) -> Self {
        Self {
            provider,
            tracker,
            cache: ResponseCache::new(cache_ttl, cache_max_entries),
            weights: ConfidenceWeights::default(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_weights(mut self, weights: ConfidenceWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Invoke one model, bounded by `budget`. Always returns a
    /// [`ModelResponse`]; failures and timeouts come back as statuses.
    ///
    /// Identical concurrent requests share one network call: the first caller
    /// becomes the leader and the rest await its broadcast result.
    pub async fn invoke(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        context: &[ChatMessage],
        budget: Duration,
    ) -> ModelResponse {
        let key = request_fingerprint(&model.id, prompt);

        let lookup_started = Instant::now();
        if let Some(mut cached) = self.cache.get(&key) {
            // A hit reports the lookup cost, not the original network time.
            cached.processing_time_ms = lookup_started.elapsed().as_millis() as u64;
            debug!(model = %model.id, "Cache hit");
            return cached;
        }

        // Leader election for identical in-flight requests.
        let maybe_rx = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(key.clone(), tx);
                    None
                }
            }
        };

        if let Some(mut rx) = maybe_rx {
            match rx.recv().await {
                Ok(response) => {
                    debug!(model = %model.id, "Joined in-flight request");
                    return response;
                }
                // Leader dropped without sending: run our own call, without
                // registering a new dedup entry.
                Err(_) => {
                    warn!(model = %model.id, "In-flight leader vanished, calling directly");
                    let response = self.invoke_direct(model, prompt, context, budget).await;
                    if response.is_success() {
                        self.cache.insert(key, response.clone());
                    }
                    return response;
                }
            }
        }

        // Leader path. The guard clears the map entry even if this future is
        // dropped mid-flight.
        let guard = InflightGuard::new(&self.inflight, key.clone());
        let response = self.invoke_direct(model, prompt, context, budget).await;

        if response.is_success() {
            self.cache.insert(key, response.clone());
        }
        guard.finish(&response);
        response
    }

    async fn invoke_direct(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        context: &[ChatMessage],
        budget: Duration,
    ) -> ModelResponse {
        let mut messages = context.to_vec();
        messages.push(ChatMessage::text(MessageRole::User, prompt));

        let request = ChatRequest {
            messages,
            model: model.id.clone(),
            max_tokens: 4096,
            temperature: None,
            system_prompt: None,
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(budget, self.provider.chat(&request)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(chat)) => {
                self.tracker.record_outcome(&model.id, elapsed_ms, true);
                let confidence = self.weights.score(&chat.content);
                debug!(
                    model = %model.id,
                    elapsed_ms,
                    confidence,
                    "Invocation succeeded"
                );
                ModelResponse {
                    model_id: model.id.clone(),
                    text: chat.content,
                    confidence,
                    processing_time_ms: elapsed_ms,
                    status: ResponseStatus::Success,
                    error_detail: None,
                }
            }
            Ok(Err(err)) => {
                self.tracker.record_outcome(&model.id, elapsed_ms, false);
                let status = match err {
                    ProviderError::Timeout => ResponseStatus::Timeout,
                    _ => ResponseStatus::Error,
                };
                warn!(model = %model.id, error = %err, "Invocation failed");
                ModelResponse::failure(&model.id, status, err.to_string(), elapsed_ms)
            }
            Err(_) => {
                self.tracker.record_outcome(&model.id, elapsed_ms, false);
                warn!(model = %model.id, budget_ms = budget.as_millis() as u64, "Invocation timed out");
                ModelResponse::failure(
                    &model.id,
                    ResponseStatus::Timeout,
                    format!("No response within {}ms", budget.as_millis()),
                    elapsed_ms,
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
