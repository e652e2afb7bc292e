//! Static model registry.
//!
//! Immutable roster of backend models, built once at startup and injected
//! into the router and coordinator. Lookup helpers by id and role.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::types::{ModelDescriptor, ModelRole};

fn tags(list: &[&str]) -> HashSet<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

/// Default backend roster (OpenRouter `org/model` ids).
fn default_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            id: "openai/gpt-4o-mini".into(),
            display_name: "GPT-4o mini".into(),
            role: ModelRole::Fast,
            specialties: tags(&["general", "educational"]),
            declared_reliability: 0.97,
            declared_avg_latency_ms: 1_200,
            // The primary model carries no cooldown: it is the system's one
            // guaranteed-available fallback.
            cooldown: Duration::ZERO,
            call_budget: Duration::from_secs(10),
        },
        ModelDescriptor {
            id: "anthropic/claude-sonnet-4".into(),
            display_name: "Claude Sonnet 4".into(),
            role: ModelRole::Quality,
            specialties: tags(&["technical", "programming", "analytical"]),
            declared_reliability: 0.92,
            declared_avg_latency_ms: 4_500,
            cooldown: Duration::from_secs(2),
            call_budget: Duration::from_secs(20),
        },
        ModelDescriptor {
            id: "deepseek/deepseek-r1".into(),
            display_name: "DeepSeek R1".into(),
            role: ModelRole::Quality,
            specialties: tags(&["analytical", "research", "programming"]),
            declared_reliability: 0.85,
            declared_avg_latency_ms: 6_000,
            cooldown: Duration::from_secs(3),
            call_budget: Duration::from_secs(20),
        },
        ModelDescriptor {
            id: "mistralai/mistral-large".into(),
            display_name: "Mistral Large".into(),
            role: ModelRole::Creative,
            specialties: tags(&["creative", "general"]),
            declared_reliability: 0.9,
            declared_avg_latency_ms: 3_000,
            cooldown: Duration::from_secs(1),
            call_budget: Duration::from_secs(15),
        },
        ModelDescriptor {
            id: "google/gemini-2.0-flash-001".into(),
            display_name: "Gemini 2.0 Flash".into(),
            role: ModelRole::Vision,
            specialties: tags(&["vision", "general"]),
            declared_reliability: 0.93,
            declared_avg_latency_ms: 2_000,
            cooldown: Duration::from_secs(5),
            call_budget: Duration::from_secs(15),
        },
    ]
}

/// Read-only model roster. Requires no synchronization: constructed once,
/// shared behind an `Arc`.
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    /// Build a registry from an explicit roster. At least one [`ModelRole::Fast`]
    /// model is required — routing depends on a guaranteed-available primary.
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self> {
        if models.is_empty() {
            bail!("Model registry cannot be empty");
        }
        if !models.iter().any(|m| m.role == ModelRole::Fast) {
            bail!("Model registry requires at least one fast model");
        }
        Ok(Self { models })
    }

    /// Registry with the default backend roster.
    pub fn with_defaults() -> Self {
        Self {
            models: default_models(),
        }
    }

    /// Look up a model by id.
    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    /// All models filling the given role.
    pub fn by_role(&self, role: ModelRole) -> Vec<&ModelDescriptor> {
        self.models.iter().filter(|m| m.role == role).collect()
    }

    /// The primary fast model. Guaranteed to exist by construction.
    pub fn primary(&self) -> &ModelDescriptor {
        self.models
            .iter()
            .find(|m| m.role == ModelRole::Fast)
            .unwrap_or(&self.models[0])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
