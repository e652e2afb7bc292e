use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Environment variable holding the OpenRouter API key. The key never lives
/// in the JSON config file; deployment supplies it as opaque configuration.
const ENV_OPENROUTER_KEY: &str = "OPENROUTER_API_KEY";

// ---------------------------------------------------------------------------
// ChorusConfig
// ---------------------------------------------------------------------------

/// Application configuration stored at `~/.chorus/config.json`.
///
/// The inference API key is **never** written to the JSON file. It is read
/// from the `OPENROUTER_API_KEY` environment variable on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusConfig {
    /// OpenRouter API key — loaded from the environment, skipped in JSON.
    #[serde(skip)]
    pub openrouter_api_key: Option<String>,

    /// Base URL of the inference gateway.
    pub inference_base_url: String,

    // Fusion engine knobs
    pub fusion_enabled: bool,
    pub max_concurrent_models: usize,
    pub quality_threshold: f64,
    pub global_deadline_ms: u64,
    pub total_timeout_ms: u64,
    pub secondary_timeout_ms: u64,

    // Response cache
    pub cache_ttl_minutes: u64,
    pub cache_max_entries: usize,

    // General
    pub log_level: String,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            inference_base_url: "https://openrouter.ai/api/v1".into(),
            fusion_enabled: true,
            max_concurrent_models: 3,
            quality_threshold: 0.7,
            global_deadline_ms: 25_000,
            total_timeout_ms: 30_000,
            secondary_timeout_ms: 5_000,
            cache_ttl_minutes: 30,
            cache_max_entries: 256,
            log_level: "info".into(),
        }
    }
}

impl ChorusConfig {
    /// Base config directory: `~/.chorus`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".chorus"))
    }

    /// Logs directory: `~/.chorus/logs`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Config file path: `~/.chorus/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Load the config from disk, falling back to defaults when the file is
    /// missing or unreadable. The API key is always taken from the
    /// environment, never from the file.
    pub fn load() -> Self {
        let mut config = match Self::config_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                warn!("Could not resolve config path: {e}; using defaults");
                Self::default()
            }
        };
        config.openrouter_api_key = std::env::var(ENV_OPENROUTER_KEY)
            .ok()
            .filter(|k| !k.is_empty());
        config
    }

    /// Load from an explicit path (no environment override). Missing or
    /// malformed files degrade to defaults rather than failing startup.
    pub fn load_from(path: &PathBuf) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Malformed config at {}: {e}; using defaults", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist the config (key excluded) to the given path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
