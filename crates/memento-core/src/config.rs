use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MementoError, Result};

/// Top-level configuration for the Memento decision-memory subsystem.
///
/// Loaded from `~/.memento/config.toml` by default. Each section corresponds
/// to one component of the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MementoConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl MementoConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MementoConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MementoError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.memento/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Embedding backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Deterministic hash vectors; no model files needed.
    Hash,
    /// Sentence-transformer ONNX model.
    Onnx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Fixed dimension of every stored vector.
    pub dimensions: usize,
    /// Path to the ONNX model file (onnx backend only).
    pub model_path: String,
    /// Path to the HuggingFace `tokenizer.json` (onnx backend only).
    pub tokenizer_path: String,
    /// Upper bound on a single embedding call.
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hash,
            dimensions: 1024,
            model_path: String::new(),
            tokenizer_path: String::new(),
            timeout_ms: 2_000,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Vector store lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Simulated cold-start delay before the index is loaded.
    pub warmup_ms: u64,
    /// Inactivity before `Running` becomes `IdleRunning`.
    pub idle_after_secs: u64,
    /// Further inactivity before `IdleRunning` stops the store.
    pub stop_after_secs: u64,
    /// How often the idle monitor checks the timers.
    pub monitor_interval_secs: u64,
    /// Start the store when the process boots.
    pub start_on_boot: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 500,
            idle_after_secs: 300,
            stop_after_secs: 900,
            monitor_interval_secs: 15,
            start_on_boot: false,
        }
    }
}

impl StoreConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_after_secs)
    }

    pub fn stop_after(&self) -> Duration {
        Duration::from_secs(self.stop_after_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }
}

/// Ingestion worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Messages leased per poll.
    pub batch_size: usize,
    /// Upper bound on messages processed concurrently.
    pub max_concurrent: usize,
    /// How long a leased message stays hidden before redelivery.
    pub visibility_timeout_secs: u64,
    /// Sleep between polls when the queue is empty.
    pub poll_interval_ms: u64,
    /// Deliveries before a transient failure is dead-lettered.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Longest accepted `context_text`, in bytes.
    pub max_context_len: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_concurrent: 4,
            visibility_timeout_secs: 60,
            poll_interval_ms: 500,
            max_attempts: 5,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            max_context_len: 8_192,
        }
    }
}

impl IngestionConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub max_k: usize,
    /// Budget applied when the caller does not pass one.
    pub default_budget_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            max_k: 50,
            default_budget_ms: 300,
        }
    }
}

impl RetrievalConfig {
    pub fn default_budget(&self) -> Duration {
        Duration::from_millis(self.default_budget_ms)
    }
}

/// Preference profile builder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Scope key of the cached profile.
    pub scope: String,
    /// Interval between scheduled builds.
    pub interval_hours: u64,
    /// Only decisions this recent feed the build. Unset means all history.
    pub lookback_days: Option<u32>,
    /// How long a build waits for the vector store to come up.
    pub start_budget_secs: u64,
    pub narrative_enabled: bool,
    pub narrative_timeout_secs: u64,
    /// Number of caption exemplars kept in the profile.
    pub style_examples: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            scope: "default".to_string(),
            interval_hours: 24 * 7,
            lookback_days: Some(180),
            start_budget_secs: 120,
            narrative_enabled: true,
            narrative_timeout_secs: 30,
            style_examples: 5,
        }
    }
}

impl ProfileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.max(1) * 3600)
    }

    pub fn start_budget(&self) -> Duration {
        Duration::from_secs(self.start_budget_secs)
    }

    pub fn narrative_timeout(&self) -> Duration {
        Duration::from_secs(self.narrative_timeout_secs)
    }
}

/// HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Maximum request body in bytes.
    pub body_limit_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
            body_limit_bytes: 1024 * 1024,
        }
    }
}
