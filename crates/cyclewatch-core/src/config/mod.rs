//! Pipeline Configuration Management
//!
//! Provides unified configuration for a cyclewatch run:
//! - Ingestion policy for malformed edges
//! - Feature selection
//! - Classifier hyperparameters and training schedule
//! - Ranking/explanation limits
//! - Narrative service endpoint
//! - Logging and artifact locations
//!
//! # Example
//!
//! ```rust,ignore
//! use cyclewatch_core::config::CycleWatchConfig;
//!
//! // Load from environment
//! let config = CycleWatchConfig::from_env()?;
//!
//! // Or load from file
//! let config = CycleWatchConfig::from_file("cyclewatch.toml")?;
//! config.validate()?;
//! ```

use crate::error::{CycleWatchError, Result};
use crate::observability::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do with an edge that references an account missing from the
/// account list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownAccountPolicy {
    /// Discard the edge and keep going.
    #[default]
    Drop,
    /// Fail ingestion with an invalid input error.
    Reject,
}

/// How inference reconciles the stored node ordering with the current graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentPolicy {
    /// Orderings must be identical.
    #[default]
    Strict,
    /// Use the current graph's ids; differences are logged.
    RemapById,
}

/// Per-node structural feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Number of edges ending at the node.
    InDegree,
    /// Number of edges starting at the node.
    OutDegree,
    /// Number of outgoing edges whose reverse edge also exists.
    ReciprocalEdges,
}

impl FeatureKind {
    /// Baseline feature set: in-degree and out-degree.
    pub const BASELINE: [FeatureKind; 2] = [FeatureKind::InDegree, FeatureKind::OutDegree];
}

/// Graph ingestion configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Policy for edges referencing unknown accounts.
    pub unknown_account_policy: UnknownAccountPolicy,
}

/// Feature builder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Feature columns, in order.
    pub kinds: Vec<FeatureKind>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            kinds: FeatureKind::BASELINE.to_vec(),
        }
    }
}

/// Classifier hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Hidden width per attention head in the first layer.
    pub hidden_dim: usize,
    /// Attention heads in the first layer (outputs concatenated).
    pub heads: usize,
    /// Attention heads in the output layer (outputs averaged).
    pub output_heads: usize,
    /// Number of output classes.
    pub num_classes: usize,
    /// Dropout probability on the hidden layer during training.
    pub dropout: f64,
    /// Negative slope of the attention LeakyReLU.
    pub negative_slope: f64,
    /// Seed for parameter initialization and dropout masks.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 16,
            heads: 2,
            output_heads: 1,
            num_classes: 2,
            dropout: 0.2,
            negative_slope: 0.2,
            seed: 7,
        }
    }
}

impl ModelConfig {
    /// Validate hyperparameters.
    pub fn validate(&self) -> Result<()> {
        if self.hidden_dim == 0 || self.heads == 0 || self.output_heads == 0 {
            return Err(CycleWatchError::config(
                "hidden_dim, heads and output_heads must be positive",
            ));
        }
        if self.num_classes < 2 {
            return Err(CycleWatchError::config("num_classes must be at least 2"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(CycleWatchError::config("dropout must be in [0, 1)"));
        }
        Ok(())
    }
}

/// Training schedule and optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of full-batch epochs.
    pub epochs: usize,
    /// Adam learning rate.
    pub learning_rate: f64,
    /// L2 penalty added to every gradient.
    pub weight_decay: f64,
    /// First moment decay.
    pub beta1: f64,
    /// Second moment decay.
    pub beta2: f64,
    /// Numerical stability term.
    pub epsilon: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            learning_rate: 0.01,
            weight_decay: 5e-4,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl TrainingConfig {
    /// Set the epoch count.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the learning rate.
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }
}

/// Ranking and evidence limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    /// Number of accounts to explain.
    pub top_k: usize,
    /// Hop radius of the evidence subgraph.
    pub radius: usize,
    /// Maximum number of evidence paths.
    pub path_limit: usize,
    /// Maximum characters of the fact payload.
    pub max_fact_chars: usize,
    /// Accounts explained concurrently.
    pub concurrency: usize,
    /// Reconciliation of the stored node ordering.
    pub alignment: AlignmentPolicy,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            radius: 2,
            path_limit: 60,
            max_fact_chars: 8000,
            concurrency: 4,
            alignment: AlignmentPolicy::Strict,
        }
    }
}

/// External narrative service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    /// Generate endpoint URL.
    pub endpoint: String,
    /// Model name passed to the service.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Narrative used when the service fails for an account.
    pub fallback: String,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "gemma:2b".to_string(),
            timeout_secs: 120,
            fallback: "no narrative available".to_string(),
        }
    }
}

impl NarrativeConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Directory for the model artifact and explanation output.
    pub dir: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("artifacts"),
        }
    }
}

impl ArtifactConfig {
    /// Path of the persisted model artifact.
    pub fn model_path(&self) -> PathBuf {
        self.dir.join("model.json")
    }

    /// Path of the explanation records file.
    pub fn explanations_path(&self) -> PathBuf {
        self.dir.join("explanations.jsonl")
    }
}

/// Unified run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleWatchConfig {
    /// Ingestion configuration
    pub ingest: IngestConfig,
    /// Feature configuration
    pub features: FeatureConfig,
    /// Classifier configuration
    pub model: ModelConfig,
    /// Training configuration
    pub training: TrainingConfig,
    /// Ranking and explanation configuration
    pub explain: ExplainConfig,
    /// Narrative service configuration
    pub narrative: NarrativeConfig,
    /// Logging configuration
    pub logging: LogConfig,
    /// Artifact configuration
    pub artifacts: ArtifactConfig,
}

impl CycleWatchConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `CYCLEWATCH_*` overrides on top of this configuration.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("CYCLEWATCH_EPOCHS") {
            self.training.epochs = parse_env("CYCLEWATCH_EPOCHS", &val)?;
        }

        if let Ok(val) = std::env::var("CYCLEWATCH_TOP_K") {
            self.explain.top_k = parse_env("CYCLEWATCH_TOP_K", &val)?;
        }

        if let Ok(val) = std::env::var("CYCLEWATCH_NARRATIVE_URL") {
            self.narrative.endpoint = val;
        }

        if let Ok(val) = std::env::var("CYCLEWATCH_NARRATIVE_MODEL") {
            self.narrative.model = val;
        }

        if let Ok(val) = std::env::var("CYCLEWATCH_NARRATIVE_TIMEOUT_SECS") {
            self.narrative.timeout_secs = parse_env("CYCLEWATCH_NARRATIVE_TIMEOUT_SECS", &val)?;
        }

        if let Ok(val) = std::env::var("CYCLEWATCH_ARTIFACT_DIR") {
            self.artifacts.dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CYCLEWATCH_LOG_LEVEL") {
            self.logging.level = val.parse().map_err(CycleWatchError::config)?;
        }

        if std::env::var("CYCLEWATCH_LOG_JSON").is_ok() {
            self.logging.structured = true;
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CycleWatchError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CycleWatchError::config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CycleWatchError::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| CycleWatchError::config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;

        if self.features.kinds.is_empty() {
            return Err(CycleWatchError::config("at least one feature is required"));
        }
        if self.explain.radius == 0 {
            return Err(CycleWatchError::config("explain.radius must be at least 1"));
        }
        if self.explain.concurrency == 0 {
            return Err(CycleWatchError::config("explain.concurrency must be at least 1"));
        }
        if self.narrative.timeout_secs == 0 {
            return Err(CycleWatchError::config("narrative.timeout_secs must be positive"));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(CycleWatchError::config("training.learning_rate must be positive"));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CycleWatchError::config(format!("{} has invalid value '{}'", name, value)))
}
