//! Error types for cyclewatch.

use std::fmt;
use thiserror::Error;

/// Result type alias using `CycleWatchError`.
pub type Result<T> = std::result::Result<T, CycleWatchError>;

/// Pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Reading accounts and edges from the graph source.
    Source,
    /// Building the indexed account graph.
    Ingest,
    /// Deriving node features.
    Features,
    /// Classifier forward pass.
    Classify,
    /// Training loop.
    Train,
    /// Model artifact load/save.
    Artifact,
    /// Top-K ranking.
    Rank,
    /// Evidence subgraph extraction.
    Extract,
    /// Scheduling per-account explanation tasks.
    Explain,
    /// Narrative generation.
    Narrative,
    /// Writing explanation records.
    Output,
    /// Configuration loading and validation.
    Config,
}

impl Stage {
    /// Returns the stage name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Stage::Source => "source",
            Stage::Ingest => "ingest",
            Stage::Features => "features",
            Stage::Classify => "classify",
            Stage::Train => "train",
            Stage::Artifact => "artifact",
            Stage::Rank => "rank",
            Stage::Extract => "extract",
            Stage::Explain => "explain",
            Stage::Narrative => "narrative",
            Stage::Output => "output",
            Stage::Config => "config",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while building, training or running the pipeline.
#[derive(Debug, Error)]
pub enum CycleWatchError {
    /// Malformed input: unknown account, feature row mismatch, out-of-range edge.
    #[error("Invalid input at {stage}: {message}")]
    InvalidInput {
        /// Stage that rejected the input.
        stage: Stage,
        /// Human readable reason.
        message: String,
    },

    /// The graph data source could not answer a query.
    #[error("Graph source error: {0}")]
    GraphSource(String),

    /// Narrative service failure for a single account.
    #[error("Narrative service error: {0}")]
    Narrative(String),

    /// Missing, corrupt or mismatched model artifact.
    #[error("Model artifact error: {0}")]
    Artifact(String),

    /// Timeout waiting for an external dependency.
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error at {stage}: {message}")]
    Internal {
        /// Stage the invariant broke in.
        stage: Stage,
        /// Human readable reason.
        message: String,
    },
}

impl CycleWatchError {
    /// Create an invalid input error for the given stage.
    #[must_use]
    pub fn input(stage: Stage, msg: impl Into<String>) -> Self {
        CycleWatchError::InvalidInput {
            stage,
            message: msg.into(),
        }
    }

    /// Create an artifact error.
    #[must_use]
    pub fn artifact(msg: impl Into<String>) -> Self {
        CycleWatchError::Artifact(msg.into())
    }

    /// Create a graph source error.
    #[must_use]
    pub fn graph_source(msg: impl Into<String>) -> Self {
        CycleWatchError::GraphSource(msg.into())
    }

    /// Create a narrative error.
    #[must_use]
    pub fn narrative(msg: impl Into<String>) -> Self {
        CycleWatchError::Narrative(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        CycleWatchError::Config(msg.into())
    }

    /// Create an internal error for the given stage.
    #[must_use]
    pub fn internal(stage: Stage, msg: impl Into<String>) -> Self {
        CycleWatchError::Internal {
            stage,
            message: msg.into(),
        }
    }

    /// The pipeline stage this error belongs to.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            CycleWatchError::InvalidInput { stage, .. } | CycleWatchError::Internal { stage, .. } => *stage,
            CycleWatchError::GraphSource(_) => Stage::Source,
            CycleWatchError::Narrative(_) | CycleWatchError::Timeout(_) => Stage::Narrative,
            CycleWatchError::Artifact(_) => Stage::Artifact,
            CycleWatchError::Config(_) => Stage::Config,
            CycleWatchError::Serialization(_) | CycleWatchError::Io(_) => Stage::Output,
        }
    }

    /// Returns true if the error is confined to a single explained account.
    ///
    /// Such errors are replaced by a fallback narrative rather than aborting
    /// the run.
    #[must_use]
    pub fn is_per_account(&self) -> bool {
        matches!(
            self,
            CycleWatchError::Narrative(_) | CycleWatchError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for CycleWatchError {
    fn from(err: serde_json::Error) -> Self {
        CycleWatchError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_reporting() {
        let err = CycleWatchError::input(Stage::Features, "3 rows for 4 nodes");
        assert_eq!(err.stage(), Stage::Features);
        assert_eq!(
            err.to_string(),
            "Invalid input at features: 3 rows for 4 nodes"
        );

        assert_eq!(CycleWatchError::graph_source("down").stage(), Stage::Source);
        assert_eq!(CycleWatchError::artifact("x").stage(), Stage::Artifact);
    }

    #[test]
    fn test_internal_errors_keep_their_stage() {
        let err = CycleWatchError::internal(Stage::Explain, "semaphore closed");
        assert_eq!(err.stage(), Stage::Explain);
        assert_eq!(err.to_string(), "Internal error at explain: semaphore closed");
        assert!(!err.is_per_account());

        let err = CycleWatchError::internal(Stage::Train, "optimizer state mismatch");
        assert_eq!(err.stage(), Stage::Train);
    }

    #[test]
    fn test_per_account_errors() {
        assert!(CycleWatchError::narrative("503").is_per_account());
        assert!(CycleWatchError::Timeout(std::time::Duration::from_secs(1)).is_per_account());
        assert!(!CycleWatchError::graph_source("down").is_per_account());
        assert!(!CycleWatchError::artifact("mismatch").is_per_account());
    }
}
