//! Persisted model artifact.
//!
//! The artifact bundles the classifier parameters with the node ordering
//! and feature columns used in training. It is written whole to a sibling
//! temp file and renamed into place, so readers never see a partial file.

use crate::classifier::CycleClassifier;
use crate::trainer::TrainedModel;
use chrono::{DateTime, Utc};
use cyclewatch_core::config::{AlignmentPolicy, FeatureKind};
use cyclewatch_core::error::{CycleWatchError, Result};
use cyclewatch_graph::types::AccountGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Current artifact layout version.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Differences between the stored and current node orderings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alignment {
    /// Accounts in the current graph but not in the artifact.
    pub added: Vec<String>,
    /// Accounts in the artifact but not in the current graph.
    pub removed: Vec<String>,
}

impl Alignment {
    /// Whether both orderings are identical.
    #[must_use]
    pub fn is_identical(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Serialized classifier with its training context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Layout version.
    pub format_version: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Feature columns, in order.
    pub features: Vec<FeatureKind>,
    /// Account ids in training index order.
    pub node_ids: Vec<String>,
    /// Classifier parameters.
    pub classifier: CycleClassifier,
}

impl ModelArtifact {
    /// Build an artifact, validating its contents.
    pub fn new(
        classifier: CycleClassifier,
        features: Vec<FeatureKind>,
        node_ids: Vec<String>,
    ) -> Result<Self> {
        let artifact = Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            created_at: Utc::now(),
            features,
            node_ids,
            classifier,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Artifact for a freshly trained model.
    pub fn from_trained(model: &TrainedModel) -> Result<Self> {
        Self::new(
            model.classifier.clone(),
            model.features.clone(),
            model.node_ids.clone(),
        )
    }

    /// Check version, ordering and shapes.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(CycleWatchError::artifact(format!(
                "unsupported format version {} (expected {})",
                self.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        if let Some(pair) = self.node_ids.windows(2).find(|w| w[0] >= w[1]) {
            return Err(CycleWatchError::artifact(format!(
                "node ordering is not strictly sorted at '{}' / '{}'",
                pair[0], pair[1]
            )));
        }
        if self.features.len() != self.classifier.input_dim() {
            return Err(CycleWatchError::artifact(format!(
                "{} feature columns for a classifier of input width {}",
                self.features.len(),
                self.classifier.input_dim()
            )));
        }
        self.classifier.validate()
    }

    /// Write the artifact atomically as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, json).map_err(|e| {
            CycleWatchError::artifact(format!("cannot write {}: {}", temp_path.display(), e))
        })?;
        std::fs::rename(&temp_path, path).map_err(|e| {
            CycleWatchError::artifact(format!("cannot replace {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            nodes = self.node_ids.len(),
            parameters = self.classifier.num_parameters(),
            "model artifact saved"
        );
        Ok(())
    }

    /// Load and validate an artifact.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CycleWatchError::artifact(format!("cannot read {}: {}", path.display(), e))
        })?;
        let artifact: Self = serde_json::from_str(&content).map_err(|e| {
            CycleWatchError::artifact(format!("corrupt artifact {}: {}", path.display(), e))
        })?;
        artifact.validate()?;

        tracing::debug!(path = %path.display(), created_at = %artifact.created_at, "model artifact loaded");
        Ok(artifact)
    }

    /// Reconcile the stored node ordering with `graph`.
    ///
    /// Under `Strict` any difference is an error. Under `RemapById` the
    /// differences are logged and returned; scoring then uses the current
    /// graph's ids.
    pub fn align(&self, graph: &AccountGraph, policy: AlignmentPolicy) -> Result<Alignment> {
        if self.node_ids == graph.node_ids() {
            return Ok(Alignment::default());
        }

        let stored: HashSet<&str> = self.node_ids.iter().map(String::as_str).collect();
        let current: HashSet<&str> = graph.node_ids().iter().map(String::as_str).collect();
        let alignment = Alignment {
            added: graph
                .node_ids()
                .iter()
                .filter(|id| !stored.contains(id.as_str()))
                .cloned()
                .collect(),
            removed: self
                .node_ids
                .iter()
                .filter(|id| !current.contains(id.as_str()))
                .cloned()
                .collect(),
        };

        match policy {
            AlignmentPolicy::Strict => Err(CycleWatchError::artifact(format!(
                "node ordering differs from the trained model: {} added, {} removed",
                alignment.added.len(),
                alignment.removed.len()
            ))),
            AlignmentPolicy::RemapById => {
                tracing::warn!(
                    added = alignment.added.len(),
                    removed = alignment.removed.len(),
                    "scoring a graph that differs from the training graph"
                );
                Ok(alignment)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::ModelTrainer;
    use cyclewatch_core::config::{ModelConfig, TrainingConfig};
    use cyclewatch_graph::features::FeatureBuilder;
    use cyclewatch_graph::ingest::GraphIngestor;

    fn graph(accounts: &[&str]) -> AccountGraph {
        let edges: Vec<(String, String)> = accounts
            .windows(2)
            .map(|w| (w[0].to_string(), w[1].to_string()))
            .collect();
        GraphIngestor::default().ingest(accounts, &edges).unwrap()
    }

    fn trained(graph: &AccountGraph) -> ModelArtifact {
        let features = FeatureBuilder::default().build(graph).unwrap();
        let labels = vec![0; graph.num_nodes()];
        let model = ModelTrainer::new(ModelConfig::default(), TrainingConfig::default())
            .train(graph, &features, &labels)
            .unwrap();
        ModelArtifact::from_trained(&model).unwrap()
    }

    #[test]
    fn test_round_trip_reproduces_probabilities() {
        let g = graph(&["A", "B", "C", "D"]);
        let artifact = trained(&g);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("model.json");

        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded, artifact);

        let features = FeatureBuilder::default().build(&g).unwrap();
        let before = artifact.classifier.forward(g.csr(), features.rows()).unwrap();
        let after = loaded.classifier.forward(g.csr(), features.rows()).unwrap();
        assert_eq!(before.probabilities, after.probabilities);

        // no temp file left behind
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_save_replaces_existing() {
        let g = graph(&["A", "B"]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "stale").unwrap();

        trained(&g).save(&path).unwrap();
        assert!(ModelArtifact::load(&path).is_ok());
    }

    #[test]
    fn test_load_failures() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelArtifact::load(dir.path().join("missing.json")).is_err());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{\"format_version\": 1").unwrap();
        let err = ModelArtifact::load(&corrupt).unwrap_err();
        assert!(matches!(err, CycleWatchError::Artifact(_)));
    }

    #[test]
    fn test_unsorted_node_ids_rejected() {
        let g = graph(&["A", "B"]);
        let mut artifact = trained(&g);
        artifact.node_ids = vec!["B".into(), "A".into()];
        assert!(artifact.validate().is_err());
    }

    #[test]
    fn test_alignment_policies() {
        let artifact = trained(&graph(&["A", "B", "C"]));
        let same = graph(&["A", "B", "C"]);
        let changed = graph(&["A", "C", "D"]);

        assert!(artifact.align(&same, AlignmentPolicy::Strict).unwrap().is_identical());
        assert!(artifact.align(&changed, AlignmentPolicy::Strict).is_err());

        let remap = artifact.align(&changed, AlignmentPolicy::RemapById).unwrap();
        assert_eq!(remap.added, vec!["D"]);
        assert_eq!(remap.removed, vec!["B"]);
    }
}
