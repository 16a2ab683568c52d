//! Full-batch training loop.

use crate::classifier::CycleClassifier;
use crate::optimizer::Adam;
use cyclewatch_core::config::{FeatureKind, ModelConfig, TrainingConfig};
use cyclewatch_core::error::{CycleWatchError, Result, Stage};
use cyclewatch_graph::features::FeatureMatrix;
use cyclewatch_graph::types::AccountGraph;
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// Metrics of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Epoch number, starting at 1.
    pub epoch: usize,
    /// Mean cross-entropy before the update.
    pub loss: f64,
    /// Training accuracy before the update.
    pub accuracy: f64,
}

/// Per-epoch training history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// One entry per epoch, in order.
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingReport {
    /// Metrics of the last epoch.
    #[must_use]
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// A trained classifier with everything needed to persist it.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    /// Trained parameters.
    pub classifier: CycleClassifier,
    /// Training history.
    pub report: TrainingReport,
    /// Account ids in index order at training time.
    pub node_ids: Vec<String>,
    /// Feature columns the classifier was trained on.
    pub features: Vec<FeatureKind>,
}

/// Trains a `CycleClassifier` on a labelled account graph.
#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    model: ModelConfig,
    training: TrainingConfig,
}

impl ModelTrainer {
    /// Create a trainer.
    #[must_use]
    pub fn new(model: ModelConfig, training: TrainingConfig) -> Self {
        Self { model, training }
    }

    /// Training schedule.
    #[must_use]
    pub fn training_config(&self) -> &TrainingConfig {
        &self.training
    }

    /// Train from freshly initialized parameters.
    ///
    /// `labels` holds one class index per node. Each epoch runs one forward
    /// pass with dropout, one backward pass and one Adam step.
    pub fn train(
        &self,
        graph: &AccountGraph,
        features: &FeatureMatrix,
        labels: &[usize],
    ) -> Result<TrainedModel> {
        if graph.is_empty() {
            return Err(CycleWatchError::input(
                Stage::Train,
                "cannot train on an empty graph",
            ));
        }
        if labels.len() != graph.num_nodes() {
            return Err(CycleWatchError::input(
                Stage::Train,
                format!("{} labels for {} nodes", labels.len(), graph.num_nodes()),
            ));
        }
        if features.num_rows() != graph.num_nodes() {
            return Err(CycleWatchError::input(
                Stage::Train,
                format!(
                    "{} feature rows for {} nodes",
                    features.num_rows(),
                    graph.num_nodes()
                ),
            ));
        }

        let mut classifier = CycleClassifier::new(features.width(), self.model.clone())?;
        let mut optimizer = Adam::from_config(&self.training);
        let mut dropout_rng = StdRng::seed_from_u64(self.model.seed.wrapping_add(1));
        let mut report = TrainingReport::default();

        tracing::info!(
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            parameters = classifier.num_parameters(),
            epochs = self.training.epochs,
            "training started"
        );

        for epoch in 1..=self.training.epochs {
            let grads =
                classifier.gradients(graph.csr(), features.rows(), labels, Some(&mut dropout_rng))?;
            if !grads.loss.is_finite() {
                return Err(CycleWatchError::input(
                    Stage::Train,
                    format!("loss diverged at epoch {epoch}"),
                ));
            }
            optimizer.step(classifier.parameters_mut(), grads.values())?;

            tracing::info!(epoch, loss = grads.loss, accuracy = grads.accuracy, "epoch");
            report.epochs.push(EpochMetrics {
                epoch,
                loss: grads.loss,
                accuracy: grads.accuracy,
            });
        }

        Ok(TrainedModel {
            classifier,
            report,
            node_ids: graph.node_ids().to_vec(),
            features: features.kinds().to_vec(),
        })
    }
}
