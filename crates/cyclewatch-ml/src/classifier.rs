//! Two-layer graph attention classifier.
//!
//! ```text
//! features ─▶ attention (heads × hidden, concat) ─▶ ELU ─▶ dropout
//!          ─▶ attention (classes, averaged heads) ─▶ logits ─▶ softmax
//! ```
//!
//! Dropout is active only while computing training gradients; `forward` is
//! deterministic.

use crate::attention::{AttentionLayer, LayerCache, LayerParams, Neighborhoods, softmax};
use cyclewatch_core::config::ModelConfig;
use cyclewatch_core::error::{CycleWatchError, Result, Stage};
use cyclewatch_graph::types::CsrGraph;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// Output of a forward pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    /// Raw class scores per node.
    pub logits: Vec<Vec<f64>>,
    /// Class probabilities per node; each row sums to 1.
    pub probabilities: Vec<Vec<f64>>,
}

impl ClassifierOutput {
    /// Probability of the cycle class (class 1) per node.
    #[must_use]
    pub fn cycle_probabilities(&self) -> Vec<f64> {
        self.probabilities
            .iter()
            .map(|p| p.get(1).copied().unwrap_or(0.0))
            .collect()
    }

    /// Most likely class per node.
    #[must_use]
    pub fn predictions(&self) -> Vec<usize> {
        self.probabilities.iter().map(|p| argmax(p)).collect()
    }
}

/// Output-layer attention coefficient for one (node, neighbor) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttentionCoefficient {
    /// Attention head.
    pub head: usize,
    /// Attending node.
    pub node: usize,
    /// Neighbor attended to.
    pub neighbor: usize,
    /// Softmax weight.
    pub weight: f64,
}

/// Loss, accuracy and parameter gradients of one full-batch pass.
#[derive(Debug, Clone)]
pub struct Gradients {
    /// Mean cross-entropy.
    pub loss: f64,
    /// Fraction of nodes whose argmax matches the label.
    pub accuracy: f64,
    /// Hidden layer gradients.
    pub hidden: LayerParams,
    /// Output layer gradients.
    pub output: LayerParams,
}

impl Gradients {
    /// Gradient values in parameter order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.hidden.iter().chain(self.output.iter()).copied()
    }
}

struct ForwardPass {
    nbrs: Neighborhoods,
    hidden_cache: LayerCache,
    hidden_pre: Vec<Vec<f64>>,
    dropout_mask: Option<Vec<Vec<f64>>>,
    output_cache: LayerCache,
    logits: Vec<Vec<f64>>,
}

/// Graph attention node classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleClassifier {
    config: ModelConfig,
    input_dim: usize,
    hidden: AttentionLayer,
    output: AttentionLayer,
}

impl CycleClassifier {
    /// Create a classifier with seeded random parameters.
    pub fn new(input_dim: usize, config: ModelConfig) -> Result<Self> {
        config.validate()?;
        if input_dim == 0 {
            return Err(CycleWatchError::config("classifier input width must be positive"));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let hidden = AttentionLayer::new(
            input_dim,
            config.hidden_dim,
            config.heads,
            true,
            config.negative_slope,
            &mut rng,
        );
        let output = AttentionLayer::new(
            hidden.output_dim(),
            config.num_classes,
            config.output_heads,
            false,
            config.negative_slope,
            &mut rng,
        );

        Ok(Self {
            config,
            input_dim,
            hidden,
            output,
        })
    }

    /// Hyperparameters.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Expected feature width.
    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Number of scalar parameters.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.hidden.params().len() + self.output.params().len()
    }

    /// Parameters in a fixed order: hidden layer, then output layer.
    pub fn parameters_mut(&mut self) -> impl Iterator<Item = &mut f64> + '_ {
        self.hidden
            .params_mut()
            .iter_mut()
            .chain(self.output.params_mut().iter_mut())
    }

    /// Check layer shapes against each other and the configuration.
    pub fn validate(&self) -> Result<()> {
        self.hidden.validate()?;
        self.output.validate()?;
        if self.hidden.in_dim() != self.input_dim
            || self.output.in_dim() != self.hidden.output_dim()
            || self.output.output_dim() != self.config.num_classes
        {
            return Err(CycleWatchError::artifact(
                "classifier layers do not chain: input, hidden and class widths disagree",
            ));
        }
        Ok(())
    }

    /// Class logits and probabilities for every node.
    ///
    /// `features` must hold one row per node, each `input_dim` wide, and the
    /// graph's edges must reference only existing nodes. An empty graph
    /// yields an empty output.
    pub fn forward(&self, graph: &CsrGraph, features: &[Vec<f64>]) -> Result<ClassifierOutput> {
        let pass = self.run(graph, features, None)?;
        let probabilities = pass.logits.iter().map(|l| softmax(l)).collect();
        Ok(ClassifierOutput {
            logits: pass.logits,
            probabilities,
        })
    }

    /// Class-1 probability per node.
    pub fn cycle_probabilities(&self, graph: &CsrGraph, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        Ok(self.forward(graph, features)?.cycle_probabilities())
    }

    /// Output-layer attention coefficients for `node`.
    pub fn attention(
        &self,
        graph: &CsrGraph,
        features: &[Vec<f64>],
        node: usize,
    ) -> Result<Vec<AttentionCoefficient>> {
        if node >= graph.num_nodes {
            return Err(CycleWatchError::input(
                Stage::Classify,
                format!("node {} out of range for {} nodes", node, graph.num_nodes),
            ));
        }
        let pass = self.run(graph, features, None)?;
        let nbrs = pass.nbrs.of(node);

        Ok((0..self.output.heads())
            .flat_map(|head| {
                let weights = &pass.output_cache.attention(head)[node];
                nbrs.iter()
                    .zip(weights)
                    .map(move |(&neighbor, &weight)| AttentionCoefficient {
                        head,
                        node,
                        neighbor,
                        weight,
                    })
            })
            .collect())
    }

    /// Full-batch loss and gradients against `labels`.
    ///
    /// Passing `dropout_rng` enables dropout on the hidden layer.
    pub fn gradients(
        &self,
        graph: &CsrGraph,
        features: &[Vec<f64>],
        labels: &[usize],
        dropout_rng: Option<&mut StdRng>,
    ) -> Result<Gradients> {
        let pass = self.run(graph, features, dropout_rng)?;
        let n = pass.logits.len();
        if labels.len() != n {
            return Err(CycleWatchError::input(
                Stage::Train,
                format!("{} labels for {} nodes", labels.len(), n),
            ));
        }
        if n == 0 {
            return Err(CycleWatchError::input(Stage::Train, "no nodes to train on"));
        }

        let mut loss = 0.0;
        let mut correct = 0usize;
        let mut d_logits = Vec::with_capacity(n);
        for (logits, &label) in pass.logits.iter().zip(labels) {
            if label >= self.config.num_classes {
                return Err(CycleWatchError::input(
                    Stage::Train,
                    format!("label {} outside {} classes", label, self.config.num_classes),
                ));
            }
            let probs = softmax(logits);
            loss -= probs[label].max(f64::MIN_POSITIVE).ln();
            if argmax(&probs) == label {
                correct += 1;
            }
            d_logits.push(
                probs
                    .iter()
                    .enumerate()
                    .map(|(c, p)| (p - if c == label { 1.0 } else { 0.0 }) / n as f64)
                    .collect::<Vec<f64>>(),
            );
        }

        let (output_grads, d_hidden) =
            self.output
                .backward(&d_logits, &pass.output_cache, &pass.nbrs);

        let d_pre: Vec<Vec<f64>> = d_hidden
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .map(|(k, &d)| {
                        let masked = pass.dropout_mask.as_ref().map_or(d, |m| d * m[i][k]);
                        masked * elu_grad(pass.hidden_pre[i][k])
                    })
                    .collect()
            })
            .collect();
        let (hidden_grads, _) = self.hidden.backward(&d_pre, &pass.hidden_cache, &pass.nbrs);

        Ok(Gradients {
            loss: loss / n as f64,
            accuracy: correct as f64 / n as f64,
            hidden: hidden_grads,
            output: output_grads,
        })
    }

    fn run(
        &self,
        graph: &CsrGraph,
        features: &[Vec<f64>],
        dropout_rng: Option<&mut StdRng>,
    ) -> Result<ForwardPass> {
        graph.validate()?;
        if features.len() != graph.num_nodes {
            return Err(CycleWatchError::input(
                Stage::Classify,
                format!(
                    "{} feature rows for {} nodes",
                    features.len(),
                    graph.num_nodes
                ),
            ));
        }

        let nbrs = Neighborhoods::from_csr(graph);
        let (hidden_pre, hidden_cache) = self.hidden.forward(features, &nbrs)?;
        let mut hidden: Vec<Vec<f64>> = hidden_pre
            .iter()
            .map(|row| row.iter().map(|&x| elu(x)).collect())
            .collect();

        let p = self.config.dropout;
        let dropout_mask = match dropout_rng {
            Some(rng) if p > 0.0 => {
                let keep_scale = 1.0 / (1.0 - p);
                let mask: Vec<Vec<f64>> = hidden
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|_| if rng.random_bool(p) { 0.0 } else { keep_scale })
                            .collect()
                    })
                    .collect();
                for (row, m) in hidden.iter_mut().zip(&mask) {
                    for (h, k) in row.iter_mut().zip(m) {
                        *h *= k;
                    }
                }
                Some(mask)
            }
            _ => None,
        };

        let (logits, output_cache) = self.output.forward(&hidden, &nbrs)?;

        Ok(ForwardPass {
            nbrs,
            hidden_cache,
            hidden_pre,
            dropout_mask,
            output_cache,
            logits,
        })
    }
}

fn elu(x: f64) -> f64 {
    if x > 0.0 { x } else { x.exp() - 1.0 }
}

fn elu_grad(x: f64) -> f64 {
    if x > 0.0 { 1.0 } else { x.exp() }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i)
}
