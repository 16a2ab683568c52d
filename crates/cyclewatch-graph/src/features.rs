//! Structural node features.
//!
//! Features are a pure function of the graph: the same graph always yields
//! the same matrix, and nothing is cached between calls.

use crate::types::AccountGraph;
use cyclewatch_core::config::{FeatureConfig, FeatureKind};
use cyclewatch_core::error::{CycleWatchError, Result, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Row-per-node feature matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    kinds: Vec<FeatureKind>,
    rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Build a matrix from explicit rows.
    ///
    /// Every row must have one value per feature kind.
    pub fn new(kinds: Vec<FeatureKind>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != kinds.len()) {
            return Err(CycleWatchError::input(
                Stage::Features,
                format!("row {i} has {} values, expected {}", row.len(), kinds.len()),
            ));
        }
        Ok(Self { kinds, rows })
    }

    /// Feature columns.
    #[must_use]
    pub fn kinds(&self) -> &[FeatureKind] {
        &self.kinds
    }

    /// Feature rows, in node index order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Row width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.kinds.len()
    }

    /// Whether the matrix has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Computes per-node features from graph structure.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    kinds: Vec<FeatureKind>,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

impl FeatureBuilder {
    /// Create a builder for the configured features.
    #[must_use]
    pub fn new(config: FeatureConfig) -> Self {
        Self {
            kinds: config.kinds,
        }
    }

    /// Builder for an explicit feature list.
    #[must_use]
    pub fn with_kinds(kinds: &[FeatureKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
        }
    }

    /// Feature columns produced by this builder.
    #[must_use]
    pub fn kinds(&self) -> &[FeatureKind] {
        &self.kinds
    }

    /// Compute the feature matrix in O(V + E).
    pub fn build(&self, graph: &AccountGraph) -> Result<FeatureMatrix> {
        let n = graph.num_nodes();
        let csr = graph.csr();

        let in_degrees = csr.in_degrees();
        let reciprocal = if self.kinds.contains(&FeatureKind::ReciprocalEdges) {
            Self::reciprocal_edges(graph)
        } else {
            Vec::new()
        };

        let rows = (0..n)
            .map(|i| {
                self.kinds
                    .iter()
                    .map(|kind| match kind {
                        FeatureKind::InDegree => in_degrees[i] as f64,
                        FeatureKind::OutDegree => csr.out_degree(i as u64) as f64,
                        FeatureKind::ReciprocalEdges => reciprocal[i] as f64,
                    })
                    .collect()
            })
            .collect();

        FeatureMatrix::new(self.kinds.clone(), rows)
    }

    /// Outgoing edges per node whose reverse edge also exists.
    fn reciprocal_edges(graph: &AccountGraph) -> Vec<u32> {
        let pairs: HashSet<(usize, usize)> = graph.edges().iter().copied().collect();
        let mut counts = vec![0u32; graph.num_nodes()];

        for &(u, v) in graph.edges() {
            if u != v && pairs.contains(&(v, u)) {
                counts[u] += 1;
            }
        }

        counts
    }
}
