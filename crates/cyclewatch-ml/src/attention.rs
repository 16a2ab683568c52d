//! Multi-head graph attention layer.
//!
//! Each head projects node features with its own weight matrix, scores every
//! neighbor `j` of node `i` as `LeakyReLU(a_dst · z_i + a_src · z_j)`, and
//! aggregates neighbor projections with the softmax of those scores. Heads
//! are concatenated or averaged, then a bias is added.
//!
//! The backward pass is written out by hand; `LayerCache` keeps what it
//! needs from the forward pass.

use cyclewatch_core::error::{CycleWatchError, Result, Stage};
use cyclewatch_graph::types::CsrGraph;
use rand::{Rng, rngs::StdRng};
use serde::{Deserialize, Serialize};

// ============================================================================
// Neighborhoods
// ============================================================================

/// Attention neighborhoods: for each node, the sorted set of nodes linked to
/// it in either direction, plus the node itself.
///
/// Parallel edges collapse to a single neighbor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighborhoods {
    lists: Vec<Vec<usize>>,
}

impl Neighborhoods {
    /// Build neighborhoods from a CSR graph in O(V + E log E).
    #[must_use]
    pub fn from_csr(graph: &CsrGraph) -> Self {
        let n = graph.num_nodes;
        let mut lists: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

        for (src, dst) in graph.edges() {
            let (src, dst) = (src as usize, dst as usize);
            lists[dst].push(src);
            lists[src].push(dst);
        }
        for list in &mut lists {
            list.sort_unstable();
            list.dedup();
        }

        Self { lists }
    }

    /// Neighborhood of `node`.
    #[must_use]
    pub fn of(&self, node: usize) -> &[usize] {
        &self.lists[node]
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// Whether there are no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Trainable tensors of an attention layer.
///
/// Also used for gradients, which share the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    /// Projection weights, `[head][in][out]`.
    pub weights: Vec<Vec<Vec<f64>>>,
    /// Source-side attention vectors, `[head][out]`.
    pub att_src: Vec<Vec<f64>>,
    /// Target-side attention vectors, `[head][out]`.
    pub att_dst: Vec<Vec<f64>>,
    /// Output bias.
    pub bias: Vec<f64>,
}

impl LayerParams {
    /// Zero tensor with this shape.
    #[must_use]
    pub fn zeros_like(&self) -> Self {
        Self {
            weights: self
                .weights
                .iter()
                .map(|w| w.iter().map(|row| vec![0.0; row.len()]).collect())
                .collect(),
            att_src: self.att_src.iter().map(|a| vec![0.0; a.len()]).collect(),
            att_dst: self.att_dst.iter().map(|a| vec![0.0; a.len()]).collect(),
            bias: vec![0.0; self.bias.len()],
        }
    }

    /// All values in a fixed order: weights, source attention, target
    /// attention, bias.
    pub fn iter(&self) -> impl Iterator<Item = &f64> + '_ {
        self.weights
            .iter()
            .flatten()
            .flatten()
            .chain(self.att_src.iter().flatten())
            .chain(self.att_dst.iter().flatten())
            .chain(self.bias.iter())
    }

    /// Mutable values, same order as `iter`.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut f64> + '_ {
        self.weights
            .iter_mut()
            .flatten()
            .flatten()
            .chain(self.att_src.iter_mut().flatten())
            .chain(self.att_dst.iter_mut().flatten())
            .chain(self.bias.iter_mut())
    }

    /// Number of scalar parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Layer
// ============================================================================

/// Values kept from a forward pass for the backward pass.
#[derive(Debug, Clone)]
pub struct LayerCache {
    input: Vec<Vec<f64>>,
    /// Projected features, `[head][node][out]`.
    z: Vec<Vec<Vec<f64>>>,
    /// Attention coefficients, `[head][node][neighbor slot]`.
    alpha: Vec<Vec<Vec<f64>>>,
    /// Scores before LeakyReLU, same layout as `alpha`.
    scores: Vec<Vec<Vec<f64>>>,
}

impl LayerCache {
    /// Attention coefficients of one head, indexed like the neighborhoods.
    #[must_use]
    pub fn attention(&self, head: usize) -> &[Vec<f64>] {
        &self.alpha[head]
    }
}

/// A graph attention layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionLayer {
    in_dim: usize,
    out_dim: usize,
    heads: usize,
    concat: bool,
    negative_slope: f64,
    params: LayerParams,
}

impl AttentionLayer {
    /// Create a layer with random weights in `±sqrt(2 / (fan_in + fan_out))`
    /// and a zero bias.
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        heads: usize,
        concat: bool,
        negative_slope: f64,
        rng: &mut StdRng,
    ) -> Self {
        let w_scale = (2.0 / (in_dim + out_dim) as f64).sqrt();
        let a_scale = (2.0 / (out_dim + 1) as f64).sqrt();

        let mut uniform = |scale: f64, len: usize| -> Vec<f64> {
            (0..len).map(|_| rng.random_range(-scale..scale)).collect()
        };

        let weights: Vec<Vec<Vec<f64>>> = (0..heads)
            .map(|_| (0..in_dim).map(|_| uniform(w_scale, out_dim)).collect())
            .collect();
        let att_src: Vec<Vec<f64>> = (0..heads).map(|_| uniform(a_scale, out_dim)).collect();
        let att_dst: Vec<Vec<f64>> = (0..heads).map(|_| uniform(a_scale, out_dim)).collect();
        let bias_len = if concat { heads * out_dim } else { out_dim };

        Self {
            in_dim,
            out_dim,
            heads,
            concat,
            negative_slope,
            params: LayerParams {
                weights,
                att_src,
                att_dst,
                bias: vec![0.0; bias_len],
            },
        }
    }

    /// Input width.
    #[must_use]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    /// Output width: `heads * out_dim` when concatenating, else `out_dim`.
    #[must_use]
    pub fn output_dim(&self) -> usize {
        if self.concat {
            self.heads * self.out_dim
        } else {
            self.out_dim
        }
    }

    /// Number of heads.
    #[must_use]
    pub fn heads(&self) -> usize {
        self.heads
    }

    /// Parameters.
    #[must_use]
    pub fn params(&self) -> &LayerParams {
        &self.params
    }

    /// Mutable parameters.
    pub fn params_mut(&mut self) -> &mut LayerParams {
        &mut self.params
    }

    /// Check that the parameter tensors match the declared dimensions.
    pub fn validate(&self) -> Result<()> {
        let p = &self.params;
        let shape_ok = p.weights.len() == self.heads
            && p.weights
                .iter()
                .all(|w| w.len() == self.in_dim && w.iter().all(|r| r.len() == self.out_dim))
            && p.att_src.len() == self.heads
            && p.att_dst.len() == self.heads
            && p.att_src.iter().chain(&p.att_dst).all(|a| a.len() == self.out_dim)
            && p.bias.len() == self.output_dim();

        if !shape_ok {
            return Err(CycleWatchError::artifact(format!(
                "attention layer tensors do not match {} heads of {}x{}",
                self.heads, self.in_dim, self.out_dim
            )));
        }
        if p.iter().any(|v| !v.is_finite()) {
            return Err(CycleWatchError::artifact("attention layer has non-finite parameters"));
        }
        Ok(())
    }

    fn leaky_relu(&self, x: f64) -> f64 {
        if x > 0.0 { x } else { self.negative_slope * x }
    }

    /// Forward pass over all nodes.
    #[allow(clippy::needless_range_loop)]
    pub fn forward(
        &self,
        input: &[Vec<f64>],
        neighborhoods: &Neighborhoods,
    ) -> Result<(Vec<Vec<f64>>, LayerCache)> {
        let n = input.len();
        if neighborhoods.len() != n {
            return Err(CycleWatchError::input(
                Stage::Classify,
                format!("{} feature rows for {} nodes", n, neighborhoods.len()),
            ));
        }
        if let Some(row) = input.iter().find(|r| r.len() != self.in_dim) {
            return Err(CycleWatchError::input(
                Stage::Classify,
                format!("feature row of width {}, expected {}", row.len(), self.in_dim),
            ));
        }

        let mut output = vec![self.params.bias.clone(); n];
        let mut z_all = Vec::with_capacity(self.heads);
        let mut alpha_all = Vec::with_capacity(self.heads);
        let mut scores_all = Vec::with_capacity(self.heads);
        let head_scale = if self.concat { 1.0 } else { 1.0 / self.heads as f64 };

        for h in 0..self.heads {
            let z: Vec<Vec<f64>> = input
                .iter()
                .map(|x| linear_transform(x, &self.params.weights[h]))
                .collect();
            let s_src: Vec<f64> = z.iter().map(|zi| dot(zi, &self.params.att_src[h])).collect();
            let s_dst: Vec<f64> = z.iter().map(|zi| dot(zi, &self.params.att_dst[h])).collect();
            let offset = if self.concat { h * self.out_dim } else { 0 };

            let mut alpha = Vec::with_capacity(n);
            let mut scores = Vec::with_capacity(n);
            for i in 0..n {
                let nbrs = neighborhoods.of(i);
                let raw: Vec<f64> = nbrs.iter().map(|&j| s_dst[i] + s_src[j]).collect();
                let weights = softmax(&raw.iter().map(|&u| self.leaky_relu(u)).collect::<Vec<_>>());

                for (&j, &a) in nbrs.iter().zip(&weights) {
                    for k in 0..self.out_dim {
                        output[i][offset + k] += head_scale * a * z[j][k];
                    }
                }
                alpha.push(weights);
                scores.push(raw);
            }

            z_all.push(z);
            alpha_all.push(alpha);
            scores_all.push(scores);
        }

        Ok((
            output,
            LayerCache {
                input: input.to_vec(),
                z: z_all,
                alpha: alpha_all,
                scores: scores_all,
            },
        ))
    }

    /// Backward pass.
    ///
    /// Returns parameter gradients and the gradient with respect to the
    /// layer input.
    #[allow(clippy::needless_range_loop)]
    pub fn backward(
        &self,
        d_output: &[Vec<f64>],
        cache: &LayerCache,
        neighborhoods: &Neighborhoods,
    ) -> (LayerParams, Vec<Vec<f64>>) {
        let n = d_output.len();
        let mut grads = self.params.zeros_like();
        let mut d_input = vec![vec![0.0; self.in_dim]; n];

        for row in d_output {
            for (b, d) in grads.bias.iter_mut().zip(row) {
                *b += d;
            }
        }

        let head_scale = if self.concat { 1.0 } else { 1.0 / self.heads as f64 };

        for h in 0..self.heads {
            let z = &cache.z[h];
            let offset = if self.concat { h * self.out_dim } else { 0 };
            let d_head: Vec<&[f64]> = d_output
                .iter()
                .map(|row| &row[offset..offset + self.out_dim])
                .collect();

            let mut dz = vec![vec![0.0; self.out_dim]; n];
            let mut d_src = vec![0.0; n];
            let mut d_dst = vec![0.0; n];

            for i in 0..n {
                let nbrs = neighborhoods.of(i);
                let alpha = &cache.alpha[h][i];
                let scores = &cache.scores[h][i];

                // aggregation
                let d_alpha: Vec<f64> = nbrs
                    .iter()
                    .map(|&j| head_scale * dot(d_head[i], &z[j]))
                    .collect();
                for (&j, &a) in nbrs.iter().zip(alpha) {
                    for k in 0..self.out_dim {
                        dz[j][k] += head_scale * a * d_head[i][k];
                    }
                }

                // softmax and LeakyReLU
                let weighted: f64 = alpha.iter().zip(&d_alpha).map(|(a, d)| a * d).sum();
                for (slot, &j) in nbrs.iter().enumerate() {
                    let d_e = alpha[slot] * (d_alpha[slot] - weighted);
                    let slope = if scores[slot] > 0.0 { 1.0 } else { self.negative_slope };
                    let d_u = d_e * slope;
                    d_dst[i] += d_u;
                    d_src[j] += d_u;
                }
            }

            // attention vectors
            for m in 0..n {
                for k in 0..self.out_dim {
                    grads.att_src[h][k] += d_src[m] * z[m][k];
                    grads.att_dst[h][k] += d_dst[m] * z[m][k];
                    dz[m][k] += d_src[m] * self.params.att_src[h][k]
                        + d_dst[m] * self.params.att_dst[h][k];
                }
            }

            // projection
            let w = &self.params.weights[h];
            for m in 0..n {
                let x = &cache.input[m];
                for a in 0..self.in_dim {
                    for k in 0..self.out_dim {
                        grads.weights[h][a][k] += x[a] * dz[m][k];
                        d_input[m][a] += dz[m][k] * w[a][k];
                    }
                }
            }
        }

        (grads, d_input)
    }
}

/// `input · weights` for a `[in][out]` weight matrix.
fn linear_transform(input: &[f64], weights: &[Vec<f64>]) -> Vec<f64> {
    let out_dim = weights.first().map_or(0, Vec::len);
    let mut output = vec![0.0; out_dim];

    for (&x, row) in input.iter().zip(weights) {
        for (o, &w) in output.iter_mut().zip(row) {
            *o += x * w;
        }
    }

    output
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Numerically stable softmax.
pub(crate) fn softmax(x: &[f64]) -> Vec<f64> {
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = x.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn triangle() -> CsrGraph {
        CsrGraph::from_edges(4, &[(0, 1), (1, 2), (2, 0), (0, 1)]).unwrap()
    }

    #[test]
    fn test_neighborhoods_undirected_with_self_loops() {
        let nbrs = Neighborhoods::from_csr(&triangle());
        assert_eq!(nbrs.of(0), &[0, 1, 2]);
        assert_eq!(nbrs.of(1), &[0, 1, 2]);
        // isolated node attends to itself only
        assert_eq!(nbrs.of(3), &[3]);
    }

    #[test]
    fn test_attention_sums_to_one() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = AttentionLayer::new(2, 4, 3, true, 0.2, &mut rng);
        let nbrs = Neighborhoods::from_csr(&triangle());
        let x = vec![vec![1.0, 2.0], vec![0.0, 1.0], vec![3.0, 0.0], vec![0.0, 0.0]];

        let (out, cache) = layer.forward(&x, &nbrs).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].len(), 12);
        for h in 0..3 {
            for row in cache.attention(h) {
                let sum: f64 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_averaged_heads_width() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = AttentionLayer::new(3, 2, 4, false, 0.2, &mut rng);
        assert_eq!(layer.output_dim(), 2);
        assert_eq!(layer.params().bias.len(), 2);
        assert_eq!(layer.params().len(), 4 * 3 * 2 + 4 * 2 + 4 * 2 + 2);
    }

    #[test]
    fn test_rejects_wrong_width() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = AttentionLayer::new(2, 4, 1, true, 0.2, &mut rng);
        let nbrs = Neighborhoods::from_csr(&triangle());
        let x = vec![vec![1.0]; 4];
        assert!(layer.forward(&x, &nbrs).is_err());
        assert!(layer.forward(&x[..2], &nbrs).is_err());
    }

    #[test]
    fn test_validate_catches_bad_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = AttentionLayer::new(2, 4, 2, true, 0.2, &mut rng);
        assert!(layer.validate().is_ok());
        layer.params_mut().bias.pop();
        assert!(layer.validate().is_err());
    }
}
