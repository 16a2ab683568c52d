//! Common graph types and data structures.

use cyclewatch_core::error::{CycleWatchError, Result, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Graph representation in Compressed Sparse Row (CSR) format.
///
/// Rows are source nodes; `col_indices` holds destinations. Multi-edges are
/// kept, one column entry per edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrGraph {
    /// Number of nodes.
    pub num_nodes: usize,
    /// Number of edges.
    pub num_edges: usize,
    /// Row offsets (length: num_nodes + 1).
    pub row_offsets: Vec<u64>,
    /// Column indices (length: num_edges).
    pub col_indices: Vec<u64>,
}

impl CsrGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            num_nodes: 0,
            num_edges: 0,
            row_offsets: vec![0],
            col_indices: Vec::new(),
        }
    }

    /// Create a graph from edge list.
    ///
    /// Edges keep their input order within a row. Fails if an endpoint is
    /// outside `0..num_nodes`.
    pub fn from_edges(num_nodes: usize, edges: &[(u64, u64)]) -> Result<Self> {
        let mut row_counts = vec![0u64; num_nodes];
        for &(src, dst) in edges {
            if src as usize >= num_nodes || dst as usize >= num_nodes {
                return Err(CycleWatchError::input(
                    Stage::Ingest,
                    format!("edge ({src}, {dst}) out of range for {num_nodes} nodes"),
                ));
            }
            row_counts[src as usize] += 1;
        }

        let mut row_offsets = vec![0u64; num_nodes + 1];
        for i in 0..num_nodes {
            row_offsets[i + 1] = row_offsets[i] + row_counts[i];
        }

        let mut col_indices = vec![0u64; edges.len()];
        let mut current_pos = row_offsets.clone();

        for &(src, dst) in edges {
            let pos = current_pos[src as usize] as usize;
            col_indices[pos] = dst;
            current_pos[src as usize] += 1;
        }

        Ok(Self {
            num_nodes,
            num_edges: edges.len(),
            row_offsets,
            col_indices,
        })
    }

    /// Check the structural invariants of the CSR arrays.
    ///
    /// Graphs built through `from_edges` always pass; this guards values
    /// assembled by hand or deserialized from elsewhere.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(CycleWatchError::input(Stage::Classify, msg));

        if self.row_offsets.len() != self.num_nodes + 1 {
            return fail(format!(
                "row_offsets has {} entries for {} nodes",
                self.row_offsets.len(),
                self.num_nodes
            ));
        }
        if self.col_indices.len() != self.num_edges {
            return fail(format!(
                "col_indices has {} entries for {} edges",
                self.col_indices.len(),
                self.num_edges
            ));
        }
        if self.row_offsets[0] != 0
            || self.row_offsets[self.num_nodes] as usize != self.num_edges
            || self.row_offsets.windows(2).any(|w| w[0] > w[1])
        {
            return fail("row_offsets are not a monotone prefix sum".to_string());
        }
        if let Some(&bad) = self
            .col_indices
            .iter()
            .find(|&&c| c as usize >= self.num_nodes)
        {
            return fail(format!(
                "edge references node {bad} but graph has {} nodes",
                self.num_nodes
            ));
        }
        Ok(())
    }

    /// Get the out-degree of a node.
    #[must_use]
    pub fn out_degree(&self, node: u64) -> u64 {
        let n = node as usize;
        if n >= self.num_nodes {
            return 0;
        }
        self.row_offsets[n + 1] - self.row_offsets[n]
    }

    /// In-degree of every node, counted over the edge list.
    #[must_use]
    pub fn in_degrees(&self) -> Vec<u64> {
        let mut degrees = vec![0u64; self.num_nodes];
        for &dst in &self.col_indices {
            degrees[dst as usize] += 1;
        }
        degrees
    }

    /// Get the out-neighbors of a node.
    #[must_use]
    pub fn neighbors(&self, node: u64) -> &[u64] {
        let n = node as usize;
        if n >= self.num_nodes {
            return &[];
        }
        let start = self.row_offsets[n] as usize;
        let end = self.row_offsets[n + 1] as usize;
        &self.col_indices[start..end]
    }

    /// Iterate all `(source, destination)` pairs in row order.
    pub fn edges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        (0..self.num_nodes as u64)
            .flat_map(move |src| self.neighbors(src).iter().map(move |&dst| (src, dst)))
    }
}

/// Directed account multigraph with a stable id/index bijection.
///
/// Indices are assigned by sorting account ids, so identical input always
/// yields identical indices.
#[derive(Debug, Clone)]
pub struct AccountGraph {
    node_ids: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<(usize, usize)>,
    csr: CsrGraph,
}

impl AccountGraph {
    /// Assemble a graph from sorted, unique ids and index edges.
    pub fn from_parts(node_ids: Vec<String>, edges: Vec<(usize, usize)>) -> Result<Self> {
        if node_ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CycleWatchError::input(
                Stage::Ingest,
                "account ids must be unique and sorted",
            ));
        }

        let pairs: Vec<(u64, u64)> = edges.iter().map(|&(s, d)| (s as u64, d as u64)).collect();
        let csr = CsrGraph::from_edges(node_ids.len(), &pairs)?;
        let index = node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        Ok(Self {
            node_ids,
            index,
            edges,
            csr,
        })
    }

    /// Graph with no accounts.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            node_ids: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            csr: CsrGraph::empty(),
        }
    }

    /// Number of accounts.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }

    /// Number of edges, multi-edges included.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Account ids in index order.
    #[must_use]
    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    /// Account id of a node index.
    #[must_use]
    pub fn node_id(&self, index: usize) -> Option<&str> {
        self.node_ids.get(index).map(String::as_str)
    }

    /// Node index of an account id.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// The id to index mapping.
    #[must_use]
    pub fn index_map(&self) -> &HashMap<String, usize> {
        &self.index
    }

    /// Edges in ingestion order.
    #[must_use]
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// CSR view of the edges.
    #[must_use]
    pub fn csr(&self) -> &CsrGraph {
        &self.csr
    }

    /// Whether the graph has no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }
}
