//! Evidence subgraph extraction.
//!
//! Walks the relation graph (accounts and transactions) outward from a focal
//! account, one hop per relation, in either direction. A path never reuses a
//! relation. The walk is bounded by a hop radius and by the number of paths
//! collected, which keeps both the lookup cost and the evidence handed to the
//! narrative step small.

use crate::source::{EvidenceSource, NodeDetails, NodeRef, Relation, RelationKind};
use cyclewatch_core::config::ExplainConfig;
use cyclewatch_core::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

// ============================================================================
// Subgraph types
// ============================================================================

/// A relation chain starting at the focal account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePath {
    /// Visited nodes, focal account first; one more than `relations`.
    pub nodes: Vec<NodeRef>,
    /// Relations traversed, in order.
    pub relations: Vec<Relation>,
}

impl EvidencePath {
    /// Hop count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Whether the path has no hops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// A node touched by the evidence, with its attributes when known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceNode {
    /// Node reference.
    pub node: NodeRef,
    /// Attributes from the source.
    pub details: Option<NodeDetails>,
}

/// Bounded neighborhood of a flagged account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationSubgraph {
    focal: String,
    paths: Vec<EvidencePath>,
    nodes: Vec<EvidenceNode>,
    edges: Vec<Relation>,
}

impl ExplanationSubgraph {
    /// Focal account id.
    #[must_use]
    pub fn focal(&self) -> &str {
        &self.focal
    }

    /// Collected paths, in discovery order.
    #[must_use]
    pub fn paths(&self) -> &[EvidencePath] {
        &self.paths
    }

    /// Union of nodes on all paths, focal account first.
    #[must_use]
    pub fn nodes(&self) -> &[EvidenceNode] {
        &self.nodes
    }

    /// Union of relations on all paths.
    #[must_use]
    pub fn edges(&self) -> &[Relation] {
        &self.edges
    }

    /// Render the paths as a tree rooted at the focal account.
    ///
    /// Children are grouped under the lowercase relation type, read from the
    /// parent's side: `performed`/`sent_to` when the relation points away
    /// from the parent, `performed_by`/`received_from` when it points at it.
    /// A branch exists per distinct relation, so a node reached twice
    /// appears twice.
    #[must_use]
    pub fn to_tree(&self) -> EvidenceTree {
        let details: HashMap<&NodeRef, &NodeDetails> = self
            .nodes
            .iter()
            .filter_map(|n| n.details.as_ref().map(|d| (&n.node, d)))
            .collect();
        let make = |node: &NodeRef, relation: Option<u64>| EvidenceTree {
            node_type: match node {
                NodeRef::Account(_) => "Account",
                NodeRef::Transaction(_) => "Transaction",
            },
            id: node.id().to_string(),
            relation,
            details: details.get(node).map(|d| (*d).clone()),
            children: BTreeMap::new(),
        };

        let mut root = make(&NodeRef::Account(self.focal.clone()), None);
        for path in &self.paths {
            let mut cursor = &mut root;
            for (hop, relation) in path.relations.iter().enumerate() {
                let outgoing = relation.from == path.nodes[hop];
                let branch = cursor
                    .children
                    .entry(relation_key(relation.kind, outgoing).to_string())
                    .or_default();
                let pos = match branch.iter().position(|c| c.relation == Some(relation.id)) {
                    Some(pos) => pos,
                    None => {
                        branch.push(make(&path.nodes[hop + 1], Some(relation.id)));
                        branch.len() - 1
                    }
                };
                cursor = &mut branch[pos];
            }
        }
        root
    }
}

fn relation_key(kind: RelationKind, outgoing: bool) -> &'static str {
    match (kind, outgoing) {
        (RelationKind::Performed, true) => "performed",
        (RelationKind::Performed, false) => "performed_by",
        (RelationKind::SentTo, true) => "sent_to",
        (RelationKind::SentTo, false) => "received_from",
    }
}

/// Nested evidence tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceTree {
    /// "Account" or "Transaction".
    #[serde(rename = "_type")]
    pub node_type: &'static str,
    /// Node id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Relation leading to this node; absent at the root.
    #[serde(rename = "_relation", skip_serializing_if = "Option::is_none")]
    pub relation: Option<u64>,
    /// Node attributes, inlined.
    #[serde(flatten)]
    pub details: Option<NodeDetails>,
    /// Child nodes keyed by relation type.
    #[serde(flatten)]
    pub children: BTreeMap<String, Vec<EvidenceTree>>,
}

impl EvidenceTree {
    /// Number of nodes in the tree, root included.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self
            .children
            .values()
            .flatten()
            .map(EvidenceTree::size)
            .sum::<usize>()
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Extracts bounded evidence subgraphs.
#[derive(Debug, Clone)]
pub struct SubgraphExtractor {
    radius: usize,
    path_limit: usize,
}

impl Default for SubgraphExtractor {
    fn default() -> Self {
        Self::new(2, 60)
    }
}

impl SubgraphExtractor {
    /// Create an extractor with a hop radius and a path-count limit.
    #[must_use]
    pub fn new(radius: usize, path_limit: usize) -> Self {
        Self { radius, path_limit }
    }

    /// Extractor using the explanation settings.
    #[must_use]
    pub fn from_config(config: &ExplainConfig) -> Self {
        Self::new(config.radius, config.path_limit)
    }

    /// Hop radius.
    #[must_use]
    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Path-count limit.
    #[must_use]
    pub fn path_limit(&self) -> usize {
        self.path_limit
    }

    /// Extract the evidence around `account_id`.
    ///
    /// Returns `None` when the account is unknown to the source or has no
    /// relations. Source failures propagate.
    pub fn extract(
        &self,
        source: &dyn EvidenceSource,
        account_id: &str,
    ) -> Result<Option<ExplanationSubgraph>> {
        let focal = NodeRef::Account(account_id.to_string());

        let mut walk = Walk {
            source,
            radius: self.radius,
            limit: self.path_limit,
            cache: HashMap::new(),
            nodes: vec![focal.clone()],
            relations: Vec::new(),
            paths: Vec::new(),
        };
        walk.visit(&focal)?;

        if walk.paths.is_empty() {
            tracing::debug!(account_id, "no evidence relations");
            return Ok(None);
        }

        let paths = walk.paths;
        let mut seen_nodes = HashSet::new();
        let mut seen_edges = HashSet::new();
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        for node in std::iter::once(&focal).chain(paths.iter().flat_map(|p| p.nodes.iter())) {
            if seen_nodes.insert(node.clone()) {
                nodes.push(EvidenceNode {
                    node: node.clone(),
                    details: source.node_details(node)?,
                });
            }
        }
        for relation in paths.iter().flat_map(|p| p.relations.iter()) {
            if seen_edges.insert(relation.id) {
                edges.push(relation.clone());
            }
        }

        tracing::debug!(
            account_id,
            paths = paths.len(),
            nodes = nodes.len(),
            edges = edges.len(),
            "evidence subgraph extracted"
        );

        Ok(Some(ExplanationSubgraph {
            focal: account_id.to_string(),
            paths,
            nodes,
            edges,
        }))
    }
}

/// Depth-first walk state.
struct Walk<'a> {
    source: &'a dyn EvidenceSource,
    radius: usize,
    limit: usize,
    cache: HashMap<NodeRef, Vec<Relation>>,
    nodes: Vec<NodeRef>,
    relations: Vec<Relation>,
    paths: Vec<EvidencePath>,
}

impl Walk<'_> {
    fn relations_of(&mut self, node: &NodeRef) -> Result<Vec<Relation>> {
        if let Some(cached) = self.cache.get(node) {
            return Ok(cached.clone());
        }
        let mut relations = self.source.relations(node)?;
        relations.sort_by_key(|r| (r.kind, r.id));
        self.cache.insert(node.clone(), relations.clone());
        Ok(relations)
    }

    fn visit(&mut self, node: &NodeRef) -> Result<()> {
        if self.relations.len() >= self.radius || self.paths.len() >= self.limit {
            return Ok(());
        }

        for relation in self.relations_of(node)? {
            if self.paths.len() >= self.limit {
                break;
            }
            if self.relations.iter().any(|r| r.id == relation.id) {
                continue;
            }
            let Some(next) = relation.other(node).cloned() else {
                continue;
            };

            self.nodes.push(next.clone());
            self.relations.push(relation);
            self.paths.push(EvidencePath {
                nodes: self.nodes.clone(),
                relations: self.relations.clone(),
            });

            self.visit(&next)?;

            self.nodes.pop();
            self.relations.pop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{AccountRecord, LedgerSnapshot, TransactionRecord};
    use crate::source::LedgerStore;
    use cyclewatch_core::error::CycleWatchError;

    fn ring_store() -> LedgerStore {
        LedgerStore::from_snapshot(LedgerSnapshot {
            accounts: ["A", "B", "C", "D", "E"]
                .into_iter()
                .map(AccountRecord::new)
                .collect(),
            transactions: vec![
                TransactionRecord::new("T1", "A", "B", 1000.0),
                TransactionRecord::new("T2", "B", "C", 990.0),
                TransactionRecord::new("T3", "C", "D", 980.0),
                TransactionRecord::new("T4", "D", "A", 970.0),
            ],
            labels: vec![],
        })
        .unwrap()
    }

    #[test]
    fn test_radius_two_reaches_counterparties() {
        let subgraph = SubgraphExtractor::default()
            .extract(&ring_store(), "A")
            .unwrap()
            .unwrap();

        // A -PERFORMED-> T1, T1 -SENT_TO-> B, D <-... T4, T4 <-PERFORMED- D
        assert_eq!(subgraph.paths().len(), 4);
        assert!(subgraph.paths().iter().all(|p| p.len() <= 2));
        let ids: Vec<&str> = subgraph.nodes().iter().map(|n| n.node.id()).collect();
        assert_eq!(ids, vec!["A", "T1", "B", "T4", "D"]);
        assert_eq!(subgraph.edges().len(), 4);
    }

    #[test]
    fn test_bounds_respected() {
        let store = ring_store();
        for radius in 1..=6 {
            for limit in 1..=8 {
                let extractor = SubgraphExtractor::new(radius, limit);
                let subgraph = extractor.extract(&store, "B").unwrap().unwrap();
                assert!(subgraph.paths().len() <= limit);
                assert!(subgraph.paths().iter().all(|p| p.len() <= radius));
            }
        }
    }

    #[test]
    fn test_relations_not_reused() {
        let subgraph = SubgraphExtractor::new(8, 1000)
            .extract(&ring_store(), "A")
            .unwrap()
            .unwrap();
        for path in subgraph.paths() {
            let unique: HashSet<u64> = path.relations.iter().map(|r| r.id).collect();
            assert_eq!(unique.len(), path.relations.len());
            assert_eq!(path.nodes.len(), path.relations.len() + 1);
        }
        // the full ring closes back on the focal account
        assert!(
            subgraph
                .paths()
                .iter()
                .any(|p| p.len() == 8 && p.nodes.last() == Some(&NodeRef::Account("A".into())))
        );
    }

    #[test]
    fn test_isolated_account_has_no_subgraph() {
        let store = ring_store();
        let extractor = SubgraphExtractor::default();
        assert!(extractor.extract(&store, "E").unwrap().is_none());
        assert!(extractor.extract(&store, "NOPE").unwrap().is_none());
    }

    #[test]
    fn test_tree_rooted_at_focal() {
        let subgraph = SubgraphExtractor::default()
            .extract(&ring_store(), "A")
            .unwrap()
            .unwrap();
        let tree = subgraph.to_tree();

        assert_eq!(tree.id, "A");
        assert_eq!(tree.size(), 5);
        assert_eq!(tree.children["performed"][0].id, "T1");
        assert_eq!(tree.children["performed"][0].children["sent_to"][0].id, "B");

        // T4 -SENT_TO-> A and D -PERFORMED-> T4 are walked against their direction
        assert!(!tree.children.contains_key("sent_to"));
        let incoming = &tree.children["received_from"][0];
        assert_eq!(incoming.id, "T4");
        assert_eq!(incoming.children["performed_by"][0].id, "D");
        assert!(!incoming.children.contains_key("performed"));

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["_type"], "Account");
        assert_eq!(json["performed"][0]["amount"], 1000.0);
        assert_eq!(json["received_from"][0]["performed_by"][0]["_type"], "Account");
    }

    struct FailingSource;

    impl EvidenceSource for FailingSource {
        fn relations(&self, _node: &NodeRef) -> Result<Vec<Relation>> {
            Err(CycleWatchError::graph_source("connection refused"))
        }

        fn node_details(&self, _node: &NodeRef) -> Result<Option<NodeDetails>> {
            Ok(None)
        }
    }

    #[test]
    fn test_source_errors_propagate() {
        let err = SubgraphExtractor::default()
            .extract(&FailingSource, "A")
            .unwrap_err();
        assert!(matches!(err, CycleWatchError::GraphSource(_)));
    }
}
