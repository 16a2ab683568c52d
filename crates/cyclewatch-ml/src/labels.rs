//! Node labels derived from transaction labels.

use cyclewatch_graph::records::{TransactionLabel, TransactionRecord};
use cyclewatch_graph::types::AccountGraph;
use std::collections::HashSet;

/// Class index of accounts involved in circular flow.
pub const CYCLE_CLASS: usize = 1;

/// Project transaction labels onto accounts.
///
/// An account is labelled 1 when it is the source or destination of any
/// transaction labelled `"cycle"`, 0 otherwise. Labels for unknown
/// transactions and endpoints outside the graph are ignored.
#[must_use]
pub fn project_cycle_labels(
    graph: &AccountGraph,
    transactions: &[TransactionRecord],
    labels: &[TransactionLabel],
) -> Vec<usize> {
    let cycle_ids: HashSet<&str> = labels
        .iter()
        .filter(|l| l.is_cycle())
        .map(|l| l.transaction_id.as_str())
        .collect();

    let mut node_labels = vec![0; graph.num_nodes()];
    for tx in transactions
        .iter()
        .filter(|t| cycle_ids.contains(t.transaction_id.as_str()))
    {
        for account in [&tx.src_account_id, &tx.dst_account_id] {
            if let Some(i) = graph.index_of(account) {
                node_labels[i] = CYCLE_CLASS;
            }
        }
    }

    tracing::debug!(
        positives = node_labels.iter().filter(|&&l| l == CYCLE_CLASS).count(),
        nodes = node_labels.len(),
        "cycle labels projected"
    );
    node_labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projects_both_endpoints() {
        let graph = AccountGraph::from_parts(
            vec!["A".into(), "B".into(), "C".into(), "D".into()],
            vec![(0, 1), (1, 2), (2, 3)],
        )
        .unwrap();
        let transactions = vec![
            TransactionRecord::new("T1", "A", "B", 10.0),
            TransactionRecord::new("T2", "B", "C", 10.0),
            TransactionRecord::new("T3", "C", "D", 10.0),
            TransactionRecord::new("T4", "D", "GHOST", 10.0),
        ];
        let labels = vec![
            TransactionLabel::cycle("T1"),
            TransactionLabel {
                transaction_id: "T3".into(),
                label: "normal".into(),
            },
            TransactionLabel::cycle("T4"),
            TransactionLabel::cycle("T-missing"),
        ];

        assert_eq!(
            project_cycle_labels(&graph, &transactions, &labels),
            vec![1, 1, 0, 1]
        );
    }
}
