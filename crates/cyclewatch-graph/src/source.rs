//! Graph data sources.
//!
//! The pipeline reads the transaction store through three narrow traits:
//! - `GraphSource` lists accounts and derived account-to-account edges
//! - `TrainingSource` adds transactions and their labels
//! - `EvidenceSource` answers relation lookups for evidence extraction
//!
//! `LedgerStore` implements all three over an in-memory `LedgerSnapshot`.

use crate::records::{AccountRecord, LedgerSnapshot, TransactionLabel, TransactionRecord};
use cyclewatch_core::error::{CycleWatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// Source of the account graph.
pub trait GraphSource: Send + Sync {
    /// All account ids.
    fn list_accounts(&self) -> Result<Vec<String>>;

    /// One `(source id, destination id)` pair per transaction.
    fn list_derived_edges(&self) -> Result<Vec<(String, String)>>;
}

/// Source of labelled transactions for training.
pub trait TrainingSource: GraphSource {
    /// All transactions.
    fn transactions(&self) -> Result<Vec<TransactionRecord>>;

    /// Transaction labels.
    fn transaction_labels(&self) -> Result<Vec<TransactionLabel>>;
}

/// A node of the relation graph: an account or a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id")]
pub enum NodeRef {
    /// Account node.
    Account(String),
    /// Transaction node.
    Transaction(String),
}

impl NodeRef {
    /// Identifier without the node type.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            NodeRef::Account(id) | NodeRef::Transaction(id) => id,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Account(id) => write!(f, "Account({id})"),
            NodeRef::Transaction(id) => write!(f, "Transaction({id})"),
        }
    }
}

/// Relation type between relation-graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    /// Account performed a transaction.
    Performed,
    /// Transaction sent funds to an account.
    SentTo,
}

/// A directed relation with a store-unique id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Unique relation id.
    pub id: u64,
    /// Relation type.
    pub kind: RelationKind,
    /// Tail node.
    pub from: NodeRef,
    /// Head node.
    pub to: NodeRef,
}

impl Relation {
    /// The endpoint opposite `node`, if `node` is an endpoint.
    #[must_use]
    pub fn other(&self, node: &NodeRef) -> Option<&NodeRef> {
        if &self.from == node {
            Some(&self.to)
        } else if &self.to == node {
            Some(&self.from)
        } else {
            None
        }
    }
}

/// Attributes of a relation-graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeDetails {
    /// Account attributes.
    Account(AccountRecord),
    /// Transaction attributes.
    Transaction(TransactionRecord),
}

/// Source of relations around a node, for evidence extraction.
pub trait EvidenceSource: Send + Sync {
    /// Relations incident to `node` in either direction.
    fn relations(&self, node: &NodeRef) -> Result<Vec<Relation>>;

    /// Attributes of `node`, `None` if the store does not know it.
    fn node_details(&self, node: &NodeRef) -> Result<Option<NodeDetails>>;
}

/// In-memory transaction store.
///
/// A transaction contributes a `PERFORMED` relation from its source account
/// and a `SENT_TO` relation to its destination account, each only when that
/// account exists in the store.
#[derive(Debug, Clone, Default)]
pub struct LedgerStore {
    accounts: BTreeMap<String, AccountRecord>,
    transactions: Vec<TransactionRecord>,
    tx_index: HashMap<String, usize>,
    labels: Vec<TransactionLabel>,
    performed: HashMap<String, Vec<usize>>,
    received: HashMap<String, Vec<usize>>,
}

impl LedgerStore {
    /// Build a store from a snapshot.
    ///
    /// Duplicate account ids keep the last record; duplicate transaction ids
    /// are rejected.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self> {
        let accounts: BTreeMap<String, AccountRecord> = snapshot
            .accounts
            .into_iter()
            .map(|a| (a.account_id.clone(), a))
            .collect();

        let mut tx_index = HashMap::with_capacity(snapshot.transactions.len());
        let mut performed: HashMap<String, Vec<usize>> = HashMap::new();
        let mut received: HashMap<String, Vec<usize>> = HashMap::new();

        for (i, tx) in snapshot.transactions.iter().enumerate() {
            if tx_index.insert(tx.transaction_id.clone(), i).is_some() {
                return Err(CycleWatchError::graph_source(format!(
                    "duplicate transaction id '{}'",
                    tx.transaction_id
                )));
            }
            if accounts.contains_key(&tx.src_account_id) {
                performed.entry(tx.src_account_id.clone()).or_default().push(i);
            }
            if accounts.contains_key(&tx.dst_account_id) {
                received.entry(tx.dst_account_id.clone()).or_default().push(i);
            }
        }

        tracing::debug!(
            accounts = accounts.len(),
            transactions = snapshot.transactions.len(),
            labels = snapshot.labels.len(),
            "ledger store loaded"
        );

        Ok(Self {
            accounts,
            transactions: snapshot.transactions,
            tx_index,
            labels: snapshot.labels,
            performed,
            received,
        })
    }

    /// Load a JSON `LedgerSnapshot` file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CycleWatchError::graph_source(format!("cannot read {}: {}", path.display(), e))
        })?;
        let snapshot: LedgerSnapshot = serde_json::from_str(&content).map_err(|e| {
            CycleWatchError::graph_source(format!("cannot parse {}: {}", path.display(), e))
        })?;
        Self::from_snapshot(snapshot)
    }

    /// Number of accounts.
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Number of transactions.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    fn performed_relation(&self, tx: usize) -> Relation {
        let record = &self.transactions[tx];
        Relation {
            id: 2 * tx as u64,
            kind: RelationKind::Performed,
            from: NodeRef::Account(record.src_account_id.clone()),
            to: NodeRef::Transaction(record.transaction_id.clone()),
        }
    }

    fn sent_to_relation(&self, tx: usize) -> Relation {
        let record = &self.transactions[tx];
        Relation {
            id: 2 * tx as u64 + 1,
            kind: RelationKind::SentTo,
            from: NodeRef::Transaction(record.transaction_id.clone()),
            to: NodeRef::Account(record.dst_account_id.clone()),
        }
    }
}

impl GraphSource for LedgerStore {
    fn list_accounts(&self) -> Result<Vec<String>> {
        Ok(self.accounts.keys().cloned().collect())
    }

    fn list_derived_edges(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .transactions
            .iter()
            .map(|t| (t.src_account_id.clone(), t.dst_account_id.clone()))
            .collect())
    }
}

impl TrainingSource for LedgerStore {
    fn transactions(&self) -> Result<Vec<TransactionRecord>> {
        Ok(self.transactions.clone())
    }

    fn transaction_labels(&self) -> Result<Vec<TransactionLabel>> {
        Ok(self.labels.clone())
    }
}

impl EvidenceSource for LedgerStore {
    fn relations(&self, node: &NodeRef) -> Result<Vec<Relation>> {
        let relations: Vec<Relation> = match node {
            NodeRef::Account(id) => {
                let sent = self.performed.get(id).into_iter().flatten();
                let got = self.received.get(id).into_iter().flatten();
                sent.map(|&tx| self.performed_relation(tx))
                    .chain(got.map(|&tx| self.sent_to_relation(tx)))
                    .collect()
            }
            NodeRef::Transaction(id) => match self.tx_index.get(id) {
                Some(&tx) => {
                    let record = &self.transactions[tx];
                    let mut relations = Vec::with_capacity(2);
                    if self.accounts.contains_key(&record.src_account_id) {
                        relations.push(self.performed_relation(tx));
                    }
                    if self.accounts.contains_key(&record.dst_account_id) {
                        relations.push(self.sent_to_relation(tx));
                    }
                    relations
                }
                None => Vec::new(),
            },
        };
        Ok(relations)
    }

    fn node_details(&self, node: &NodeRef) -> Result<Option<NodeDetails>> {
        Ok(match node {
            NodeRef::Account(id) => self.accounts.get(id).cloned().map(NodeDetails::Account),
            NodeRef::Transaction(id) => self
                .tx_index
                .get(id)
                .map(|&i| NodeDetails::Transaction(self.transactions[i].clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LedgerStore {
        LedgerStore::from_snapshot(LedgerSnapshot {
            accounts: vec![
                AccountRecord::new("B"),
                AccountRecord::new("A"),
                AccountRecord::new("C"),
            ],
            transactions: vec![
                TransactionRecord::new("T1", "A", "B", 100.0),
                TransactionRecord::new("T2", "B", "C", 95.0),
                TransactionRecord::new("T3", "C", "GHOST", 90.0),
            ],
            labels: vec![TransactionLabel::cycle("T1")],
        })
        .unwrap()
    }

    #[test]
    fn test_accounts_listed_sorted() {
        assert_eq!(store().list_accounts().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_one_edge_per_transaction() {
        let edges = store().list_derived_edges().unwrap();
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[2], ("C".to_string(), "GHOST".to_string()));
    }

    #[test]
    fn test_relations_both_directions() {
        let store = store();
        let rels = store.relations(&NodeRef::Account("B".into())).unwrap();
        assert_eq!(rels.len(), 2);
        assert!(rels.iter().any(|r| r.kind == RelationKind::Performed));
        assert!(rels.iter().any(|r| r.kind == RelationKind::SentTo));

        let t1 = store.relations(&NodeRef::Transaction("T1".into())).unwrap();
        assert_eq!(t1.len(), 2);
    }

    #[test]
    fn test_missing_account_has_no_relation() {
        let store = store();
        let t3 = store.relations(&NodeRef::Transaction("T3".into())).unwrap();
        assert_eq!(t3.len(), 1);
        assert_eq!(t3[0].kind, RelationKind::Performed);
        assert!(
            store
                .node_details(&NodeRef::Account("GHOST".into()))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_duplicate_transaction_rejected() {
        let result = LedgerStore::from_snapshot(LedgerSnapshot {
            accounts: vec![AccountRecord::new("A")],
            transactions: vec![
                TransactionRecord::new("T1", "A", "A", 1.0),
                TransactionRecord::new("T1", "A", "A", 2.0),
            ],
            labels: vec![],
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_relation_other_endpoint() {
        let store = store();
        let rel = &store.relations(&NodeRef::Account("A".into())).unwrap()[0];
        let a = NodeRef::Account("A".into());
        assert_eq!(rel.other(&a), Some(&NodeRef::Transaction("T1".into())));
        assert_eq!(rel.other(&NodeRef::Account("Z".into())), None);
    }

    #[test]
    fn test_json_file_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(
            &path,
            r#"{"accounts":[{"accountID":"X"}],"transactions":[]}"#,
        )
        .unwrap();
        let store = LedgerStore::from_json_file(&path).unwrap();
        assert_eq!(store.account_count(), 1);

        assert!(LedgerStore::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
