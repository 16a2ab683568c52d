//! Ledger records: accounts, transactions and transaction labels.
//!
//! Field names follow the ledger exchange format (`accountID`,
//! `srcAccountID`, ...), so snapshots exported from the transaction store
//! deserialize without a mapping step.

use serde::{Deserialize, Serialize};

/// Transaction label marking a transaction as part of a circular flow.
pub const CYCLE_LABEL: &str = "cycle";

/// An account in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// External account identifier.
    #[serde(rename = "accountID")]
    pub account_id: String,
    /// Account type (e.g. "checking").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
    /// Currency code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Current balance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    /// Risk score assigned upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
}

impl AccountRecord {
    /// Account with only an identifier.
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            account_type: None,
            currency: None,
            balance: None,
            risk_score: None,
        }
    }
}

/// A single funds movement from one account to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// External transaction identifier.
    #[serde(rename = "transactionID")]
    pub transaction_id: String,
    /// Account that performed the transaction.
    #[serde(rename = "srcAccountID")]
    pub src_account_id: String,
    /// Account the funds were sent to.
    #[serde(rename = "dstAccountID")]
    pub dst_account_id: String,
    /// Amount moved.
    #[serde(default)]
    pub amount: f64,
    /// ISO-8601 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Transaction type (e.g. "wire").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
}

impl TransactionRecord {
    /// Transaction with an amount and no optional attributes.
    pub fn new(
        transaction_id: impl Into<String>,
        src: impl Into<String>,
        dst: impl Into<String>,
        amount: f64,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            src_account_id: src.into(),
            dst_account_id: dst.into(),
            amount,
            timestamp: None,
            transaction_type: None,
        }
    }
}

/// Training label attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLabel {
    /// Labelled transaction.
    #[serde(rename = "transactionID")]
    pub transaction_id: String,
    /// Label text; `"cycle"` marks circular flow.
    pub label: String,
}

impl TransactionLabel {
    /// Label a transaction as part of a cycle.
    pub fn cycle(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            label: CYCLE_LABEL.to_string(),
        }
    }

    /// Whether this label marks circular flow.
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        self.label == CYCLE_LABEL
    }
}

/// Complete ledger snapshot, the unit loaded into a `LedgerStore`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Accounts.
    pub accounts: Vec<AccountRecord>,
    /// Transactions.
    #[serde(default)]
    pub transactions: Vec<TransactionRecord>,
    /// Transaction labels for training.
    #[serde(default)]
    pub labels: Vec<TransactionLabel>,
}
