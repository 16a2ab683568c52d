//! Graph ingestion.
//!
//! Turns account ids and `(source, destination)` relation pairs into an
//! `AccountGraph`. Ids are sorted before indexing so re-ingesting the same
//! input reproduces the same indices.

use crate::source::GraphSource;
use crate::types::AccountGraph;
use cyclewatch_core::config::{IngestConfig, UnknownAccountPolicy};
use cyclewatch_core::error::{CycleWatchError, Result, Stage};
use std::collections::HashMap;

/// Edges dropped during ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Accounts indexed.
    pub accounts: usize,
    /// Edges kept.
    pub edges: usize,
    /// Edges dropped because an endpoint is not a known account.
    pub dropped_edges: usize,
    /// Duplicate ids in the account list.
    pub duplicate_accounts: usize,
}

/// Builds `AccountGraph`s.
#[derive(Debug, Clone, Default)]
pub struct GraphIngestor {
    config: IngestConfig,
}

impl GraphIngestor {
    /// Create an ingestor.
    #[must_use]
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Ingestor with an explicit unknown-account policy.
    #[must_use]
    pub fn with_policy(policy: UnknownAccountPolicy) -> Self {
        Self {
            config: IngestConfig {
                unknown_account_policy: policy,
            },
        }
    }

    /// Read accounts and derived edges from `source` and ingest them.
    pub fn from_source(&self, source: &dyn GraphSource) -> Result<AccountGraph> {
        let accounts = source.list_accounts()?;
        let edges = source.list_derived_edges()?;
        self.ingest(&accounts, &edges)
    }

    /// Ingest account ids and relation pairs.
    pub fn ingest<A, S>(&self, accounts: &[A], edges: &[(S, S)]) -> Result<AccountGraph>
    where
        A: AsRef<str>,
        S: AsRef<str>,
    {
        self.ingest_with_stats(accounts, edges).map(|(graph, _)| graph)
    }

    /// Ingest and report what was kept and dropped.
    pub fn ingest_with_stats<A, S>(
        &self,
        accounts: &[A],
        edges: &[(S, S)],
    ) -> Result<(AccountGraph, IngestStats)>
    where
        A: AsRef<str>,
        S: AsRef<str>,
    {
        let mut node_ids: Vec<String> = accounts.iter().map(|a| a.as_ref().to_string()).collect();
        node_ids.sort_unstable();
        let before = node_ids.len();
        node_ids.dedup();

        let mut stats = IngestStats {
            accounts: node_ids.len(),
            duplicate_accounts: before - node_ids.len(),
            ..Default::default()
        };
        if stats.duplicate_accounts > 0 {
            tracing::debug!(
                duplicates = stats.duplicate_accounts,
                "duplicate account ids collapsed"
            );
        }

        let index: HashMap<&str, usize> = node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut indexed = Vec::with_capacity(edges.len());
        for (src, dst) in edges {
            let (src, dst) = (src.as_ref(), dst.as_ref());
            match (index.get(src), index.get(dst)) {
                (Some(&s), Some(&d)) => indexed.push((s, d)),
                _ => match self.config.unknown_account_policy {
                    UnknownAccountPolicy::Drop => {
                        tracing::debug!(src, dst, "dropping edge with unknown account");
                        stats.dropped_edges += 1;
                    }
                    UnknownAccountPolicy::Reject => {
                        let missing = if index.contains_key(src) { dst } else { src };
                        return Err(CycleWatchError::input(
                            Stage::Ingest,
                            format!("edge {src} -> {dst} references unknown account '{missing}'"),
                        ));
                    }
                },
            }
        }

        if stats.dropped_edges > 0 {
            tracing::warn!(
                dropped = stats.dropped_edges,
                "edges referencing unknown accounts were dropped"
            );
        }

        stats.edges = indexed.len();
        let graph = AccountGraph::from_parts(node_ids, indexed)?;
        tracing::info!(
            accounts = stats.accounts,
            edges = stats.edges,
            "account graph ingested"
        );
        Ok((graph, stats))
    }
}
