//! Narrative request construction.

use cyclewatch_core::config::ExplainConfig;
use cyclewatch_core::error::Result;
use cyclewatch_graph::subgraph::ExplanationSubgraph;

/// Fixed instruction preceding the evidence.
pub const ANALYST_FRAMING: &str = "You are a financial crime analyst. Using only these facts, \
explain why this activity may indicate a circular money movement scheme. Be concise and cite \
the key accounts and transactions.";

/// A prompt ready for the narrative service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplanationRequest {
    /// Explained account.
    pub account_id: String,
    /// Evidence payload, already truncated.
    pub facts: String,
    /// Full prompt: framing followed by the facts.
    pub prompt: String,
}

/// Turns evidence subgraphs into bounded narrative prompts.
#[derive(Debug, Clone)]
pub struct ExplanationRequestBuilder {
    max_fact_chars: usize,
}

impl Default for ExplanationRequestBuilder {
    fn default() -> Self {
        Self::new(8000)
    }
}

impl ExplanationRequestBuilder {
    /// Builder capping the fact payload at `max_fact_chars` characters.
    #[must_use]
    pub fn new(max_fact_chars: usize) -> Self {
        Self { max_fact_chars }
    }

    /// Builder using the explanation settings.
    #[must_use]
    pub fn from_config(config: &ExplainConfig) -> Self {
        Self::new(config.max_fact_chars)
    }

    /// Evidence payload: the subgraph tree as JSON, `null` when there is no
    /// evidence, truncated on a character boundary.
    pub fn facts(&self, subgraph: Option<&ExplanationSubgraph>) -> Result<String> {
        let json = match subgraph {
            Some(subgraph) => serde_json::to_string(&subgraph.to_tree())?,
            None => "null".to_string(),
        };
        Ok(truncate_chars(json, self.max_fact_chars))
    }

    /// Build the request for `account_id`.
    pub fn build(
        &self,
        account_id: &str,
        subgraph: Option<&ExplanationSubgraph>,
    ) -> Result<ExplanationRequest> {
        let facts = self.facts(subgraph)?;
        let prompt = format!("{ANALYST_FRAMING}\n\nFacts:\n{facts}");
        Ok(ExplanationRequest {
            account_id: account_id.to_string(),
            facts,
            prompt,
        })
    }
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((byte_index, _)) = text.char_indices().nth(max_chars) {
        text.truncate(byte_index);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyclewatch_graph::records::{AccountRecord, LedgerSnapshot, TransactionRecord};
    use cyclewatch_graph::source::LedgerStore;
    use cyclewatch_graph::subgraph::SubgraphExtractor;

    fn subgraph() -> ExplanationSubgraph {
        let store = LedgerStore::from_snapshot(LedgerSnapshot {
            accounts: vec![AccountRecord::new("A"), AccountRecord::new("B")],
            transactions: vec![
                TransactionRecord::new("T1", "A", "B", 500.0),
                TransactionRecord::new("T2", "B", "A", 495.0),
            ],
            labels: vec![],
        })
        .unwrap();
        SubgraphExtractor::default()
            .extract(&store, "A")
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_prompt_layout() {
        let request = ExplanationRequestBuilder::default()
            .build("A", Some(&subgraph()))
            .unwrap();

        assert!(request.prompt.starts_with(ANALYST_FRAMING));
        assert!(request.prompt.contains("\n\nFacts:\n{"));
        assert!(request.facts.contains("\"T1\""));
        assert_eq!(request.account_id, "A");
    }

    #[test]
    fn test_facts_truncated() {
        let builder = ExplanationRequestBuilder::new(40);
        let facts = builder.facts(Some(&subgraph())).unwrap();
        assert_eq!(facts.chars().count(), 40);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("ééé".to_string(), 2), "éé");
        assert_eq!(truncate_chars("abc".to_string(), 10), "abc");
    }

    #[test]
    fn test_no_evidence() {
        let facts = ExplanationRequestBuilder::default().facts(None).unwrap();
        assert_eq!(facts, "null");
    }
}
