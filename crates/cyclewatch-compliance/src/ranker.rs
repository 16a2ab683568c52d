//! Top-K risk ranking.

use cyclewatch_core::error::{CycleWatchError, Result, Stage};
use serde::{Deserialize, Serialize};

/// Cycle probability assigned to an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    /// Account id.
    #[serde(rename = "accountID")]
    pub account_id: String,
    /// Probability of the cycle class.
    pub risk: f64,
}

/// Selects the highest-risk accounts.
#[derive(Debug, Clone, Copy)]
pub struct RiskRanker {
    top_k: usize,
}

impl Default for RiskRanker {
    fn default() -> Self {
        Self::new(5)
    }
}

impl RiskRanker {
    /// Create a ranker returning at most `top_k` accounts.
    #[must_use]
    pub fn new(top_k: usize) -> Self {
        Self { top_k }
    }

    /// Configured K.
    #[must_use]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Rank accounts by probability, descending.
    ///
    /// Returns `min(K, n)` scores. Equal probabilities are ordered by
    /// account id so the ranking is reproducible.
    pub fn rank(&self, probabilities: &[f64], node_ids: &[String]) -> Result<Vec<RiskScore>> {
        if probabilities.len() != node_ids.len() {
            return Err(CycleWatchError::input(
                Stage::Rank,
                format!(
                    "{} probabilities for {} accounts",
                    probabilities.len(),
                    node_ids.len()
                ),
            ));
        }

        let mut order: Vec<usize> = (0..probabilities.len()).collect();
        order.sort_by(|&a, &b| {
            probabilities[b]
                .total_cmp(&probabilities[a])
                .then_with(|| node_ids[a].cmp(&node_ids[b]))
        });

        Ok(order
            .into_iter()
            .take(self.top_k)
            .map(|i| RiskScore {
                account_id: node_ids[i].clone(),
                risk: probabilities[i],
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_descending_order() {
        let ranked = RiskRanker::new(3)
            .rank(&[0.1, 0.9, 0.5, 0.7], &ids(&["A", "B", "C", "D"]))
            .unwrap();
        let order: Vec<&str> = ranked.iter().map(|r| r.account_id.as_str()).collect();
        assert_eq!(order, vec!["B", "D", "C"]);
        assert!(ranked.windows(2).all(|w| w[0].risk >= w[1].risk));
    }

    #[test]
    fn test_k_larger_than_population() {
        let ranked = RiskRanker::new(10)
            .rank(&[0.2, 0.3], &ids(&["A", "B"]))
            .unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(RiskRanker::new(0).rank(&[0.2], &ids(&["A"])).unwrap().is_empty());
    }

    #[test]
    fn test_ties_break_by_id() {
        let ranked = RiskRanker::new(3)
            .rank(&[0.5, 0.5, 0.5], &ids(&["C", "A", "B"]))
            .unwrap();
        let order: Vec<&str> = ranked.iter().map(|r| r.account_id.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_length_mismatch() {
        let err = RiskRanker::default().rank(&[0.1], &ids(&["A", "B"])).unwrap_err();
        assert_eq!(err.stage(), Stage::Rank);
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(RiskScore {
            account_id: "A".into(),
            risk: 0.5,
        })
        .unwrap();
        assert_eq!(json["accountID"], "A");
    }
}
