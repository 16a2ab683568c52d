//! Integration tests for cyclewatch
//!
//! These tests exercise the full pipeline across crates: ingestion,
//! features, training, persistence, ranking and explanation.

use async_trait::async_trait;
use cyclewatch::prelude::*;
use std::sync::Arc;

// ============================================================================
// Fixtures
// ============================================================================

fn edges(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(s, d)| (s.to_string(), d.to_string()))
        .collect()
}

/// Deterministic pseudo-random edge list over `n` accounts.
fn scrambled_graph(n: usize, m: usize, seed: u64) -> (Vec<String>, Vec<(String, String)>) {
    let accounts: Vec<String> = (0..n).map(|i| format!("acct-{i:03}")).collect();
    let mut state = seed;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 33) as usize
    };
    let pairs = (0..m)
        .map(|_| (accounts[next() % n].clone(), accounts[next() % n].clone()))
        .collect();
    (accounts, pairs)
}

/// Four accounts in a ring plus an isolated fifth account.
fn ring_ledger() -> LedgerSnapshot {
    LedgerSnapshot {
        accounts: ["A", "B", "C", "D", "E"]
            .into_iter()
            .map(AccountRecord::new)
            .collect(),
        transactions: vec![
            TransactionRecord::new("T1", "A", "B", 9500.0),
            TransactionRecord::new("T2", "B", "C", 9400.0),
            TransactionRecord::new("T3", "C", "D", 9300.0),
            TransactionRecord::new("T4", "D", "A", 9200.0),
        ],
        labels: ["T1", "T2", "T3", "T4"]
            .into_iter()
            .map(TransactionLabel::cycle)
            .collect(),
    }
}

struct CannedNarrator;

#[async_trait]
impl NarrativeService for CannedNarrator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        assert!(prompt.starts_with(ANALYST_FRAMING));
        Ok("funds return to the originating account".to_string())
    }
}

struct DownNarrator;

#[async_trait]
impl NarrativeService for DownNarrator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(CycleWatchError::narrative("connection refused"))
    }
}

fn pipeline_in(dir: &std::path::Path, narrator: Arc<dyn NarrativeService>) -> CycleWatchPipeline {
    let mut config = CycleWatchConfig::default();
    config.artifacts.dir = dir.to_path_buf();
    config.training.epochs = 200;
    CycleWatchPipeline::new(PipelineContext::new(config), narrator)
}

// ============================================================================
// Graph properties
// ============================================================================

#[test]
fn test_degree_sums_equal_edge_count() {
    for seed in 0..10 {
        let (accounts, pairs) = scrambled_graph(25, 80, seed);
        let graph = GraphIngestor::default().ingest(&accounts, &pairs).unwrap();
        let features = FeatureBuilder::default().build(&graph).unwrap();

        let in_col = features.kinds().iter().position(|&k| k == FeatureKind::InDegree).unwrap();
        let out_col = features.kinds().iter().position(|&k| k == FeatureKind::OutDegree).unwrap();

        let in_sum: f64 = features.rows().iter().map(|r| r[in_col]).sum();
        let out_sum: f64 = features.rows().iter().map(|r| r[out_col]).sum();
        assert_eq!(in_sum as usize, graph.num_edges());
        assert_eq!(out_sum as usize, graph.num_edges());
    }
}

#[test]
fn test_reingestion_is_deterministic() {
    let (accounts, pairs) = scrambled_graph(40, 120, 7);
    let mut shuffled = accounts.clone();
    shuffled.reverse();

    let first = GraphIngestor::default().ingest(&accounts, &pairs).unwrap();
    let second = GraphIngestor::default().ingest(&shuffled, &pairs).unwrap();

    assert_eq!(first.index_map(), second.index_map());
    assert_eq!(first.edges(), second.edges());
}

#[test]
fn test_ring_degrees() {
    let store = LedgerStore::from_snapshot(ring_ledger()).unwrap();
    let graph = GraphIngestor::default().from_source(&store).unwrap();
    let features = FeatureBuilder::default().build(&graph).unwrap();

    for row in &features.rows()[..4] {
        assert_eq!(row, &vec![1.0, 1.0]);
    }
    assert_eq!(features.rows()[4], vec![0.0, 0.0]);
}

// ============================================================================
// Classifier properties
// ============================================================================

#[test]
fn test_probabilities_sum_to_one() {
    let (accounts, pairs) = scrambled_graph(30, 90, 3);
    let graph = GraphIngestor::default().ingest(&accounts, &pairs).unwrap();
    let features = FeatureBuilder::default().build(&graph).unwrap();
    let classifier = CycleClassifier::new(features.width(), ModelConfig::default()).unwrap();

    let output = classifier.forward(graph.csr(), features.rows()).unwrap();
    assert_eq!(output.probabilities.len(), 30);
    for row in &output.probabilities {
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_ring_scores_above_isolated_account() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_in(dir.path(), Arc::new(CannedNarrator));
    let store = LedgerStore::from_snapshot(ring_ledger()).unwrap();

    let trained = pipeline.train(&store).unwrap();
    let artifact = ModelArtifact::from_trained(&trained).unwrap();
    let scored = pipeline.score(&store, &artifact).unwrap();

    let isolated = scored.probabilities[4];
    for (id, p) in scored.graph.node_ids().iter().zip(&scored.probabilities).take(4) {
        assert!(*p >= isolated, "{id}: {p} < {isolated}");
    }
}

#[test]
fn test_persisted_model_reproduces_probabilities() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_in(dir.path(), Arc::new(CannedNarrator));
    let store = LedgerStore::from_snapshot(ring_ledger()).unwrap();

    let (trained, _) = pipeline.train_and_save(&store).unwrap();
    let in_memory = ModelArtifact::from_trained(&trained).unwrap();
    let reloaded = ModelArtifact::load(pipeline.context().config().artifacts.model_path()).unwrap();

    let before = pipeline.score(&store, &in_memory).unwrap();
    let after = pipeline.score(&store, &reloaded).unwrap();
    assert_eq!(before.probabilities, after.probabilities);
}

// ============================================================================
// Ranking and evidence
// ============================================================================

#[test]
fn test_ranker_returns_min_k_n_non_increasing() {
    let ids: Vec<String> = (0..12).map(|i| format!("acct-{i:02}")).collect();
    let probs: Vec<f64> = (0..12).map(|i| ((i * 7) % 5) as f64 / 5.0).collect();

    for k in [0, 1, 5, 12, 40] {
        let ranked = RiskRanker::new(k).rank(&probs, &ids).unwrap();
        assert_eq!(ranked.len(), k.min(ids.len()));
        assert!(ranked.windows(2).all(|w| w[0].risk >= w[1].risk));
    }
}

#[test]
fn test_subgraph_bounds() {
    let (accounts, pairs) = scrambled_graph(15, 60, 11);
    let snapshot = LedgerSnapshot {
        accounts: accounts.iter().map(AccountRecord::new).collect(),
        transactions: pairs
            .iter()
            .enumerate()
            .map(|(i, (s, d))| TransactionRecord::new(format!("T{i}"), s, d, 100.0))
            .collect(),
        labels: Vec::new(),
    };
    let store = LedgerStore::from_snapshot(snapshot).unwrap();

    for (radius, limit) in [(1, 5), (2, 60), (3, 10), (4, 1)] {
        let extractor = SubgraphExtractor::new(radius, limit);
        for account in &accounts {
            if let Some(subgraph) = extractor.extract(&store, account).unwrap() {
                assert!(subgraph.paths().len() <= limit);
                assert!(subgraph.paths().iter().all(|p| p.len() <= radius));
                assert_eq!(subgraph.nodes()[0].node, NodeRef::Account(account.clone()));
            }
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_empty_graph_end_to_end() {
    let store = LedgerStore::from_snapshot(LedgerSnapshot::default()).unwrap();
    let graph = GraphIngestor::default().from_source(&store).unwrap();
    assert!(graph.is_empty());

    let features = FeatureBuilder::default().build(&graph).unwrap();
    assert!(features.is_empty());

    let classifier = CycleClassifier::new(2, ModelConfig::default()).unwrap();
    let output = classifier.forward(graph.csr(), features.rows()).unwrap();
    assert!(output.probabilities.is_empty());

    let ranked = RiskRanker::new(5)
        .rank(&output.cycle_probabilities(), graph.node_ids())
        .unwrap();
    assert!(ranked.is_empty());
}

#[tokio::test]
async fn test_detect_with_k_larger_than_population() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CycleWatchConfig::default();
    config.artifacts.dir = dir.path().to_path_buf();
    config.explain.top_k = 50;
    let pipeline = CycleWatchPipeline::new(PipelineContext::new(config), Arc::new(CannedNarrator));
    let store = Arc::new(LedgerStore::from_snapshot(ring_ledger()).unwrap());

    let (_, artifact) = pipeline.train_and_save(&*store).unwrap();
    let report = pipeline.detect(store, &artifact).await.unwrap();

    assert_eq!(report.ranked.len(), 5);
    let written = read_explanations(pipeline.context().config().artifacts.explanations_path()).unwrap();
    assert_eq!(written.len(), 5);
    assert!(written.iter().all(|r| (0.0..=1.0).contains(&r.risk)));
}

#[tokio::test]
async fn test_narrative_outage_falls_back_per_account() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_in(dir.path(), Arc::new(DownNarrator));
    let store = Arc::new(LedgerStore::from_snapshot(ring_ledger()).unwrap());

    let (_, artifact) = pipeline.train_and_save(&*store).unwrap();
    let report = pipeline.detect(store, &artifact).await.unwrap();

    assert_eq!(report.records.len(), 5);
    assert_eq!(report.fallbacks, 5);
    assert!(
        report
            .records
            .iter()
            .all(|r| r.narrative == "no narrative available")
    );
}

struct UnreachableSource;

impl GraphSource for UnreachableSource {
    fn list_accounts(&self) -> Result<Vec<String>> {
        Err(CycleWatchError::graph_source("connection refused"))
    }

    fn list_derived_edges(&self) -> Result<Vec<(String, String)>> {
        Err(CycleWatchError::graph_source("connection refused"))
    }
}

impl TrainingSource for UnreachableSource {
    fn transactions(&self) -> Result<Vec<TransactionRecord>> {
        Ok(Vec::new())
    }

    fn transaction_labels(&self) -> Result<Vec<TransactionLabel>> {
        Ok(Vec::new())
    }
}

#[test]
fn test_unreachable_source_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_in(dir.path(), Arc::new(CannedNarrator));

    let err = pipeline.train(&UnreachableSource).unwrap_err();
    assert_eq!(err.stage(), Stage::Source);
    assert!(!pipeline.context().config().artifacts.model_path().exists());
}

#[test]
fn test_unknown_account_policy_from_config() {
    let config = CycleWatchConfig::from_toml(
        r#"
        [ingest]
        unknown_account_policy = "reject"

        [explain]
        top_k = 3
        "#,
    )
    .unwrap();
    assert_eq!(config.explain.top_k, 3);

    let ingestor = GraphIngestor::new(config.ingest.clone());
    let err = ingestor
        .ingest(&["A", "B"], &edges(&[("A", "B"), ("B", "GHOST")]))
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Ingest);
}
