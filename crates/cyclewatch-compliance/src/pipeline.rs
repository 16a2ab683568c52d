//! Train, score and explain.
//!
//! `CycleWatchPipeline` wires the stages together for one run:
//!
//! ```text
//! source ─▶ ingest ─▶ features ─▶ classifier ─▶ ranker
//!                                                  │
//!            per account: extract ─▶ prompt ─▶ narrative ─▶ JSONL
//! ```
//!
//! Graph and classifier work is synchronous. Explanations run as
//! independent tasks, at most `explain.concurrency` at a time; a narrative
//! failure or timeout only replaces that account's narrative with the
//! fallback text.

use crate::explanation::ExplanationRequestBuilder;
use crate::narrative::NarrativeService;
use crate::ranker::{RiskRanker, RiskScore};
use crate::records::{ExplanationRecord, ExplanationWriter};
use cyclewatch_core::context::PipelineContext;
use cyclewatch_core::error::{CycleWatchError, Result, Stage};
use cyclewatch_core::resilience::{TimeoutGuard, with_timeout};
use cyclewatch_graph::features::FeatureBuilder;
use cyclewatch_graph::ingest::GraphIngestor;
use cyclewatch_graph::source::{EvidenceSource, GraphSource, TrainingSource};
use cyclewatch_graph::subgraph::SubgraphExtractor;
use cyclewatch_graph::types::AccountGraph;
use cyclewatch_ml::artifact::{Alignment, ModelArtifact};
use cyclewatch_ml::labels::project_cycle_labels;
use cyclewatch_ml::trainer::{ModelTrainer, TrainedModel};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Cycle probabilities for every account of a graph.
#[derive(Debug, Clone)]
pub struct ScoredGraph {
    /// Scored graph.
    pub graph: AccountGraph,
    /// Class-1 probability per node, in index order.
    pub probabilities: Vec<f64>,
    /// Difference from the training node ordering.
    pub alignment: Alignment,
}

/// Outcome of a detect-and-explain run.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    /// Top-K accounts, highest risk first.
    pub ranked: Vec<RiskScore>,
    /// Records written, in ranking order.
    pub records: Vec<ExplanationRecord>,
    /// Accounts that received the fallback narrative.
    pub fallbacks: usize,
}

/// Output-layer attention paid to one neighbor.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborAttention {
    /// Attention head.
    pub head: usize,
    /// Neighbor account id.
    pub neighbor_id: String,
    /// Softmax weight.
    pub weight: f64,
}

/// Cycle probability of one account and what the classifier attended to.
#[derive(Debug, Clone)]
pub struct AccountAttention {
    /// Account id.
    pub account_id: String,
    /// Class-1 probability.
    pub probability: f64,
    /// Output-layer coefficients, head-major.
    pub neighbors: Vec<NeighborAttention>,
}

type ExplainTask = JoinHandle<Result<Result<String>>>;

/// Detection pipeline bound to a run context and a narrative service.
#[derive(Clone)]
pub struct CycleWatchPipeline {
    ctx: PipelineContext,
    narrator: Arc<dyn NarrativeService>,
}

impl CycleWatchPipeline {
    /// Create a pipeline.
    pub fn new(ctx: PipelineContext, narrator: Arc<dyn NarrativeService>) -> Self {
        Self { ctx, narrator }
    }

    /// Run context.
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Ingest the source's graph under the configured policy.
    pub fn ingest(&self, source: &dyn GraphSource) -> Result<AccountGraph> {
        GraphIngestor::new(self.ctx.config().ingest.clone()).from_source(source)
    }

    /// Train a classifier on the source's labelled transactions.
    pub fn train<S: TrainingSource>(&self, source: &S) -> Result<TrainedModel> {
        let _span = self.ctx.span().entered();
        let config = self.ctx.config();

        let graph = self.ingest(source)?;
        let features = FeatureBuilder::new(config.features.clone()).build(&graph)?;
        let labels = project_cycle_labels(
            &graph,
            &source.transactions()?,
            &source.transaction_labels()?,
        );

        ModelTrainer::new(config.model.clone(), config.training.clone()).train(
            &graph,
            &features,
            &labels,
        )
    }

    /// Train and write the artifact to the configured model path.
    pub fn train_and_save<S: TrainingSource>(&self, source: &S) -> Result<(TrainedModel, ModelArtifact)> {
        let trained = self.train(source)?;
        let artifact = ModelArtifact::from_trained(&trained)?;
        artifact.save(self.ctx.config().artifacts.model_path())?;
        Ok((trained, artifact))
    }

    /// Score every account of the source's current graph.
    ///
    /// Features are rebuilt with the artifact's feature list. The stored
    /// node ordering is reconciled under the configured alignment policy.
    pub fn score(&self, source: &dyn GraphSource, artifact: &ModelArtifact) -> Result<ScoredGraph> {
        let _span = self.ctx.span().entered();

        let graph = self.ingest(source)?;
        let alignment = artifact.align(&graph, self.ctx.config().explain.alignment)?;
        let features = FeatureBuilder::with_kinds(&artifact.features).build(&graph)?;
        let probabilities = artifact
            .classifier
            .cycle_probabilities(graph.csr(), features.rows())?;

        Ok(ScoredGraph {
            graph,
            probabilities,
            alignment,
        })
    }

    /// Load the configured model artifact, or `None` when none was saved.
    ///
    /// A file that exists but cannot be read or validated is an error.
    pub fn load_model(&self) -> Result<Option<ModelArtifact>> {
        let path = self.ctx.config().artifacts.model_path();
        if !path.exists() {
            return Ok(None);
        }
        ModelArtifact::load(&path).map(Some)
    }

    /// Cycle probability and output-layer attention of one account.
    ///
    /// Scores through [`score`](Self::score), so the alignment policy
    /// applies. `None` when the account is not in the graph.
    pub fn attention(
        &self,
        source: &dyn GraphSource,
        artifact: &ModelArtifact,
        account_id: &str,
    ) -> Result<Option<AccountAttention>> {
        let scored = self.score(source, artifact)?;
        let Some(node) = scored.graph.index_of(account_id) else {
            return Ok(None);
        };
        let features = FeatureBuilder::with_kinds(&artifact.features).build(&scored.graph)?;
        let neighbors = artifact
            .classifier
            .attention(scored.graph.csr(), features.rows(), node)?
            .into_iter()
            .map(|c| NeighborAttention {
                head: c.head,
                neighbor_id: scored.graph.node_id(c.neighbor).unwrap_or_default().to_string(),
                weight: c.weight,
            })
            .collect();

        Ok(Some(AccountAttention {
            account_id: account_id.to_string(),
            probability: scored.probabilities[node],
            neighbors,
        }))
    }

    /// Top-K accounts of a scored graph.
    pub fn rank(&self, scored: &ScoredGraph) -> Result<Vec<RiskScore>> {
        RiskRanker::new(self.ctx.config().explain.top_k)
            .rank(&scored.probabilities, scored.graph.node_ids())
    }

    /// Explain ranked accounts and write one record per account.
    ///
    /// Records are written in ranking order as they complete. Narrative
    /// failures, timeouts and panicked tasks fall back to the configured
    /// text. Evidence source failures abort the batch; records already
    /// written are kept.
    pub async fn explain(
        &self,
        evidence: Arc<dyn EvidenceSource>,
        ranked: &[RiskScore],
        writer: &mut ExplanationWriter,
    ) -> Result<DetectionReport> {
        let config = self.ctx.config();
        let timeout = config.narrative.timeout();
        let concurrency = config.explain.concurrency.max(1);
        let _guard = TimeoutGuard::new(
            "explain",
            timeout * ranked.len().div_ceil(concurrency).max(1) as u32,
        );

        let extractor = SubgraphExtractor::from_config(&config.explain);
        let builder = ExplanationRequestBuilder::from_config(&config.explain);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let tasks: Vec<(RiskScore, ExplainTask)> = ranked
            .iter()
            .map(|score| {
                let account_id = score.account_id.clone();
                let semaphore = semaphore.clone();
                let evidence = evidence.clone();
                let narrator = self.narrator.clone();
                let extractor = extractor.clone();
                let builder = builder.clone();

                let task: ExplainTask = tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| CycleWatchError::internal(Stage::Explain, e.to_string()))?;

                    // Source lookups may block on I/O.
                    let focal = account_id.clone();
                    let subgraph = tokio::task::spawn_blocking(move || extractor.extract(&*evidence, &focal))
                        .await
                        .map_err(|e| CycleWatchError::internal(Stage::Extract, e.to_string()))??;
                    let request = builder.build(&account_id, subgraph.as_ref())?;
                    let narrative = with_timeout(timeout, narrator.generate(&request.prompt)).await;
                    Ok::<_, CycleWatchError>(narrative)
                });
                (score.clone(), task)
            })
            .collect();

        let mut report = DetectionReport {
            ranked: ranked.to_vec(),
            records: Vec::with_capacity(ranked.len()),
            fallbacks: 0,
        };
        let mut pending = tasks.into_iter();
        let mut failure = None;

        for (score, task) in pending.by_ref() {
            let narrative = match task.await {
                Ok(Ok(Ok(text))) => text,
                Ok(Ok(Err(e))) => {
                    tracing::warn!(account_id = %score.account_id, error = %e, "narrative failed, using fallback");
                    report.fallbacks += 1;
                    config.narrative.fallback.clone()
                }
                Ok(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                Err(e) => {
                    tracing::warn!(account_id = %score.account_id, error = %e, "explanation task failed, using fallback");
                    report.fallbacks += 1;
                    config.narrative.fallback.clone()
                }
            };

            let record = ExplanationRecord {
                account_id: score.account_id.clone(),
                risk: score.risk,
                narrative,
            };
            writer.write(&record)?;
            tracing::info!(account_id = %record.account_id, risk = record.risk, "account explained");
            report.records.push(record);
        }

        if let Some(e) = failure {
            for (_, task) in pending {
                task.abort();
            }
            tracing::error!(stage = %e.stage(), error = %e, written = report.records.len(), "explanation batch aborted");
            return Err(e);
        }
        Ok(report)
    }

    /// Score, rank and explain, writing records to the configured
    /// explanations path.
    pub async fn detect<S>(&self, source: Arc<S>, artifact: &ModelArtifact) -> Result<DetectionReport>
    where
        S: GraphSource + EvidenceSource + 'static,
    {
        let span = self.ctx.span();
        async {
            let scored = self.score(&*source, artifact)?;
            let ranked = self.rank(&scored)?;
            tracing::info!(
                accounts = scored.graph.num_nodes(),
                ranked = ranked.len(),
                "accounts ranked"
            );

            let mut writer = ExplanationWriter::create(self.ctx.config().artifacts.explanations_path())?;
            let evidence: Arc<dyn EvidenceSource> = source;
            self.explain(evidence, &ranked, &mut writer).await
        }
        .instrument(span)
        .await
    }
}
