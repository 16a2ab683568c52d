//! Pipeline context.
//!
//! One `PipelineContext` is built per run and handed to every stage, so no
//! stage keeps lazily initialized global state.

use crate::config::CycleWatchConfig;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Shared, read-only state of a single pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    config: Arc<CycleWatchConfig>,
}

impl PipelineContext {
    /// Create a context for a new run.
    pub fn new(config: CycleWatchConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            config: Arc::new(config),
        }
    }

    /// Identifier attached to every log event of the run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wall-clock start of the run.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Run configuration.
    pub fn config(&self) -> &CycleWatchConfig {
        &self.config
    }

    /// A `tracing` span carrying the run id.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("cyclewatch", run_id = %self.run_id)
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new(CycleWatchConfig::default())
    }
}
