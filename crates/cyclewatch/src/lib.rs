//! # cyclewatch
//!
//! Detection of circular money movement in transaction graphs.
//!
//! Accounts become nodes and transactions become directed edges. A two-layer
//! graph attention network scores every account's probability of taking
//! part in a cycle; the highest-risk accounts are explained with a bounded
//! evidence subgraph and an analyst narrative from an external language
//! model.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cyclewatch::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = CycleWatchConfig::from_env()?;
//!     let narrator = Arc::new(OllamaClient::new(config.narrative.clone())?);
//!     let pipeline = CycleWatchPipeline::new(PipelineContext::new(config), narrator);
//!
//!     let store = Arc::new(LedgerStore::from_json_file("ledger.json")?);
//!     let (_, artifact) = pipeline.train_and_save(&*store)?;
//!     let report = pipeline.detect(store, &artifact).await?;
//!
//!     for record in &report.records {
//!         println!("{} {:.3} {}", record.account_id, record.risk, record.narrative);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Crates
//!
//! - **core**: errors, configuration, logging, run context
//! - **graph**: ledger store, ingestion, features, evidence subgraphs
//! - **ml**: graph attention classifier, training, model artifacts
//! - **compliance**: ranking, narratives, the detect-and-explain pipeline

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use cyclewatch_compliance as compliance;
pub use cyclewatch_core as core;
pub use cyclewatch_graph as graph;
pub use cyclewatch_ml as ml;

/// Prelude for convenient imports.
pub mod prelude {
    pub use cyclewatch_compliance::prelude::*;
    pub use cyclewatch_core::prelude::*;
    pub use cyclewatch_graph::prelude::*;
    pub use cyclewatch_ml::prelude::*;
}
