//! # Cyclewatch Compliance
//!
//! Turns classifier output into analyst-facing explanations.
//!
//! ## Components
//!
//! - `RiskRanker` - deterministic top-K selection
//! - `ExplanationRequestBuilder` - bounded fact payloads and analyst prompts
//! - `NarrativeService` / `OllamaClient` - external narrative generation
//! - `ExplanationWriter` - JSON Lines explanation records
//! - `CycleWatchPipeline` - train, score, rank and explain with per-account
//!   failure isolation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod explanation;
pub mod narrative;
pub mod pipeline;
pub mod ranker;
pub mod records;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::explanation::*;
    pub use crate::narrative::*;
    pub use crate::pipeline::*;
    pub use crate::ranker::*;
    pub use crate::records::*;
}
