//! # cyclewatch Core
//!
//! Shared foundations for the cyclewatch circular-flow detection pipeline.
//!
//! This crate provides:
//! - The error taxonomy and stage reporting
//! - Run configuration (TOML + environment overrides)
//! - Logging initialization
//! - Timeout helpers for external calls
//! - The per-run `PipelineContext`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod error;
pub mod observability;
pub mod resilience;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        AlignmentPolicy, ArtifactConfig, CycleWatchConfig, ExplainConfig, FeatureConfig,
        FeatureKind, IngestConfig, ModelConfig, NarrativeConfig, TrainingConfig,
        UnknownAccountPolicy,
    };
    pub use crate::context::PipelineContext;
    pub use crate::error::{CycleWatchError, Result, Stage};
    pub use crate::observability::{LogConfig, LogLevel};
    pub use crate::resilience::with_timeout;
}
