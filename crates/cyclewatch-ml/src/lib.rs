//! # Cyclewatch ML
//!
//! Node classification for circular money-flow detection.
//!
//! ## Components
//!
//! - `CycleClassifier` - two-layer graph attention network
//! - `ModelTrainer` - full-batch training with Adam and closed-form gradients
//! - `project_cycle_labels` - account labels from labelled transactions
//! - `ModelArtifact` - atomic persistence with node ordering and feature list

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod attention;
pub mod classifier;
pub mod labels;
pub mod optimizer;
pub mod trainer;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::artifact::*;
    pub use crate::attention::{AttentionLayer, LayerParams, Neighborhoods};
    pub use crate::classifier::*;
    pub use crate::labels::*;
    pub use crate::optimizer::*;
    pub use crate::trainer::*;
}
