//! # Cyclewatch Graph
//!
//! Account graph construction and graph-side evidence for circular flow
//! detection.
//!
//! ## Components
//!
//! - `LedgerStore` - in-memory transaction store behind the source traits
//! - `GraphIngestor` - deterministic account indexing and edge construction
//! - `FeatureBuilder` - structural per-node features (in/out degree, ...)
//! - `SubgraphExtractor` - bounded evidence neighborhoods around an account

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod features;
pub mod ingest;
pub mod records;
pub mod source;
pub mod subgraph;

// Common graph types
pub mod types;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::features::*;
    pub use crate::ingest::*;
    pub use crate::records::*;
    pub use crate::source::*;
    pub use crate::subgraph::*;
    pub use crate::types::*;
}
