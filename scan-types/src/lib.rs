//! Shared data types for comparative single-cell analysis

/// Error taxonomy and per-unit exclusion records
pub mod error;

/// Gene x cell count matrix
pub mod matrix;

/// Per-cell metadata, cluster-label columns and embeddings
pub mod metadata;

pub use error::{Diagnostics, Exclusion, Result, ScanError};
pub use matrix::CountMatrix;
pub use metadata::{CellMetadata, ClusterKey, ClusterLabels, Embedding};
