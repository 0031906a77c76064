//! # scan-compare: comparative single-cell analysis of two conditions
//!
//! Merges a control and a stimulated count matrix, runs QC, normalization, variable feature
//! selection, PCA and graph clustering, aligns the conditions with CCA anchors and compares
//! them with differential expression. [`pipeline::run_comparative_analysis`] runs everything.

#![deny(missing_docs)]

/// Graph-based clustering
pub mod cluster;

/// Run parameters
pub mod config;

/// Analysis state
pub mod context;

/// Dimensionality reduction methods
pub mod dim_red;

/// Variable feature selection
pub mod features;

/// Alignment of two conditions
pub mod integrate;

/// Local regression
pub mod loess;

/// Nearest neighbors and shared-neighbor graphs
pub mod nn;

/// Count matrix normalization and scaling
pub mod normalization;

/// Stage orchestration
pub mod pipeline;

/// Per-cell quality metrics
pub mod qc;

pub mod stats;

pub use config::{AnalysisConfig, IntegrationConfig, IntegrationMethod, QcConfig};
pub use context::AnalysisContext;
pub use pipeline::{run_comparative_analysis, ComparativeReport, DeReport};
