//! Differential expression for single-cell data: two-group comparisons, per-cluster markers
//! and markers conserved across conditions.

/// two-group comparison
#[allow(clippy::module_inception)]
pub mod diff_exp;
/// statistical tests and multiple testing correction
pub mod dist;
/// cluster markers
pub mod markers;
/// statistics extension
pub mod stat;

pub use crate::diff_exp::{compare_groups, DeParams, DeRow, DeTable};
pub use crate::dist::{AdjustMethod, TestMethod};
pub use crate::markers::{all_markers, condition_de_per_cluster, conserved_markers, ConservedRow, ConservedTable};
