//! Integration of two conditions into a shared embedding
//!
//! The two conditions are aligned through anchors: pairs of cells, one per condition, that are
//! mutual nearest neighbors in a shared canonical-correlation space. Each anchor carries a
//! displacement between the two conditions; cells of the query condition are moved by a
//! weighted blend of the displacements of their nearest anchors, while the reference condition
//! stays fixed.

use crate::config::{IntegrationConfig, IntegrationMethod};
use log::{info, warn};
use ndarray::{Array2, ArrayView2, Axis};
use scan_types::{Result, ScanError};
use serde::Serialize;

/// Mutual-nearest-neighbor search, filtering and scoring
pub mod anchors;

/// Canonical correlation between two scaled matrices
pub mod cca;

/// Anchor-weighted correction of an embedding
pub mod correct;

pub use anchors::Anchor;

/// Everything an integration strategy reads. Cell indices refer to rows of `embedding`.
#[derive(Clone, Debug)]
pub struct IntegrationInput<'a> {
    /// Name of the condition held fixed
    pub reference: String,
    /// Name of the condition that is corrected
    pub query: String,
    /// Rows of `embedding` belonging to the reference condition, in order
    pub reference_cells: &'a [usize],
    /// Rows of `embedding` belonging to the query condition, in order
    pub query_cells: &'a [usize],
    /// Scaled expression of the reference cells over the integration features, features x cells
    pub reference_scaled: ArrayView2<'a, f64>,
    /// Scaled expression of the query cells over the same features, features x cells
    pub query_scaled: ArrayView2<'a, f64>,
    /// Embedding of all cells to be corrected, cells x dims
    pub embedding: ArrayView2<'a, f64>,
}

impl IntegrationInput<'_> {
    fn validate(&self) -> Result<()> {
        if self.reference == self.query {
            return Err(ScanError::Config(format!(
                "reference and query are the same condition: {}",
                self.reference
            )));
        }
        if self.reference_scaled.nrows() != self.query_scaled.nrows() {
            return Err(ScanError::Data(format!(
                "mismatched gene universes: {} features in {} but {} in {}",
                self.reference_scaled.nrows(),
                self.reference,
                self.query_scaled.nrows(),
                self.query
            )));
        }
        if self.reference_scaled.ncols() != self.reference_cells.len()
            || self.query_scaled.ncols() != self.query_cells.len()
        {
            return Err(ScanError::Data("scaled matrices do not match the condition cell lists".into()));
        }
        if self.reference_cells.len() < 2 || self.query_cells.len() < 2 {
            return Err(ScanError::Data(format!(
                "integration needs at least 2 cells per condition, got {} and {}",
                self.reference_cells.len(),
                self.query_cells.len()
            )));
        }
        let n = self.embedding.nrows();
        if let Some(&c) = self.reference_cells.iter().chain(self.query_cells).find(|&&c| c >= n) {
            return Err(ScanError::Data(format!("cell index {c} is out of range for {n} cells")));
        }
        Ok(())
    }
}

/// Corrected embedding together with the anchors it was derived from.
#[derive(Clone, Debug, Serialize)]
pub struct IntegrationResult {
    /// Corrected coordinates, same shape and row order as the input embedding
    #[serde(skip)]
    pub embedding: Array2<f64>,
    /// Anchors used for the correction
    pub anchors: Vec<Anchor>,
    /// Too few anchors were found for the correction to be trusted
    pub low_confidence: bool,
    /// The condition that was held fixed
    pub reference: String,
    /// Canonical vectors actually used
    pub n_cc: usize,
}

/// An integration strategy
pub trait Integrator {
    /// Produce a shared embedding of both conditions
    fn integrate(&self, input: &IntegrationInput<'_>) -> Result<IntegrationResult>;
}

/// Canonical correlation + anchors
#[derive(Clone, Debug)]
pub struct CcaAnchors {
    /// Parameters
    pub config: IntegrationConfig,
    /// Seed of the randomized decomposition
    pub seed: u64,
}

impl Integrator for CcaAnchors {
    fn integrate(&self, input: &IntegrationInput<'_>) -> Result<IntegrationResult> {
        input.validate()?;
        let cfg = &self.config;

        let cc = cca::run_cca(&input.reference_scaled, &input.query_scaled, cfg.n_cc, self.seed)?;
        let n_ref = input.reference_cells.len();
        let cc_ref = cc.embedding.slice(ndarray::s![..n_ref, ..]);
        let cc_query = cc.embedding.slice(ndarray::s![n_ref.., ..]);

        let mut pairs = anchors::find_mnn(&cc_ref, &cc_query, cfg.k_anchor);
        let n_mnn = pairs.len();
        if let Some(k_filter) = cfg.k_filter {
            let ref_features = cca::l2_normalize(&input.reference_scaled.t());
            let query_features = cca::l2_normalize(&input.query_scaled.t());
            pairs = anchors::filter_anchors(pairs, &ref_features.view(), &query_features.view(), k_filter);
        }
        let local = anchors::score_anchors(&pairs, &cc_ref, &cc_query, cfg.k_score);

        // anchor indices from condition-local to embedding rows
        let anchors = local
            .into_iter()
            .map(|a| Anchor {
                reference_cell: input.reference_cells[a.reference_cell],
                query_cell: input.query_cells[a.query_cell],
                score: a.score,
            })
            .collect::<Vec<_>>();

        let low_confidence = anchors.is_empty() || anchors.len() < cfg.min_anchors;
        if low_confidence {
            warn!(
                "only {} anchors between {} and {} (minimum {}), integration is low confidence",
                anchors.len(),
                input.reference,
                input.query,
                cfg.min_anchors
            );
        }
        info!(
            "{} mutual nearest neighbors, {} anchors after filtering",
            n_mnn,
            anchors.len()
        );

        let embedding = correct::correct_embedding(
            &input.embedding,
            input.query_cells,
            &anchors,
            cfg.k_weight,
            cfg.sd_weight,
        );

        Ok(IntegrationResult {
            embedding,
            anchors,
            low_confidence,
            reference: input.reference.clone(),
            n_cc: cc.embedding.len_of(Axis(1)),
        })
    }
}

impl IntegrationMethod {
    /// The strategy implementing this method
    pub fn integrator(&self, config: &IntegrationConfig, seed: u64) -> impl Integrator {
        match self {
            IntegrationMethod::CcaAnchors => CcaAnchors {
                config: config.clone(),
                seed,
            },
        }
    }
}
