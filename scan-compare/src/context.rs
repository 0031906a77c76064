//! State threaded through the stages of an analysis run

use crate::dim_red::PcaOutcome;
use crate::features::VariableFeatures;
use crate::integrate::IntegrationResult;
use crate::nn::NeighborGraph;
use crate::normalization::{NormalizedMatrix, ScaledData};
use crate::qc::QcMetrics;
use log::warn;
use scan_types::{CellMetadata, CountMatrix, Diagnostics, Embedding, Result, ScanError};
use std::collections::BTreeMap;

/// Name of the principal component embedding
pub const PCA: &str = "pca";

/// Name of the corrected embedding
pub const INTEGRATED: &str = "integrated";

/// Everything computed so far for the two merged conditions.
///
/// Each stage reads the slots it depends on and fills its own. Reading a slot that has not been
/// filled yet is a `DataError` naming the missing slot.
#[derive(Debug)]
pub struct AnalysisContext {
    /// Merged raw counts, condition-prefixed cell ids
    pub counts: CountMatrix,
    /// Per-cell annotations, aligned with the columns of `counts`
    pub metadata: CellMetadata,
    /// Label of the first (control) condition
    pub ctrl_label: String,
    /// Label of the second (stimulated) condition
    pub stim_label: String,
    /// Log-normalized expression
    pub normalized: Option<NormalizedMatrix>,
    /// Variable features of the merged matrix
    pub variable_features: Option<VariableFeatures>,
    /// Scaled variable features
    pub scaled: Option<ScaledData>,
    /// Principal components, with loadings and variance
    pub pca: Option<PcaOutcome>,
    /// Features shared by the per-condition selections
    pub integration_features: Option<Vec<String>>,
    /// Anchors and corrected embedding
    pub integration: Option<IntegrationResult>,
    /// Named embeddings
    pub embeddings: BTreeMap<String, Embedding>,
    /// Neighbor graphs, keyed by the embedding they were built on
    pub graphs: BTreeMap<String, NeighborGraph>,
    /// Exclusions and warnings of every stage
    pub diagnostics: Diagnostics,
}

fn missing(slot: &str) -> ScanError {
    ScanError::Data(format!("{slot} has not been computed yet"))
}

impl AnalysisContext {
    /// Merge the two conditions into a fresh context.
    pub fn new(ctrl: &CountMatrix, ctrl_label: &str, stim: &CountMatrix, stim_label: &str) -> Result<AnalysisContext> {
        let (counts, conditions) = CountMatrix::merge(ctrl, ctrl_label, stim, stim_label)?;
        if counts.n_cells() == 0 || counts.n_genes() == 0 {
            return Err(ScanError::Data(format!(
                "empty matrix after merge: {} genes x {} cells",
                counts.n_genes(),
                counts.n_cells()
            )));
        }
        let metadata = CellMetadata::new(counts.cell_ids.clone(), conditions)?;
        Ok(AnalysisContext {
            counts,
            metadata,
            ctrl_label: ctrl_label.to_string(),
            stim_label: stim_label.to_string(),
            normalized: None,
            variable_features: None,
            scaled: None,
            pca: None,
            integration_features: None,
            integration: None,
            embeddings: BTreeMap::new(),
            graphs: BTreeMap::new(),
            diagnostics: Diagnostics::default(),
        })
    }

    /// Store QC metrics in the metadata columns
    pub fn set_qc(&mut self, qc: QcMetrics) {
        self.metadata.total_counts = qc.total_counts;
        self.metadata.n_features = qc.n_features;
        self.metadata.percent_mito = qc.percent_mito;
    }

    /// Restrict the context to the given cells. Only valid before normalization, as every
    /// later slot is indexed by cell.
    pub fn retain_cells(&mut self, cells: &[usize]) -> Result<()> {
        if self.normalized.is_some() {
            return Err(ScanError::Data("cells cannot be removed after normalization".into()));
        }
        if cells.is_empty() {
            return Err(ScanError::Data("no cells left after filtering".into()));
        }
        self.counts = self.counts.select_cells(cells);
        self.metadata = self.metadata.select_cells(cells);
        Ok(())
    }

    /// Log-normalized expression
    pub fn normalized(&self) -> Result<&NormalizedMatrix> {
        self.normalized.as_ref().ok_or_else(|| missing("normalized expression"))
    }

    /// Variable features of the merged matrix
    pub fn variable_features(&self) -> Result<&VariableFeatures> {
        self.variable_features.as_ref().ok_or_else(|| missing("variable features"))
    }

    /// Scaled variable features
    pub fn scaled(&self) -> Result<&ScaledData> {
        self.scaled.as_ref().ok_or_else(|| missing("scaled data"))
    }

    /// Embedding stored under `name`
    pub fn embedding(&self, name: &str) -> Result<&Embedding> {
        self.embeddings
            .get(name)
            .ok_or_else(|| missing(&format!("embedding '{name}'")))
    }

    /// Neighbor graph built on the embedding `name`
    pub fn graph(&self, name: &str) -> Result<&NeighborGraph> {
        self.graphs
            .get(name)
            .ok_or_else(|| missing(&format!("neighbor graph on '{name}'")))
    }

    /// Store an embedding under its name, replacing any previous one
    pub fn add_embedding(&mut self, embedding: Embedding) -> Result<()> {
        if embedding.n_cells() != self.metadata.n_cells() {
            return Err(ScanError::Data(format!(
                "embedding '{}' has {} rows for {} cells",
                embedding.name,
                embedding.n_cells(),
                self.metadata.n_cells()
            )));
        }
        if self.embeddings.contains_key(&embedding.name) {
            warn!("replacing embedding '{}'", embedding.name);
        }
        self.embeddings.insert(embedding.name.clone(), embedding);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{array, Array2};

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    fn context() -> AnalysisContext {
        let ctrl = CountMatrix::from_dense(ids("G", 2), ids("AAC-", 2), &array![[1, 2], [3, 4]]).unwrap();
        let stim = CountMatrix::from_dense(ids("G", 2), ids("AAC-", 2), &array![[5, 6], [7, 8]]).unwrap();
        AnalysisContext::new(&ctrl, "CTRL", &stim, "STIM").unwrap()
    }

    #[test]
    fn test_merge_prefixes_ids() {
        let ctx = context();
        assert_eq!(ctx.metadata.cell_ids, vec!["CTRL_AAC-0", "CTRL_AAC-1", "STIM_AAC-0", "STIM_AAC-1"]);
        assert_eq!(ctx.metadata.condition_levels(), vec!["CTRL", "STIM"]);
    }

    #[test]
    fn test_unfilled_slots() {
        let ctx = context();
        assert!(matches!(ctx.normalized(), Err(ScanError::Data(_))));
        assert!(matches!(ctx.embedding(PCA), Err(ScanError::Data(_))));
        assert!(matches!(ctx.graph(INTEGRATED), Err(ScanError::Data(_))));
    }

    #[test]
    fn test_add_embedding_checks_rows() {
        let mut ctx = context();
        let bad = Embedding {
            name: PCA.into(),
            source: "test".into(),
            coords: Array2::zeros((3, 2)),
            stdev: None,
        };
        assert!(ctx.add_embedding(bad).is_err());
        let good = Embedding {
            name: PCA.into(),
            source: "test".into(),
            coords: Array2::zeros((4, 2)),
            stdev: None,
        };
        ctx.add_embedding(good).unwrap();
        assert_eq!(ctx.embedding(PCA).unwrap().dims(), 2);
    }

    #[test]
    fn test_retain_cells() {
        let mut ctx = context();
        ctx.retain_cells(&[1, 2]).unwrap();
        assert_eq!(ctx.counts.n_cells(), 2);
        assert_eq!(ctx.metadata.conditions, vec!["CTRL", "STIM"]);
        assert!(ctx.retain_cells(&[]).is_err());
    }
}
