//! Per-cell QC metrics and the optional threshold filter

use crate::config::QcConfig;
use log::{info, warn};
use scan_types::CountMatrix;
use serde::Serialize;

/// QC metrics, one entry per cell
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QcMetrics {
    /// total raw counts
    pub total_counts: Vec<u64>,
    /// number of genes with a non-zero count
    pub n_features: Vec<u32>,
    /// 100 * mitochondrial counts / total counts; 0 for an empty cell
    pub percent_mito: Vec<f64>,
}

/// Indices of genes whose name (or id, when the name is empty) starts with `prefix`, ignoring case.
pub fn mito_genes(matrix: &CountMatrix, prefix: &str) -> Vec<usize> {
    let prefix = prefix.to_ascii_lowercase();
    matrix
        .gene_names
        .iter()
        .zip(&matrix.gene_ids)
        .enumerate()
        .filter(|(_, (name, id))| {
            let label = if name.is_empty() { id } else { name };
            label.to_ascii_lowercase().starts_with(&prefix)
        })
        .map(|(i, _)| i)
        .collect()
}

/// Compute detected genes, total counts and mitochondrial percentage of every cell.
pub fn compute_qc_metrics(matrix: &CountMatrix, mito_prefix: &str) -> QcMetrics {
    let mut is_mito = vec![false; matrix.n_genes()];
    let mito = mito_genes(matrix, mito_prefix);
    for &g in &mito {
        is_mito[g] = true;
    }
    if mito.is_empty() {
        warn!("no gene matches the mitochondrial prefix '{mito_prefix}'");
    }

    let mut metrics = QcMetrics::default();
    for col in matrix.counts().outer_iterator() {
        let mut total = 0u64;
        let mut mt = 0u64;
        for (g, &v) in col.iter() {
            total += v as u64;
            if is_mito[g] {
                mt += v as u64;
            }
        }
        metrics.total_counts.push(total);
        metrics.n_features.push(col.iter().filter(|(_, &v)| v > 0).count() as u32);
        metrics
            .percent_mito
            .push(if total > 0 { 100.0 * mt as f64 / total as f64 } else { 0.0 });
    }
    metrics
}

/// Threshold filter built from the QC options
#[derive(Clone, Debug, Default)]
pub struct QcFilter {
    min_features: Option<u32>,
    max_features: Option<u32>,
    min_counts: Option<u64>,
    max_percent_mito: Option<f64>,
}

impl From<&QcConfig> for QcFilter {
    fn from(c: &QcConfig) -> Self {
        QcFilter {
            min_features: c.min_features,
            max_features: c.max_features,
            min_counts: c.min_counts,
            max_percent_mito: c.max_percent_mito,
        }
    }
}

impl QcFilter {
    /// True if no threshold is set
    pub fn is_noop(&self) -> bool {
        self.min_features.is_none()
            && self.max_features.is_none()
            && self.min_counts.is_none()
            && self.max_percent_mito.is_none()
    }

    /// Indices of the cells passing every configured threshold, in order
    pub fn apply(&self, metrics: &QcMetrics) -> Vec<usize> {
        let keep = (0..metrics.total_counts.len())
            .filter(|&c| {
                let nf = metrics.n_features[c];
                self.min_features.map_or(true, |t| nf >= t)
                    && self.max_features.map_or(true, |t| nf <= t)
                    && self.min_counts.map_or(true, |t| metrics.total_counts[c] >= t)
                    && self.max_percent_mito.map_or(true, |t| metrics.percent_mito[c] <= t)
            })
            .collect::<Vec<_>>();

        if !self.is_noop() {
            info!("qc filter kept {} of {} cells", keep.len(), metrics.total_counts.len());
        }
        keep
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn matrix() -> CountMatrix {
        let genes = ["MT-CO1", "mt-Nd1", "ACTB", "GAPDH"].map(String::from).to_vec();
        let cells = ["c0", "c1", "c2"].map(String::from).to_vec();
        CountMatrix::from_dense(genes, cells, &array![[10, 0, 0], [10, 1, 0], [30, 9, 0], [50, 0, 0]]).unwrap()
    }

    #[test]
    fn test_qc_metrics() {
        let m = compute_qc_metrics(&matrix(), "MT-");
        assert_eq!(m.total_counts, vec![100, 10, 0]);
        assert_eq!(m.n_features, vec![4, 2, 0]);
        assert_eq!(m.percent_mito, vec![20.0, 10.0, 0.0]);
    }

    #[test]
    fn test_default_filter_keeps_everything() {
        let m = compute_qc_metrics(&matrix(), "MT-");
        let f = QcFilter::from(&QcConfig::default());
        assert!(f.is_noop());
        assert_eq!(f.apply(&m), vec![0, 1, 2]);
    }

    #[test]
    fn test_thresholds() {
        let m = compute_qc_metrics(&matrix(), "MT-");
        let f = QcFilter::from(&QcConfig {
            min_counts: Some(1),
            max_percent_mito: Some(15.0),
            ..QcConfig::default()
        });
        assert_eq!(f.apply(&m), vec![1]);
    }
}
