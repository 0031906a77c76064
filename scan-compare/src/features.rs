//! Variable feature selection
//!
//! The variance-stabilizing (vst) selection fits log10(variance) against log10(mean) with a
//! loess curve, standardizes every gene by its expected variance, clips the standardized
//! values at `sqrt(n_cells)`, and ranks genes by the variance of the clipped values.

use crate::loess::Loess;
use itertools::Itertools;
use log::info;
use rayon::prelude::*;
use scan_types::{CountMatrix, Exclusion, ScanError};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

const STAGE: &str = "find_variable_features";

/// Mean-variance statistics of one gene
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeneVst {
    /// mean raw count
    pub mean: f64,
    /// sample variance of the raw counts
    pub variance: f64,
    /// variance predicted by the mean-variance fit
    pub variance_expected: f64,
    /// variance of the standardized, clipped counts
    pub variance_standardized: f64,
}

/// Result of the vst selection
#[derive(Clone, Debug)]
pub struct VariableFeatures {
    /// Selected genes (row indices), most variable first
    pub features: Vec<usize>,
    /// Statistics of every gene, in row order
    pub stats: Vec<GeneVst>,
    /// Genes that could not be ranked
    pub exclusions: Vec<Exclusion>,
}

impl VariableFeatures {
    /// Gene ids of the selected features, most variable first
    pub fn feature_ids(&self, gene_ids: &[String]) -> Vec<String> {
        self.features.iter().map(|&g| gene_ids[g].clone()).collect()
    }
}

/// Select the `n_features` most variable genes of `matrix` with the vst method.
///
/// Ties in standardized variance are broken by gene id, then by row index, so the ranking is
/// fully deterministic.
pub fn find_variable_features(matrix: &CountMatrix, n_features: usize, span: f64) -> VariableFeatures {
    let n_genes = matrix.n_genes();
    let n_cells = matrix.n_cells();
    let n = n_cells as f64;

    // per-gene sums from the column-compressed counts
    let mut sum = vec![0.0; n_genes];
    let mut sum_sq = vec![0.0; n_genes];
    for col in matrix.counts().outer_iterator() {
        for (g, &v) in col.iter() {
            let v = v as f64;
            sum[g] += v;
            sum_sq[g] += v * v;
        }
    }
    let mean = sum.iter().map(|s| s / n.max(1.0)).collect::<Vec<_>>();
    let variance = (0..n_genes)
        .map(|g| {
            if n_cells < 2 {
                0.0
            } else {
                ((sum_sq[g] - n * mean[g] * mean[g]) / (n - 1.0)).max(0.0)
            }
        })
        .collect::<Vec<_>>();

    let log_mean = (0..n_genes)
        .map(|g| if variance[g] > 0.0 { mean[g].log10() } else { f64::NAN })
        .collect::<Vec<_>>();
    let log_var = variance
        .iter()
        .map(|&v| if v > 0.0 { v.log10() } else { f64::NAN })
        .collect::<Vec<_>>();
    let fitted = Loess::new(span, 2).fit(&log_mean, &log_var);
    let expected = fitted.iter().map(|f| 10f64.powf(*f)).collect::<Vec<_>>();

    // standardized variance, accumulated over non-zero entries; zeros contribute (mean / sd)^2
    let clip = n.sqrt();
    let mut std_sq = vec![0.0; n_genes];
    let mut nnz = vec![0usize; n_genes];
    for col in matrix.counts().outer_iterator() {
        for (g, &v) in col.iter() {
            let sd = expected[g].sqrt();
            if sd > 0.0 && sd.is_finite() {
                let z = ((v as f64 - mean[g]) / sd).min(clip);
                std_sq[g] += z * z;
            }
            nnz[g] += 1;
        }
    }

    let mut exclusions = Vec::new();
    let stats = (0..n_genes)
        .map(|g| {
            let sd = expected[g].sqrt();
            let variance_standardized = if variance[g] > 0.0 && sd > 0.0 && sd.is_finite() && n_cells > 1 {
                let z0 = (mean[g] / sd).min(clip);
                (std_sq[g] + (n_cells - nnz[g]) as f64 * z0 * z0) / (n - 1.0)
            } else {
                let reason = if variance[g] > 0.0 {
                    "mean-variance fit undefined"
                } else {
                    "zero variance"
                };
                let err = ScanError::Numerical(reason.into());
                exclusions.push(Exclusion::new(STAGE, matrix.gene_ids[g].clone(), &err));
                0.0
            };
            GeneVst {
                mean: mean[g],
                variance: variance[g],
                variance_expected: if variance[g] > 0.0 { expected[g] } else { 0.0 },
                variance_standardized,
            }
        })
        .collect::<Vec<_>>();

    let excluded = exclusions.len();
    let mut ranked = (0..n_genes)
        .filter(|&g| stats[g].variance_standardized > 0.0)
        .collect::<Vec<_>>();
    ranked.par_sort_by(|&a, &b| {
        stats[b]
            .variance_standardized
            .total_cmp(&stats[a].variance_standardized)
            .then_with(|| matrix.gene_ids[a].cmp(&matrix.gene_ids[b]))
            .then(a.cmp(&b))
    });
    ranked.truncate(n_features);

    info!(
        "selected {} variable features of {} genes ({} not rankable)",
        ranked.len(),
        n_genes,
        excluded
    );
    VariableFeatures {
        features: ranked,
        stats,
        exclusions,
    }
}

/// Choose features shared by the per-condition selections.
///
/// Genes are ordered by the number of selections they appear in (descending), then by their
/// median rank over those selections, then by gene id. Only genes in `universe` are eligible.
pub fn select_integration_features(rankings: &[Vec<String>], universe: &[String], n: usize) -> Vec<String> {
    let universe = universe.iter().collect::<std::collections::HashSet<_>>();
    let mut ranks: BTreeMap<&String, Vec<f64>> = BTreeMap::new();
    for ranking in rankings {
        for (r, gene) in ranking.iter().enumerate() {
            if universe.contains(gene) {
                ranks.entry(gene).or_default().push(r as f64);
            }
        }
    }

    ranks
        .into_iter()
        .map(|(gene, mut r)| {
            let count = r.len();
            let median = crate::stats::median_mut(&mut r).unwrap_or(f64::INFINITY);
            (gene, count, median)
        })
        .sorted_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal))
                .then_with(|| a.0.cmp(b.0))
        })
        .take(n)
        .map(|(g, _, _)| g.clone())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Poisson};
    use rand_pcg::Pcg64Mcg;

    /// 60 genes of Poisson noise at increasing means, plus genes 0..5 made bimodal
    fn matrix(seed: u64) -> CountMatrix {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let (n_genes, n_cells) = (60, 200);
        let mut dense = Array2::<u32>::zeros((n_genes, n_cells));
        for g in 0..n_genes {
            let lambda = 0.2 + g as f64 * 0.1;
            for c in 0..n_cells {
                let lambda = if g < 5 && c % 2 == 0 { lambda * 20.0 } else { lambda };
                dense[[g, c]] = Poisson::new(lambda).unwrap().sample(&mut rng) as u32;
            }
        }
        let genes = (0..n_genes).map(|g| format!("G{g:02}")).collect();
        let cells = (0..n_cells).map(|c| format!("c{c}")).collect();
        CountMatrix::from_dense(genes, cells, &dense).unwrap()
    }

    #[test]
    fn test_finds_bimodal_genes() {
        let m = matrix(0);
        let vf = find_variable_features(&m, 5, 0.3);
        let mut top = vf.features.clone();
        top.sort();
        assert_eq!(top, vec![0, 1, 2, 3, 4]);
        assert!(vf.exclusions.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let m = matrix(1);
        let a = find_variable_features(&m, 20, 0.3);
        let b = find_variable_features(&m, 20, 0.3);
        assert_eq!(a.features, b.features);
        assert_eq!(a.stats, b.stats);
    }

    #[test]
    fn test_constant_genes_excluded() {
        let mut dense = Array2::<u32>::from_elem((3, 4), 2);
        dense[[0, 0]] = 7;
        dense[[2, 1]] = 0;
        let genes = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let cells = (0..4).map(|c| format!("c{c}")).collect();
        let m = CountMatrix::from_dense(genes, cells, &dense).unwrap();

        let vf = find_variable_features(&m, 10, 1.0);
        assert_eq!(vf.exclusions.len(), 1);
        assert_eq!(vf.exclusions[0].unit, "B");
        assert!(!vf.features.contains(&1));
        assert_eq!(vf.features.len(), 2);
    }

    #[test]
    fn test_integration_features() {
        let a = ["g1", "g2", "g3", "g4"].map(String::from).to_vec();
        let b = ["g3", "g5", "g1", "g9"].map(String::from).to_vec();
        let universe = ["g1", "g2", "g3", "g4", "g5"].map(String::from).to_vec();

        let sel = select_integration_features(&[a, b], &universe, 4);
        // g1 (ranks 0, 2) and g3 (ranks 2, 0) tie on median 1 and are ordered by id;
        // then singletons by rank: g2 (1) and g5 (1) by id
        assert_eq!(sel, vec!["g1", "g3", "g2", "g5"]);
    }
}
