//! Differential expression between two groups of cells
//!
//! Genes are pre-filtered on the fraction of expressing cells and on a fold change computed from
//! linear-scale means, tested in parallel, adjusted for multiple testing and sorted.

use crate::dist::{AdjustMethod, TestMethod};
use log::debug;
use rayon::prelude::*;
use scan_types::{Exclusion, Result, ScanError};
use serde::{Deserialize, Serialize};
use sprs::CsMat;
use std::cmp::Ordering;

const STAGE: &str = "compare_groups";

/// Parameters of a two-group comparison
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeParams {
    /// Statistical test
    pub test_method: TestMethod,
    /// Only test genes expressed in at least this fraction of cells of either group
    pub min_pct: f64,
    /// Only test genes with |log2 fold change| at least this large
    pub min_log_fc: f64,
    /// Only report genes higher in the first group
    pub only_positive: bool,
    /// Multiple testing correction
    pub adjust_method: AdjustMethod,
    /// Added to linear-scale means before taking log2
    pub pseudocount: f64,
    /// Groups smaller than this are not tested
    pub min_cells_group: usize,
}

impl Default for DeParams {
    fn default() -> Self {
        DeParams {
            test_method: TestMethod::Wilcoxon,
            min_pct: 0.1,
            min_log_fc: 0.25,
            only_positive: false,
            adjust_method: AdjustMethod::Bonferroni,
            pseudocount: 1.0,
            min_cells_group: 2,
        }
    }
}

impl DeParams {
    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_pct) {
            return Err(ScanError::Config(format!("min_pct must be in [0, 1], got {}", self.min_pct)));
        }
        if !(self.min_log_fc >= 0.0) {
            return Err(ScanError::Config(format!("min_log_fc must be >= 0, got {}", self.min_log_fc)));
        }
        if !(self.pseudocount > 0.0) {
            return Err(ScanError::Config(format!("pseudocount must be > 0, got {}", self.pseudocount)));
        }
        if self.min_cells_group < 2 {
            return Err(ScanError::Config(format!(
                "min_cells_group must be at least 2, got {}",
                self.min_cells_group
            )));
        }
        Ok(())
    }
}

/// One tested gene
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeRow {
    /// gene id
    pub gene: String,
    /// cluster of origin, when aggregated over clusters
    pub cluster: Option<String>,
    /// condition or comparison of origin, when aggregated over conditions
    pub condition: Option<String>,
    /// mean expression in group 1, linear scale
    pub mean_1: f64,
    /// mean expression in group 2, linear scale
    pub mean_2: f64,
    /// log2(mean_1 + pseudocount) - log2(mean_2 + pseudocount)
    pub log2_fold_change: f64,
    /// fraction of group 1 cells with non-zero expression
    pub pct_1: f64,
    /// fraction of group 2 cells with non-zero expression
    pub pct_2: f64,
    /// raw p-value
    pub p_value: f64,
    /// adjusted p-value
    pub adj_p_value: f64,
}

/// Result of a comparison: sorted rows, plus the units that could not be tested
#[derive(Clone, Debug, Default)]
pub struct DeTable {
    /// Tested genes, by adjusted p-value then decreasing |log2 fold change|
    pub rows: Vec<DeRow>,
    /// Genes or groups left out, with the reason
    pub exclusions: Vec<Exclusion>,
}

impl DeTable {
    /// Tag every row with a cluster
    pub fn with_cluster(mut self, cluster: &str) -> Self {
        for r in self.rows.iter_mut() {
            r.cluster = Some(cluster.to_string());
        }
        self
    }

    /// Tag every row with a condition
    pub fn with_condition(mut self, condition: &str) -> Self {
        for r in self.rows.iter_mut() {
            r.condition = Some(condition.to_string());
        }
        self
    }
}

enum GeneOutcome {
    Tested(DeRow),
    Filtered,
    Excluded(Exclusion),
}

/// Canonical order of result rows: adjusted p ascending, |log2 fold change| descending, gene id.
pub fn cmp_rows(a: &DeRow, b: &DeRow) -> Ordering {
    a.adj_p_value
        .total_cmp(&b.adj_p_value)
        .then_with(|| b.log2_fold_change.abs().total_cmp(&a.log2_fold_change.abs()))
        .then_with(|| a.gene.cmp(&b.gene))
}

/// Compare `group1` against `group2` (column indices into `matrix`).
///
/// `matrix` holds log-normalized expression, genes x cells, row-compressed. Too-small groups
/// produce an empty table with a recorded exclusion rather than an error; invalid inputs
/// (wrong storage, out of range cells) are errors.
pub fn compare_groups(
    gene_ids: &[String],
    matrix: &CsMat<f64>,
    group1: &[usize],
    group2: &[usize],
    params: &DeParams,
) -> Result<DeTable> {
    params.validate()?;
    if !matrix.is_csr() {
        return Err(ScanError::Data("expression matrix must be row-compressed (genes as rows)".into()));
    }
    if matrix.rows() != gene_ids.len() {
        return Err(ScanError::Data(format!(
            "expression matrix has {} rows but {} gene ids",
            matrix.rows(),
            gene_ids.len()
        )));
    }
    let n_cells = matrix.cols();
    if let Some(&c) = group1.iter().chain(group2.iter()).find(|&&c| c >= n_cells) {
        return Err(ScanError::Data(format!("cell index {c} out of range for {n_cells} cells")));
    }

    let mut table = DeTable::default();
    for (name, group) in [("group 1", group1), ("group 2", group2)] {
        if group.len() < params.min_cells_group {
            let err = ScanError::StatisticalTest(format!(
                "{} cells in {name}, at least {} required",
                group.len(),
                params.min_cells_group
            ));
            table.exclusions.push(Exclusion::new(STAGE, name, &err));
        }
    }
    if !table.exclusions.is_empty() {
        return Ok(table);
    }

    // a cell listed in both groups contributes to both buffers
    let outcomes = matrix
        .outer_iterator()
        .enumerate()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map_init(
            || (vec![0.0; n_cells], vec![0.0; group1.len()], vec![0.0; group2.len()]),
            |(dense, x1, x2), (g, row)| {
                for (c, &v) in row.iter() {
                    dense[c] = v;
                }
                for (x, &c) in x1.iter_mut().zip(group1) {
                    *x = dense[c];
                }
                for (x, &c) in x2.iter_mut().zip(group2) {
                    *x = dense[c];
                }
                for (c, _) in row.iter() {
                    dense[c] = 0.0;
                }
                test_gene(&gene_ids[g], &x1[..], &x2[..], params)
            },
        )
        .collect::<Vec<_>>();

    let mut filtered = 0;
    for outcome in outcomes {
        match outcome {
            GeneOutcome::Tested(row) => table.rows.push(row),
            GeneOutcome::Filtered => filtered += 1,
            GeneOutcome::Excluded(e) => table.exclusions.push(e),
        }
    }

    let p_values = table.rows.iter().map(|r| r.p_value).collect::<Vec<_>>();
    for (row, adj) in table.rows.iter_mut().zip(params.adjust_method.adjust(&p_values)) {
        row.adj_p_value = adj;
    }
    table.rows.sort_by(cmp_rows);

    debug!(
        "{} vs {} cells: {} genes tested, {} filtered, {} excluded",
        group1.len(),
        group2.len(),
        table.rows.len(),
        filtered,
        table.exclusions.len()
    );
    Ok(table)
}

fn test_gene(gene: &str, x1: &[f64], x2: &[f64], params: &DeParams) -> GeneOutcome {
    let pct = |x: &[f64]| x.iter().filter(|&&v| v > 0.0).count() as f64 / x.len() as f64;
    let (pct_1, pct_2) = (pct(x1), pct(x2));
    if pct_1.max(pct_2) < params.min_pct {
        return GeneOutcome::Filtered;
    }

    // average on the linear scale to avoid log-scale averaging bias
    let linear_mean = |x: &[f64]| x.iter().map(|v| v.exp_m1()).sum::<f64>() / x.len() as f64;
    let (mean_1, mean_2) = (linear_mean(x1), linear_mean(x2));
    let log2_fold_change = (mean_1 + params.pseudocount).log2() - (mean_2 + params.pseudocount).log2();

    if !log2_fold_change.is_finite() {
        let err = ScanError::StatisticalTest("non-finite fold change".into());
        return GeneOutcome::Excluded(Exclusion::new(STAGE, gene, &err));
    }
    if log2_fold_change.abs() < params.min_log_fc || (params.only_positive && log2_fold_change <= 0.0) {
        return GeneOutcome::Filtered;
    }

    match params.test_method.p_value(x1, x2) {
        Ok(p_value) => GeneOutcome::Tested(DeRow {
            gene: gene.to_string(),
            cluster: None,
            condition: None,
            mean_1,
            mean_2,
            log2_fold_change,
            pct_1,
            pct_2,
            p_value,
            adj_p_value: p_value,
        }),
        Err(err) => GeneOutcome::Excluded(Exclusion::new(STAGE, gene, &err)),
    }
}
