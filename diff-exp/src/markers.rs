//! Marker tables built from repeated two-group comparisons

use crate::diff_exp::{compare_groups, DeParams, DeRow, DeTable};
use log::info;
use rayon::prelude::*;
use scan_types::{Exclusion, Result, ScanError};
use serde::Serialize;
use sprs::CsMat;
use std::collections::{BTreeMap, BTreeSet};

/// Markers of every cluster against all other cells.
///
/// Clusters are tested in parallel; the rows are concatenated by increasing cluster id, each
/// cluster keeping the order of [`compare_groups`].
pub fn all_markers(
    gene_ids: &[String],
    matrix: &CsMat<f64>,
    labels: &[usize],
    params: &DeParams,
) -> Result<DeTable> {
    check_labels(matrix, labels.len())?;
    let clusters = labels.iter().copied().collect::<BTreeSet<_>>();

    let tables = clusters
        .par_iter()
        .map(|&cluster| {
            let (inside, outside) = split(labels.iter().map(|&l| l == cluster));
            compare_groups(gene_ids, matrix, &inside, &outside, params).map(|t| tag_cluster(t, cluster))
        })
        .collect::<Result<Vec<_>>>()?;

    let table = concat(tables);
    info!("markers for {} clusters: {} rows", clusters.len(), table.rows.len());
    Ok(table)
}

/// A gene tested in every group, with the statistics of each group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConservedRow {
    /// gene id
    pub gene: String,
    /// cluster the markers were computed for
    pub cluster: String,
    /// per group result of the cluster vs rest comparison
    pub per_group: BTreeMap<String, DeRow>,
    /// largest adjusted p-value over the groups
    pub max_adj_p_value: f64,
    /// minimum p-value over the groups, corrected for the number of groups: 1 - (1 - min p)^k
    pub min_p_value: f64,
}

/// Conserved marker rows and the groups or genes that were left out
#[derive(Clone, Debug, Default)]
pub struct ConservedTable {
    /// Rows sorted by max adjusted p-value, then gene id
    pub rows: Vec<ConservedRow>,
    /// Exclusions recorded by the per-group comparisons
    pub exclusions: Vec<Exclusion>,
}

/// Markers of `cluster` that hold within every level of `grouping` (e.g. each condition).
///
/// Cluster vs rest is tested separately inside each group. Groups whose cluster or rest is too
/// small are recorded as exclusions and do not take part; a gene is reported only if it was
/// tested in every remaining group. The combined statistic only depends on the set of groups.
pub fn conserved_markers(
    gene_ids: &[String],
    matrix: &CsMat<f64>,
    labels: &[usize],
    cluster: usize,
    grouping: &[String],
    params: &DeParams,
) -> Result<ConservedTable> {
    check_labels(matrix, labels.len())?;
    if grouping.len() != labels.len() {
        return Err(ScanError::Data(format!(
            "{} grouping values for {} cells",
            grouping.len(),
            labels.len()
        )));
    }
    if !labels.contains(&cluster) {
        return Err(ScanError::Data(format!("cluster {cluster} has no cells")));
    }

    let levels = grouping.iter().cloned().collect::<BTreeSet<_>>();
    let per_level = levels
        .par_iter()
        .map(|level| {
            let (inside, outside) = split(
                labels
                    .iter()
                    .zip(grouping)
                    .filter(|(_, g)| *g == level)
                    .map(|(&l, _)| l == cluster),
            );
            // indices above are relative to the level's cells
            let cells = (0..labels.len()).filter(|&c| &grouping[c] == level).collect::<Vec<_>>();
            let inside = inside.into_iter().map(|i| cells[i]).collect::<Vec<_>>();
            let outside = outside.into_iter().map(|i| cells[i]).collect::<Vec<_>>();
            compare_groups(gene_ids, matrix, &inside, &outside, params).map(|t| (level.clone(), t))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut result = ConservedTable::default();
    let mut tested: Vec<(String, BTreeMap<String, DeRow>)> = Vec::new();
    for (level, table) in per_level {
        let untestable = table.rows.is_empty()
            && table.exclusions.iter().any(|e| e.unit == "group 1" || e.unit == "group 2");
        result.exclusions.extend(table.exclusions.into_iter().map(|mut e| {
            e.unit = format!("{level}/{}", e.unit);
            e
        }));
        if untestable {
            continue;
        }
        let rows = table
            .rows
            .into_iter()
            .map(|mut r| {
                r.cluster = Some(cluster.to_string());
                r.condition = Some(level.clone());
                (r.gene.clone(), r)
            })
            .collect();
        tested.push((level, rows));
    }

    if tested.is_empty() {
        return Ok(result);
    }

    let k = tested.len() as i32;
    let genes = tested[0].1.keys().cloned().collect::<Vec<_>>();
    for gene in genes {
        let mut per_group = BTreeMap::new();
        for (level, rows) in &tested {
            if let Some(row) = rows.get(&gene) {
                per_group.insert(level.clone(), row.clone());
            }
        }
        if per_group.len() != tested.len() {
            continue;
        }
        let max_adj_p_value = per_group.values().map(|r| r.adj_p_value).fold(0.0, f64::max);
        let min_p = per_group.values().map(|r| r.p_value).fold(1.0, f64::min);
        result.rows.push(ConservedRow {
            gene,
            cluster: cluster.to_string(),
            per_group,
            max_adj_p_value,
            min_p_value: 1.0 - (1.0 - min_p).powi(k),
        });
    }

    result
        .rows
        .sort_by(|a, b| a.max_adj_p_value.total_cmp(&b.max_adj_p_value).then_with(|| a.gene.cmp(&b.gene)));
    result.exclusions.sort();
    Ok(result)
}

/// Within every cluster, compare the cells of condition `level_1` against those of `level_2`.
///
/// Rows are tagged with the cluster and with `"{level_1}_vs_{level_2}"`; clusters where either
/// side is too small show up in the exclusions only.
pub fn condition_de_per_cluster(
    gene_ids: &[String],
    matrix: &CsMat<f64>,
    labels: &[usize],
    conditions: &[String],
    level_1: &str,
    level_2: &str,
    params: &DeParams,
) -> Result<DeTable> {
    check_labels(matrix, labels.len())?;
    if conditions.len() != labels.len() {
        return Err(ScanError::Data(format!(
            "{} condition values for {} cells",
            conditions.len(),
            labels.len()
        )));
    }
    if level_1 == level_2 {
        return Err(ScanError::Config(format!("cannot compare condition {level_1} with itself")));
    }

    let comparison = format!("{level_1}_vs_{level_2}");
    let clusters = labels.iter().copied().collect::<BTreeSet<_>>();
    let tables = clusters
        .par_iter()
        .map(|&cluster| {
            let pick = |level: &str| {
                (0..labels.len())
                    .filter(|&c| labels[c] == cluster && conditions[c] == level)
                    .collect::<Vec<_>>()
            };
            compare_groups(gene_ids, matrix, &pick(level_1), &pick(level_2), params)
                .map(|t| tag_cluster(t, cluster).with_condition(&comparison))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(concat(tables))
}

fn check_labels(matrix: &CsMat<f64>, n_labels: usize) -> Result<()> {
    if matrix.cols() != n_labels {
        return Err(ScanError::Data(format!(
            "{} labels for an expression matrix with {} cells",
            n_labels,
            matrix.cols()
        )));
    }
    Ok(())
}

/// positions where `mask` is true, and where it is false
fn split(mask: impl Iterator<Item = bool>) -> (Vec<usize>, Vec<usize>) {
    let mut inside = Vec::new();
    let mut outside = Vec::new();
    for (i, m) in mask.enumerate() {
        if m {
            inside.push(i)
        } else {
            outside.push(i)
        }
    }
    (inside, outside)
}

fn tag_cluster(mut table: DeTable, cluster: usize) -> DeTable {
    let name = cluster.to_string();
    for e in table.exclusions.iter_mut() {
        e.unit = format!("cluster {name}/{}", e.unit);
    }
    table.with_cluster(&name)
}

fn concat(tables: Vec<DeTable>) -> DeTable {
    let mut out = DeTable::default();
    for t in tables {
        out.rows.extend(t.rows);
        out.exclusions.extend(t.exclusions);
    }
    out
}
