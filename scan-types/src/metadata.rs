use crate::error::{Result, ScanError};
use log::warn;
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one clustering run. Labels are only reproducible for a fixed triple, so the triple
/// is also the column name under which the labels are stored.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClusterKey {
    /// Name of the embedding the neighbor graph was built on
    pub embedding: String,
    /// Modularity resolution
    pub resolution: f64,
    /// Random seed of the community detection
    pub seed: u64,
}

impl ClusterKey {
    /// New key
    pub fn new(embedding: impl Into<String>, resolution: f64, seed: u64) -> ClusterKey {
        ClusterKey {
            embedding: embedding.into(),
            resolution,
            seed,
        }
    }

    /// Metadata column name, e.g. `integrated_res.0.5_seed.0`
    pub fn column_name(&self) -> String {
        format!("{}_res.{}_seed.{}", self.embedding, self.resolution, self.seed)
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column_name())
    }
}

/// A partition of cells, labels numbered by decreasing cluster size.
#[derive(Clone, Debug, Serialize)]
pub struct ClusterLabels {
    /// The run that produced these labels
    pub key: ClusterKey,
    /// Cluster of each cell
    pub labels: Vec<usize>,
    /// Number of clusters
    pub num_clusters: usize,
    /// Modularity of the partition at `key.resolution`
    pub modularity: f64,
}

impl ClusterLabels {
    /// Cells assigned to `cluster`
    pub fn members(&self, cluster: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == cluster)
            .map(|(i, _)| i)
            .collect()
    }

    /// Cluster ids in ascending order
    pub fn cluster_ids(&self) -> Vec<usize> {
        (0..self.num_clusters).collect()
    }

    /// Number of cells in each cluster
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_clusters];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        sizes
    }
}

/// A cells x k coordinate table.
#[derive(Clone, Debug)]
pub struct Embedding {
    /// Slot name, e.g. `pca` or `integrated`
    pub name: String,
    /// How the embedding was produced
    pub source: String,
    /// Coordinates, one row per cell
    pub coords: Array2<f64>,
    /// Standard deviation of each component, when the reduction defines one
    pub stdev: Option<Array1<f64>>,
}

impl Embedding {
    /// Number of components
    pub fn dims(&self) -> usize {
        self.coords.ncols()
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.coords.nrows()
    }
}

/// Per-cell annotations, index-aligned with the merged count matrix columns.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CellMetadata {
    /// Cell ids
    pub cell_ids: Vec<String>,
    /// Condition label of each cell
    pub conditions: Vec<String>,
    /// Total raw counts
    pub total_counts: Vec<u64>,
    /// Number of genes with non-zero count
    pub n_features: Vec<u32>,
    /// Percent of counts from mitochondrial genes
    pub percent_mito: Vec<f64>,
    /// Cluster-label columns, keyed by [`ClusterKey::column_name`]
    pub clusterings: BTreeMap<String, ClusterLabels>,
}

impl CellMetadata {
    /// Metadata for freshly merged cells
    pub fn new(cell_ids: Vec<String>, conditions: Vec<String>) -> Result<CellMetadata> {
        if cell_ids.len() != conditions.len() {
            return Err(ScanError::Data(format!(
                "{} cell ids but {} condition labels",
                cell_ids.len(),
                conditions.len()
            )));
        }
        Ok(CellMetadata {
            cell_ids,
            conditions,
            ..CellMetadata::default()
        })
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.cell_ids.len()
    }

    /// Distinct condition labels in order of first appearance
    pub fn condition_levels(&self) -> Vec<String> {
        let mut levels: Vec<String> = Vec::new();
        for c in &self.conditions {
            if !levels.contains(c) {
                levels.push(c.clone());
            }
        }
        levels
    }

    /// Cells carrying condition `label`
    pub fn cells_in_condition(&self, label: &str) -> Vec<usize> {
        self.conditions
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_str() == label)
            .map(|(i, _)| i)
            .collect()
    }

    /// Store a clustering under its composite key. Re-running the same (embedding, resolution, seed)
    /// replaces the column; distinct runs never share one.
    pub fn add_clustering(&mut self, labels: ClusterLabels) -> Result<()> {
        if labels.labels.len() != self.n_cells() {
            return Err(ScanError::Data(format!(
                "clustering {} has {} labels for {} cells",
                labels.key,
                labels.labels.len(),
                self.n_cells()
            )));
        }
        let column = labels.key.column_name();
        if self.clusterings.insert(column.clone(), labels).is_some() {
            warn!("replacing existing cluster column {column}");
        }
        Ok(())
    }

    /// Look up a clustering column
    pub fn clustering(&self, key: &ClusterKey) -> Result<&ClusterLabels> {
        self.clusterings
            .get(&key.column_name())
            .ok_or_else(|| ScanError::Data(format!("no cluster column {key}")))
    }

    /// Keep only the given cells (in order), dropping cluster columns, which no longer apply.
    pub fn select_cells(&self, cells: &[usize]) -> CellMetadata {
        CellMetadata {
            cell_ids: cells.iter().map(|&c| self.cell_ids[c].clone()).collect(),
            conditions: cells.iter().map(|&c| self.conditions[c].clone()).collect(),
            total_counts: pick(&self.total_counts, cells),
            n_features: pick(&self.n_features, cells),
            percent_mito: pick(&self.percent_mito, cells),
            clusterings: BTreeMap::new(),
        }
    }
}

// QC columns may not have been computed yet
fn pick<T: Copy>(column: &[T], cells: &[usize]) -> Vec<T> {
    if column.is_empty() {
        Vec::new()
    } else {
        cells.iter().map(|&c| column[c]).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn labels(key: ClusterKey, labels: Vec<usize>) -> ClusterLabels {
        let num_clusters = labels.iter().max().map_or(0, |m| m + 1);
        ClusterLabels {
            key,
            labels,
            num_clusters,
            modularity: 0.0,
        }
    }

    #[test]
    fn test_cluster_columns_do_not_collide() {
        let mut md = CellMetadata::new(vec!["a".into(), "b".into()], vec!["X".into(), "Y".into()]).unwrap();

        let k1 = ClusterKey::new("pca", 0.5, 0);
        let k2 = ClusterKey::new("pca", 0.8, 0);
        let k3 = ClusterKey::new("integrated", 0.5, 0);
        md.add_clustering(labels(k1.clone(), vec![0, 1])).unwrap();
        md.add_clustering(labels(k2.clone(), vec![0, 0])).unwrap();
        md.add_clustering(labels(k3.clone(), vec![1, 0])).unwrap();

        assert_eq!(md.clusterings.len(), 3);
        assert_eq!(md.clustering(&k1).unwrap().labels, vec![0, 1]);
        assert_eq!(md.clustering(&k2).unwrap().labels, vec![0, 0]);
        assert_eq!(md.clustering(&k3).unwrap().labels, vec![1, 0]);
        assert_eq!(k3.column_name(), "integrated_res.0.5_seed.0");
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut md = CellMetadata::new(vec!["a".into()], vec!["X".into()]).unwrap();
        let res = md.add_clustering(labels(ClusterKey::new("pca", 1.0, 0), vec![0, 1]));
        assert!(matches!(res, Err(ScanError::Data(_))));
    }

    #[test]
    fn test_conditions() {
        let md = CellMetadata::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec!["STIM".into(), "CTRL".into(), "STIM".into()],
        )
        .unwrap();
        assert_eq!(md.condition_levels(), vec!["STIM", "CTRL"]);
        assert_eq!(md.cells_in_condition("STIM"), vec![0, 2]);
    }
}
