use crate::error::{Result, ScanError};
use ndarray::Array2;
use sprs::{CsMat, TriMat};
use std::collections::HashSet;

/// Raw UMI counts, genes x cells, stored column-compressed so each cell is a contiguous slice.
#[derive(Clone, Debug)]
pub struct CountMatrix {
    /// Gene identifiers (row labels)
    pub gene_ids: Vec<String>,
    /// Gene symbols, parallel to `gene_ids`
    pub gene_names: Vec<String>,
    /// Cell identifiers (column labels)
    pub cell_ids: Vec<String>,
    counts: CsMat<u32>,
}

impl CountMatrix {
    /// Build a matrix, checking that it has at least one gene and one cell, that the labels agree
    /// with the shape and that cell and gene ids are unique.
    pub fn new(gene_ids: Vec<String>, gene_names: Vec<String>, cell_ids: Vec<String>, counts: CsMat<u32>) -> Result<Self> {
        if counts.rows() == 0 || counts.cols() == 0 {
            return Err(ScanError::Data(format!(
                "empty matrix: {} genes x {} cells",
                counts.rows(),
                counts.cols()
            )));
        }
        let counts = if counts.is_csc() {
            counts
        } else {
            counts.to_other_storage()
        };

        if counts.rows() != gene_ids.len() || gene_names.len() != gene_ids.len() {
            return Err(ScanError::Data(format!(
                "matrix has {} rows but {} gene ids and {} gene names",
                counts.rows(),
                gene_ids.len(),
                gene_names.len()
            )));
        }
        if counts.cols() != cell_ids.len() {
            return Err(ScanError::Data(format!(
                "matrix has {} columns but {} cell ids",
                counts.cols(),
                cell_ids.len()
            )));
        }
        if let Some(dup) = first_duplicate(&cell_ids) {
            return Err(ScanError::Data(format!("duplicate cell id: {dup}")));
        }
        if let Some(dup) = first_duplicate(&gene_ids) {
            return Err(ScanError::Data(format!("duplicate gene id: {dup}")));
        }

        Ok(CountMatrix {
            gene_ids,
            gene_names,
            cell_ids,
            counts,
        })
    }

    /// Build from a dense genes x cells array; gene names default to the ids.
    pub fn from_dense(gene_ids: Vec<String>, cell_ids: Vec<String>, dense: &Array2<u32>) -> Result<Self> {
        let (rows, cols) = dense.dim();
        let mut tri = TriMat::new((rows, cols));
        for ((r, c), &v) in dense.indexed_iter() {
            if v > 0 {
                tri.add_triplet(r, c, v);
            }
        }
        let names = gene_ids.clone();
        CountMatrix::new(gene_ids, names, cell_ids, tri.to_csc())
    }

    /// Number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.rows()
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.counts.cols()
    }

    /// The underlying column-compressed matrix
    pub fn counts(&self) -> &CsMat<u32> {
        &self.counts
    }

    /// Total counts per cell
    pub fn library_sizes(&self) -> Vec<u64> {
        self.counts
            .outer_iterator()
            .map(|col| col.iter().map(|(_, &v)| v as u64).sum())
            .collect()
    }

    /// Merge two conditions into one matrix. Cell ids are prefixed with their condition label so
    /// that identical barcodes from the two captures cannot collide. Returns the merged matrix and
    /// the condition label of each merged cell.
    pub fn merge(a: &CountMatrix, label_a: &str, b: &CountMatrix, label_b: &str) -> Result<(CountMatrix, Vec<String>)> {
        if label_a == label_b {
            return Err(ScanError::Data(format!(
                "both conditions are labelled '{label_a}', cell ids would collide"
            )));
        }
        if a.gene_ids != b.gene_ids {
            return Err(ScanError::Data(format!(
                "mismatched gene universes between conditions: {} has {} genes, {} has {} genes",
                label_a,
                a.n_genes(),
                label_b,
                b.n_genes()
            )));
        }

        let mut indptr = Vec::with_capacity(a.n_cells() + b.n_cells() + 1);
        let mut indices = Vec::with_capacity(a.counts.nnz() + b.counts.nnz());
        let mut data = Vec::with_capacity(a.counts.nnz() + b.counts.nnz());
        let mut cell_ids = Vec::with_capacity(a.n_cells() + b.n_cells());
        let mut conditions = Vec::with_capacity(a.n_cells() + b.n_cells());
        indptr.push(0);

        for (m, label) in [(a, label_a), (b, label_b)] {
            for (col, id) in m.counts.outer_iterator().zip(m.cell_ids.iter()) {
                for (row, &v) in col.iter() {
                    indices.push(row);
                    data.push(v);
                }
                indptr.push(indices.len());
                cell_ids.push(format!("{label}_{id}"));
                conditions.push(label.to_string());
            }
        }

        let counts = CsMat::new_csc((a.n_genes(), cell_ids.len()), indptr, indices, data);
        let merged = CountMatrix::new(a.gene_ids.clone(), a.gene_names.clone(), cell_ids, counts)?;
        Ok((merged, conditions))
    }

    /// Sub-matrix restricted to the given cells, in the given order.
    pub fn select_cells(&self, cells: &[usize]) -> CountMatrix {
        let mut indptr = Vec::with_capacity(cells.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for &c in cells {
            if let Some(col) = self.counts.outer_view(c) {
                for (row, &v) in col.iter() {
                    indices.push(row);
                    data.push(v);
                }
            }
            indptr.push(indices.len());
        }

        CountMatrix {
            gene_ids: self.gene_ids.clone(),
            gene_names: self.gene_names.clone(),
            cell_ids: cells.iter().map(|&c| self.cell_ids[c].clone()).collect(),
            counts: CsMat::new_csc((self.n_genes(), cells.len()), indptr, indices, data),
        }
    }

    /// Sub-matrix restricted to the given genes, in the given order.
    pub fn select_genes(&self, genes: &[usize]) -> CountMatrix {
        let mut new_row = vec![None; self.n_genes()];
        for (i, &g) in genes.iter().enumerate() {
            new_row[g] = Some(i);
        }

        let mut indptr = Vec::with_capacity(self.n_cells() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        let mut entries = Vec::new();
        indptr.push(0);
        for col in self.counts.outer_iterator() {
            entries.clear();
            entries.extend(col.iter().filter_map(|(row, &v)| new_row[row].map(|r| (r, v))));
            entries.sort_unstable_by_key(|&(r, _)| r);
            for &(r, v) in &entries {
                indices.push(r);
                data.push(v);
            }
            indptr.push(indices.len());
        }

        CountMatrix {
            gene_ids: genes.iter().map(|&g| self.gene_ids[g].clone()).collect(),
            gene_names: genes.iter().map(|&g| self.gene_names[g].clone()).collect(),
            cell_ids: self.cell_ids.clone(),
            counts: CsMat::new_csc((genes.len(), self.n_cells()), indptr, indices, data),
        }
    }
}

fn first_duplicate(ids: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().find(|id| !seen.insert(id.as_str())).map(|s| s.as_str())
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn test_library_sizes() {
        let m = CountMatrix::from_dense(ids("G", 2), ids("c", 3), &array![[1, 0, 3], [2, 0, 4]]).unwrap();
        assert_eq!(m.library_sizes(), vec![3, 0, 7]);
        assert_eq!(m.n_genes(), 2);
        assert_eq!(m.n_cells(), 3);
    }

    #[test]
    fn test_duplicate_cells_rejected() {
        let cells = vec!["AAAC".to_string(), "AAAC".to_string()];
        let err = CountMatrix::from_dense(ids("G", 1), cells, &array![[1, 2]]).unwrap_err();
        assert!(matches!(err, ScanError::Data(_)));
    }

    #[test]
    fn test_empty_dimensions_rejected() {
        let no_cells = CountMatrix::from_dense(ids("G", 2), vec![], &Array2::zeros((2, 0))).unwrap_err();
        assert!(matches!(no_cells, ScanError::Data(_)));
        let no_genes = CountMatrix::new(vec![], vec![], ids("c", 3), CsMat::zero((0, 3))).unwrap_err();
        assert!(matches!(no_genes, ScanError::Data(_)));
    }

    #[test]
    fn test_merge_prefixes_cells() {
        // identical barcodes in both captures
        let a = CountMatrix::from_dense(ids("G", 2), ids("AAAC-", 2), &array![[1, 2], [3, 4]]).unwrap();
        let b = CountMatrix::from_dense(ids("G", 2), ids("AAAC-", 2), &array![[5, 6], [7, 8]]).unwrap();

        let (m, conditions) = CountMatrix::merge(&a, "CTRL", &b, "STIM").unwrap();
        assert_eq!(m.cell_ids, vec!["CTRL_AAAC-0", "CTRL_AAAC-1", "STIM_AAAC-0", "STIM_AAAC-1"]);
        assert_eq!(conditions, vec!["CTRL", "CTRL", "STIM", "STIM"]);
        assert_eq!(m.library_sizes(), vec![4, 6, 12, 14]);
    }

    #[test]
    fn test_merge_checks_genes_and_labels() {
        let a = CountMatrix::from_dense(ids("G", 2), ids("c", 1), &array![[1], [3]]).unwrap();
        let b = CountMatrix::from_dense(ids("H", 2), ids("c", 1), &array![[1], [3]]).unwrap();
        assert!(matches!(CountMatrix::merge(&a, "A", &b, "B"), Err(ScanError::Data(_))));
        assert!(matches!(CountMatrix::merge(&a, "A", &a, "A"), Err(ScanError::Data(_))));
    }

    #[test]
    fn test_select_cells() {
        let m = CountMatrix::from_dense(ids("G", 2), ids("c", 3), &array![[1, 0, 3], [2, 5, 4]]).unwrap();
        let s = m.select_cells(&[2, 0]);
        assert_eq!(s.cell_ids, vec!["c2", "c0"]);
        assert_eq!(s.library_sizes(), vec![7, 3]);
    }

    #[test]
    fn test_select_genes() {
        let m = CountMatrix::from_dense(ids("G", 3), ids("c", 2), &array![[1, 0], [2, 5], [0, 4]]).unwrap();
        let s = m.select_genes(&[2, 0]);
        assert_eq!(s.gene_ids, vec!["G2", "G0"]);
        assert_eq!(s.counts().to_dense(), array![[0, 4], [1, 0]]);
    }
}
