//! Count matrix normalization and per-gene scaling

use log::info;
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use scan_types::{CountMatrix, Exclusion, Result, ScanError};
use sprs::CsMat;

/// Log-normalized expression, genes x cells, row-compressed so each gene is a contiguous slice.
#[derive(Clone, Debug)]
pub struct NormalizedMatrix {
    /// Gene identifiers, in row order
    pub gene_ids: Vec<String>,
    /// Cell identifiers, in column order
    pub cell_ids: Vec<String>,
    /// `ln(1 + count / library_size * scale_factor)`
    pub data: CsMat<f64>,
    /// Target library size used for the normalization
    pub scale_factor: f64,
}

impl NormalizedMatrix {
    /// Number of genes
    pub fn n_genes(&self) -> usize {
        self.data.rows()
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.data.cols()
    }

    /// Dense copy of the rows `genes`, in the given order
    pub fn dense_rows(&self, genes: &[usize]) -> Array2<f64> {
        let mut out = Array2::zeros((genes.len(), self.n_cells()));
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(genes.par_iter())
            .for_each(|(mut row, &g)| {
                if let Some(v) = self.data.outer_view(g) {
                    for (c, &x) in v.iter() {
                        row[c] = x;
                    }
                }
            });
        out
    }

    /// Sub-matrix restricted to the given cells, in the given order
    pub fn select_cells(&self, cells: &[usize]) -> NormalizedMatrix {
        let mut new_col = vec![None; self.n_cells()];
        for (i, &c) in cells.iter().enumerate() {
            new_col[c] = Some(i);
        }
        let mut indptr = Vec::with_capacity(self.n_genes() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        let mut entries = Vec::new();
        indptr.push(0);
        for row in self.data.outer_iterator() {
            entries.clear();
            entries.extend(row.iter().filter_map(|(c, &v)| new_col[c].map(|i| (i, v))));
            entries.sort_unstable_by_key(|&(i, _)| i);
            for &(i, v) in &entries {
                indices.push(i);
                data.push(v);
            }
            indptr.push(indices.len());
        }
        NormalizedMatrix {
            gene_ids: self.gene_ids.clone(),
            cell_ids: cells.iter().map(|&c| self.cell_ids[c].clone()).collect(),
            data: CsMat::new((self.n_genes(), cells.len()), indptr, indices, data),
            scale_factor: self.scale_factor,
        }
    }
}

/// Log-normalize raw counts:
/// 1. Scale each column (cell) to a total count of `scale_factor`
/// 2. Apply the transform `x -> ln(1 + x)`
///
/// A cell with no counts cannot be scaled and fails the whole call with a `DataError`;
/// such cells have to be removed beforehand.
pub fn log_normalize(matrix: &CountMatrix, scale_factor: f64) -> Result<NormalizedMatrix> {
    if !(scale_factor > 0.0) {
        return Err(ScanError::Config(format!("scale factor must be positive, got {scale_factor}")));
    }
    if matrix.n_cells() == 0 || matrix.n_genes() == 0 {
        return Err(ScanError::Data(format!(
            "empty matrix: {} genes x {} cells",
            matrix.n_genes(),
            matrix.n_cells()
        )));
    }

    let library_sizes = matrix.library_sizes();
    if let Some(c) = library_sizes.iter().position(|&l| l == 0) {
        return Err(ScanError::Data(format!(
            "cell {} has a library size of zero and cannot be normalized",
            matrix.cell_ids[c]
        )));
    }

    let counts = matrix.counts();
    let (indptr, indices, data) = counts.clone().into_raw_storage();
    let mut data = data.into_iter().map(f64::from).collect::<Vec<_>>();
    for (c, &l) in library_sizes.iter().enumerate() {
        let scale = scale_factor / l as f64;
        for v in &mut data[indptr[c]..indptr[c + 1]] {
            *v = (*v * scale).ln_1p();
        }
    }
    let csc = CsMat::new_csc((matrix.n_genes(), matrix.n_cells()), indptr, indices, data);

    info!(
        "log-normalized {} genes x {} cells to {scale_factor} counts per cell",
        matrix.n_genes(),
        matrix.n_cells()
    );
    Ok(NormalizedMatrix {
        gene_ids: matrix.gene_ids.clone(),
        cell_ids: matrix.cell_ids.clone(),
        data: csc.to_other_storage(),
        scale_factor,
    })
}

/// Centered, scaled expression of a feature subset, features x cells.
#[derive(Clone, Debug)]
pub struct ScaledData {
    /// Row indices (into the normalized matrix) of the retained features
    pub features: Vec<usize>,
    /// Gene ids of the retained features
    pub feature_ids: Vec<String>,
    /// Scaled values
    pub data: Array2<f64>,
    /// Features dropped for having no variance
    pub exclusions: Vec<Exclusion>,
}

/// Center each of the `features`, scale it to unit (sample) variance and clip values above
/// `scale_max`. Features with zero variance cannot be scaled; they are dropped and recorded.
pub fn scale_data(normalized: &NormalizedMatrix, features: &[usize], scale_max: f64) -> ScaledData {
    let dense = normalized.dense_rows(features);
    let n = normalized.n_cells() as f64;

    let scaled_rows = dense
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| {
            let mean = row.sum() / n;
            let var = if n > 1.0 {
                row.fold(0.0, |acc, v| acc + (v - mean) * (v - mean)) / (n - 1.0)
            } else {
                0.0
            };
            if var > 0.0 {
                let sd = var.sqrt();
                Some(row.mapv(|v| ((v - mean) / sd).min(scale_max)))
            } else {
                None
            }
        })
        .collect::<Vec<_>>();

    let mut kept = Vec::new();
    let mut exclusions = Vec::new();
    for (&g, row) in features.iter().zip(&scaled_rows) {
        match row {
            Some(_) => kept.push(g),
            None => {
                let err = ScanError::Numerical("zero variance, cannot scale".into());
                exclusions.push(Exclusion::new("scale_data", normalized.gene_ids[g].clone(), &err));
            }
        }
    }

    let mut data = Array2::zeros((kept.len(), normalized.n_cells()));
    for (mut out, row) in data.axis_iter_mut(Axis(0)).zip(scaled_rows.into_iter().flatten()) {
        out.assign(&row);
    }

    ScaledData {
        feature_ids: kept.iter().map(|&g| normalized.gene_ids[g].clone()).collect(),
        features: kept,
        data,
        exclusions,
    }
}
