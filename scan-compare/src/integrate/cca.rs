use crate::dim_red::{normalize_signs, DataMat, ExactSvd, Pca, RandSvd};
use log::{info, warn};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use scan_types::{Result, ScanError};

/// The cells x cells cross-product `t(a) b` of two features x cells matrices, applied without
/// being formed.
pub struct CrossProduct<'a> {
    a: ArrayView2<'a, f64>,
    b: ArrayView2<'a, f64>,
}

impl<'a> CrossProduct<'a> {
    /// Operator over two matrices with the same feature rows
    pub fn new(a: ArrayView2<'a, f64>, b: ArrayView2<'a, f64>) -> CrossProduct<'a> {
        CrossProduct { a, b }
    }
}

impl DataMat for CrossProduct<'_> {
    fn shape(&self) -> [usize; 2] {
        [self.a.ncols(), self.b.ncols()]
    }

    fn dot_right(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        self.a.t().dot(&self.b.dot(x))
    }

    fn t_dot_right(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        self.b.t().dot(&self.a.dot(x))
    }

    fn to_dense(&self) -> Array2<f64> {
        self.a.t().dot(&self.b)
    }
}

/// Canonical vectors of both conditions
#[derive(Clone, Debug)]
pub struct CcaResult {
    /// (cells_a + cells_b) x n_cc, condition `a` first, each row L2-normalized
    pub embedding: Array2<f64>,
    /// Singular values of the cross-product
    pub d: Vec<f64>,
}

/// Scale every row to unit Euclidean length; all-zero rows stay zero.
pub fn l2_normalize(x: &ArrayView2<f64>) -> Array2<f64> {
    let mut out = x.to_owned();
    out.axis_iter_mut(Axis(0)).into_par_iter().for_each(|mut row| {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    });
    out
}

/// Canonical correlation analysis of two scaled matrices (features x cells, same features).
///
/// The singular vectors of `t(a) b` are paired projections of the cells of `a` and of `b`
/// with maximal cross-condition correlation. They are stacked, sign-normalized and then
/// L2-normalized per cell.
pub fn run_cca(a: &ArrayView2<f64>, b: &ArrayView2<f64>, n_cc: usize, seed: u64) -> Result<CcaResult> {
    let op = CrossProduct::new(a.view(), b.view());
    let [m, n] = op.shape();
    let k = n_cc.min(m).min(n);
    if k < n_cc {
        warn!("{n_cc} canonical vectors requested, but only {k} possible for {m} and {n} cells");
    }

    let rand_svd = RandSvd::new(seed);
    let (u, s, v) = if rand_svd.is_worthwhile(m, n, k) {
        rand_svd.run_pca(&op, k)?
    } else {
        ExactSvd.run_pca(&op, k)?
    };

    let smax = s.get(0).copied().unwrap_or(0.0);
    let rank = s.iter().take_while(|&&x| smax > 0.0 && x > smax * 1e-10).count();
    if rank == 0 {
        return Err(ScanError::Numerical(
            "conditions share no correlated structure over the integration features".into(),
        ));
    }
    let mut u = u.slice(s![.., ..rank]).to_owned();
    let mut v = v.slice(s![.., ..rank]).to_owned();
    normalize_signs(&mut u, &mut v);

    let stacked = concatenate(Axis(0), &[u.view(), v.view()])
        .map_err(|e| ScanError::Numerical(format!("cannot stack canonical vectors: {e}")))?;
    info!("cca: {m} x {n} cells, {rank} canonical vectors");
    Ok(CcaResult {
        embedding: l2_normalize(&stacked.view()),
        d: s.iter().take(rank).copied().collect(),
    })
}
