#![allow(non_snake_case)]

//! Notes on generic matrix algos
//! The decompositions here are written against the `DataMat` trait rather than a concrete matrix
//! type: a randomized SVD only needs to multiply the data matrix `A` (and its transpose) by a
//! thin dense matrix. That lets the same code decompose a dense scaled-expression matrix or an
//! implicit operator such as the cross-product `t(X) Y` of two conditions, which is never
//! materialized when the conditions are large.

use faer::{Mat, MatRef};
use log::{info, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use scan_types::{Exclusion, Result, ScanError};

/// Randomized SVD method
pub mod rand_svd;

pub use rand_svd::RandSvd;

/// `(U, sigma, V)` with `A ~ U diag(sigma) V^T`, singular values in decreasing order
pub type PcaResult = (Array2<f64>, Array1<f64>, Array2<f64>);

/// A matrix that can be multiplied by thin dense matrices from either side
pub trait DataMat: Sync {
    /// Get the shape of the matrix
    fn shape(&self) -> [usize; 2];

    /// `A x`
    fn dot_right(&self, x: &ArrayView2<f64>) -> Array2<f64>;

    /// `A^T x`
    fn t_dot_right(&self, x: &ArrayView2<f64>) -> Array2<f64>;

    /// Materialize `A`
    fn to_dense(&self) -> Array2<f64>;
}

impl DataMat for Array2<f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }

    fn dot_right(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        self.dot(x)
    }

    fn t_dot_right(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        self.t().dot(x)
    }

    fn to_dense(&self) -> Array2<f64> {
        self.clone()
    }
}

impl DataMat for ArrayView2<'_, f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }

    fn dot_right(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        self.dot(x)
    }

    fn t_dot_right(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        self.t().dot(x)
    }

    fn to_dense(&self) -> Array2<f64> {
        self.to_owned()
    }
}

/// Perform a SVD of a `matrix`, retaining `k` singular triplets.
/// This trait always performs the pure SVD of the matrix. Special cases of SVD
/// such as PCA can be achieved by the appropriate shifts and scaling of `matrix`
pub trait Pca<T: DataMat> {
    /// Compute a rank `k` decomposition of `matrix`
    fn run_pca(&self, matrix: &T, k: usize) -> Result<PcaResult>;
}

/// Full thin SVD of the materialized matrix, truncated to `k`
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactSvd;

impl<T: DataMat> Pca<T> for ExactSvd {
    fn run_pca(&self, matrix: &T, k: usize) -> Result<PcaResult> {
        let dense = matrix.to_dense();
        let (u, s, v) = thin_svd(to_faer(&dense.view()).as_ref())?;
        let k = k.min(s.len());
        Ok((
            u.slice(ndarray::s![.., ..k]).to_owned(),
            s.slice(ndarray::s![..k]).to_owned(),
            v.slice(ndarray::s![.., ..k]).to_owned(),
        ))
    }
}

pub(crate) fn to_faer(a: &ArrayView2<f64>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub(crate) fn from_faer(m: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| *m.get(i, j))
}

/// Thin SVD through faer
pub(crate) fn thin_svd(a: MatRef<'_, f64>) -> Result<PcaResult> {
    let svd = a
        .thin_svd()
        .map_err(|e| ScanError::Numerical(format!("singular value decomposition failed: {e:?}")))?;
    let s = svd.S().column_vector().iter().copied().collect::<Array1<f64>>();
    Ok((from_faer(svd.U()), s, from_faer(svd.V())))
}

/// Flip the sign of each singular pair so that the entry of largest magnitude in each column
/// of `u` is positive.
pub fn normalize_signs(u: &mut Array2<f64>, v: &mut Array2<f64>) {
    for j in 0..u.ncols() {
        let mut col = u.column(j).iter().copied().enumerate().collect::<Vec<_>>();
        // first index wins among equal magnitudes
        col.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then(a.0.cmp(&b.0)));
        if col.first().map_or(false, |&(_, x)| x < 0.0) {
            u.column_mut(j).mapv_inplace(|x| -x);
            v.column_mut(j).mapv_inplace(|x| -x);
        }
    }
}

/// Decomposition of a features x cells matrix
#[derive(Clone, Debug)]
pub struct PcaOutcome {
    /// cells x components, `V diag(sigma)`
    pub embedding: Array2<f64>,
    /// features x components
    pub loadings: Array2<f64>,
    /// standard deviation of each component, `sigma / sqrt(n_cells - 1)`
    pub stdev: Array1<f64>,
    /// variance of each component
    pub variance_explained: Array1<f64>,
    /// total variance of the input (sum of per-feature variances)
    pub total_variance: f64,
    /// number of components asked for
    pub requested: usize,
    /// number of components returned
    pub attained: usize,
    /// components that could not be computed
    pub exclusions: Vec<Exclusion>,
}

impl PcaOutcome {
    /// Cumulative fraction of the total variance explained by the first 1..=k components
    pub fn cumulative_variance_ratio(&self) -> Vec<f64> {
        let mut acc = 0.0;
        self.variance_explained
            .iter()
            .map(|v| {
                acc += v;
                if self.total_variance > 0.0 {
                    acc / self.total_variance
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// Relative singular value below which a component counts as numerically zero
const RANK_TOL: f64 = 1e-10;

/// PCA of a centered features x cells matrix, retaining `k` components.
///
/// Large matrices are decomposed with a seeded randomized SVD, small ones exactly. Components
/// beyond the numerical rank of `data` are dropped (with a warning and an exclusion) rather
/// than padded.
pub fn run_pca(data: &Array2<f64>, k: usize, seed: u64) -> Result<PcaOutcome> {
    if k == 0 {
        return Err(ScanError::Config("number of components must be positive".into()));
    }
    let (m, n) = data.dim();
    if m < 2 || n < 2 {
        return Err(ScanError::Data(format!(
            "cannot compute PCA of a {m} x {n} matrix, at least 2 x 2 is required"
        )));
    }

    let max_rank = m.min(n);
    let want = k.min(max_rank);
    let rand_svd = RandSvd::new(seed);
    let (mut u, s, mut v) = if rand_svd.is_worthwhile(m, n, want) {
        rand_svd.run_pca(data, want)?
    } else {
        ExactSvd.run_pca(data, want)?
    };

    let smax = s.get(0).copied().unwrap_or(0.0);
    let attained = s.iter().take_while(|&&x| smax > 0.0 && x > smax * RANK_TOL).count();
    u = u.slice(ndarray::s![.., ..attained]).to_owned();
    v = v.slice(ndarray::s![.., ..attained]).to_owned();
    let s = s.slice(ndarray::s![..attained]).to_owned();
    normalize_signs(&mut u, &mut v);

    let mut exclusions = Vec::new();
    if attained < k {
        warn!("requested {k} components but the matrix only has numerical rank {attained}");
        let err = ScanError::Numerical(format!("numerical rank {attained} is below the requested {k}"));
        for c in attained..k {
            exclusions.push(Exclusion::new("run_pca", format!("PC_{}", c + 1), &err));
        }
    }

    let denom = (n - 1) as f64;
    let embedding = &v * &s;
    let variance_explained = s.mapv(|x| x * x / denom);
    let total_variance = data.iter().map(|x| x * x).sum::<f64>() / denom
        - data
            .axis_iter(Axis(0))
            .map(|r| {
                let mean = r.sum() / n as f64;
                mean * mean * n as f64
            })
            .sum::<f64>()
            / denom;

    info!("pca: {m} features x {n} cells, {attained} of {k} components");
    Ok(PcaOutcome {
        embedding,
        loadings: u,
        stdev: s.mapv(|x| x / denom.sqrt()),
        variance_explained,
        total_variance,
        requested: k,
        attained,
        exclusions,
    })
}
