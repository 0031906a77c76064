#![allow(non_snake_case)]

use super::{from_faer, thin_svd, to_faer, DataMat, Pca, PcaResult};
use ndarray::{s, Array2};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use scan_types::{Result, ScanError};

/// Settings for Randomized PCA
#[derive(Clone, Debug)]
pub struct RandSvd {
    /// Extra projection dimensions on top of the requested k
    pub oversampling: usize,

    /// Number of power iteration to perform
    pub n_iter: usize,

    /// Seed of the random projection
    pub seed: u64,
}

impl RandSvd {
    /// Create a new RandSvd with default settings.
    pub fn new(seed: u64) -> RandSvd {
        RandSvd {
            oversampling: 20,
            n_iter: 4,
            seed,
        }
    }

    fn sketch_size(&self, k: usize, m: usize, n: usize) -> usize {
        (k + self.oversampling).min(m.min(n))
    }

    /// Whether the projection is small enough relative to the matrix to beat an exact SVD
    pub fn is_worthwhile(&self, m: usize, n: usize, k: usize) -> bool {
        2 * (k + self.oversampling) <= m.min(n)
    }
}

impl<T: DataMat> Pca<T> for RandSvd {
    fn run_pca(&self, matrix: &T, k: usize) -> Result<PcaResult> {
        let [m, n] = matrix.shape();
        svd_rand(matrix, k, self.sketch_size(k, m, n), self.n_iter, self.seed)
    }
}

/// Orthonormal basis of the column space of `y`
fn orthonormalize(y: &Array2<f64>) -> Array2<f64> {
    let q = to_faer(&y.view()).qr().compute_thin_Q();
    from_faer(q.as_ref())
}

/// Perform an SVD of matrix `A`, making a rank `k` approximation. Use `l` projection dimensions and `n_iter` power iterations.
pub fn svd_rand<T: DataMat>(A: &T, k: usize, l: usize, n_iter: usize, seed: u64) -> Result<PcaResult> {
    let [m, n] = A.shape();

    if m < 2 || n < 2 {
        return Err(ScanError::Data("The input matrix must be at least 2x2.".into()));
    }
    if k == 0 || k > l || l > m.min(n) {
        return Err(ScanError::Config(format!(
            "invalid rank {k} with {l} projections for a {m} x {n} matrix"
        )));
    }

    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let unif = Uniform::new(-1.0, 1.0);

    let omega = Array2::random_using((n, l), unif, &mut rng);
    let mut Q = orthonormalize(&A.dot_right(&omega.view()));

    // subspace iteration, re-orthonormalizing after every product
    for _ in 0..n_iter {
        let Z = orthonormalize(&A.t_dot_right(&Q.view()));
        Q = orthonormalize(&A.dot_right(&Z.view()));
    }

    // B = Q^T A, decomposed as B^T = A^T Q to keep the small matrix tall
    let Bt = A.t_dot_right(&Q.view());
    let (Vb, sigma, Ub) = thin_svd(to_faer(&Bt.view()).as_ref())?;
    let U = Q.dot(&Ub.slice(s![.., ..k]));
    Ok((U, sigma.slice(s![..k]).to_owned(), Vb.slice(s![.., ..k]).to_owned()))
}
