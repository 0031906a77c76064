//! Local polynomial regression (loess) with tricube weights

use rayon::prelude::*;

/// Loess smoother of degree 1 or 2.
///
/// Each point is fitted from its `ceil(span * n)` nearest neighbors along x, weighted by the
/// tricube kernel of the distance scaled to the farthest neighbor.
#[derive(Clone, Debug)]
pub struct Loess {
    span: f64,
    degree: usize,
}

impl Loess {
    /// New smoother; `span` is clamped into (0, 1] and any degree other than 1 is quadratic
    pub fn new(span: f64, degree: usize) -> Loess {
        Loess {
            span: span.clamp(f64::EPSILON, 1.0),
            degree: if degree == 1 { 1 } else { 2 },
        }
    }

    /// Fitted values at each `x`. Points where `x` or `y` is not finite are skipped and get a
    /// NaN fit.
    pub fn fit(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        let mut fitted = vec![f64::NAN; x.len()];
        let mut points = x
            .iter()
            .zip(y)
            .enumerate()
            .filter(|(_, (x, y))| x.is_finite() && y.is_finite())
            .map(|(i, (&x, &y))| (i, x, y))
            .collect::<Vec<_>>();
        if points.is_empty() {
            return fitted;
        }
        points.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let k = ((points.len() as f64 * self.span).ceil() as usize).clamp(1, points.len());
        let values = points
            .par_iter()
            .map(|&(i, x, _)| (i, self.fit_point(&points, x, k)))
            .collect::<Vec<_>>();
        for (i, v) in values {
            fitted[i] = v;
        }
        fitted
    }

    fn fit_point(&self, points: &[(usize, f64, f64)], target: f64, k: usize) -> f64 {
        let neighbors = nearest_along_x(points, target, k);
        let max_dist = neighbors
            .iter()
            .map(|&i| (points[i].1 - target).abs())
            .fold(0.0, f64::max);
        if max_dist == 0.0 {
            return neighbors.iter().map(|&i| points[i].2).sum::<f64>() / neighbors.len() as f64;
        }

        // widen the window slightly so the farthest neighbor keeps a non-zero weight
        let scale = 1.0 / (max_dist * 1.000_001);
        let mut xs = Vec::with_capacity(neighbors.len());
        let mut ys = Vec::with_capacity(neighbors.len());
        let mut ws = Vec::with_capacity(neighbors.len());
        for &i in &neighbors {
            let (_, x, y) = points[i];
            xs.push(x - target);
            ys.push(y);
            ws.push(tricube((x - target).abs() * scale));
        }

        if self.degree == 2 {
            if let Some(v) = weighted_quadratic_at_zero(&xs, &ys, &ws) {
                return v;
            }
        }
        weighted_linear_at_zero(&xs, &ys, &ws)
    }
}

/// Indices of the `k` points closest to `target`, given points sorted by x.
fn nearest_along_x(points: &[(usize, f64, f64)], target: f64, k: usize) -> Vec<usize> {
    let n = points.len();
    if k >= n {
        return (0..n).collect();
    }
    let pos = points.partition_point(|p| p.1 < target);
    let (mut l, mut r) = (pos, pos);
    let mut out = Vec::with_capacity(k);
    while out.len() < k {
        let left = if l > 0 { target - points[l - 1].1 } else { f64::INFINITY };
        let right = if r < n { points[r].1 - target } else { f64::INFINITY };
        if left <= right && l > 0 {
            l -= 1;
            out.push(l);
        } else if r < n {
            out.push(r);
            r += 1;
        } else {
            break;
        }
    }
    out
}

#[inline]
fn tricube(u: f64) -> f64 {
    if u >= 1.0 {
        0.0
    } else {
        let t = 1.0 - u * u * u;
        t * t * t
    }
}

/// Intercept of the weighted least squares line; x is already centered on the target.
fn weighted_linear_at_zero(x: &[f64], y: &[f64], w: &[f64]) -> f64 {
    let (mut sw, mut swx, mut swy, mut swxx, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for i in 0..x.len() {
        sw += w[i];
        swx += w[i] * x[i];
        swy += w[i] * y[i];
        swxx += w[i] * x[i] * x[i];
        swxy += w[i] * x[i] * y[i];
    }
    if sw == 0.0 {
        return y.iter().sum::<f64>() / y.len() as f64;
    }
    let mx = swx / sw;
    let my = swy / sw;
    let denom = swxx - sw * mx * mx;
    if denom.abs() < 1e-12 {
        return my;
    }
    let slope = (swxy - sw * mx * my) / denom;
    my - slope * mx
}

/// Intercept of the weighted least squares parabola, or `None` if the normal equations are singular.
fn weighted_quadratic_at_zero(x: &[f64], y: &[f64], w: &[f64]) -> Option<f64> {
    if x.len() < 3 {
        return None;
    }
    let mut a = [[0.0; 3]; 3];
    let mut b = [0.0; 3];
    for i in 0..x.len() {
        let (xi, x2) = (x[i], x[i] * x[i]);
        a[0][0] += w[i];
        a[0][1] += w[i] * xi;
        a[0][2] += w[i] * x2;
        a[1][2] += w[i] * xi * x2;
        a[2][2] += w[i] * x2 * x2;
        b[0] += w[i] * y[i];
        b[1] += w[i] * xi * y[i];
        b[2] += w[i] * x2 * y[i];
    }
    a[1][1] = a[0][2];
    a[1][0] = a[0][1];
    a[2][0] = a[0][2];
    a[2][1] = a[1][2];
    solve3(a, b).map(|c| c[0])
}

/// Gaussian elimination with partial pivoting
fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    let scale = a.iter().flatten().fold(0.0_f64, |m, v| m.max(v.abs()));
    if scale == 0.0 {
        return None;
    }
    for i in 0..3 {
        let p = (i..3).max_by(|&r, &s| a[r][i].abs().total_cmp(&a[s][i].abs()))?;
        a.swap(i, p);
        b.swap(i, p);
        if a[i][i].abs() < 1e-12 * scale {
            return None;
        }
        for r in (i + 1)..3 {
            let f = a[r][i] / a[i][i];
            for c in i..3 {
                a[r][c] -= f * a[i][c];
            }
            b[r] -= f * b[i];
        }
    }
    let mut sol = [0.0; 3];
    for i in (0..3).rev() {
        let s = (i + 1..3).fold(b[i], |acc, j| acc - a[i][j] * sol[j]);
        sol[i] = s / a[i][i];
    }
    Some(sol)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_reproduces_polynomials() {
        let x = (0..50).map(|i| i as f64 / 10.0).collect::<Vec<_>>();
        let line = x.iter().map(|x| 2.0 * x - 1.0).collect::<Vec<_>>();
        let parabola = x.iter().map(|x| x * x - 3.0 * x + 0.5).collect::<Vec<_>>();

        for (f, e) in Loess::new(0.3, 1).fit(&x, &line).iter().zip(&line) {
            assert_approx_eq!(f, e, 1e-8);
        }
        for (f, e) in Loess::new(0.3, 2).fit(&x, &parabola).iter().zip(&parabola) {
            assert_approx_eq!(f, e, 1e-8);
        }
    }

    #[test]
    fn test_smooths_noise() {
        // alternating +-1 noise around a line is averaged out in the interior
        let x = (0..200).map(|i| i as f64).collect::<Vec<_>>();
        let y = x
            .iter()
            .enumerate()
            .map(|(i, x)| 0.5 * x + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect::<Vec<_>>();
        let fit = Loess::new(0.3, 2).fit(&x, &y);
        for i in 40..160 {
            assert!((fit[i] - 0.5 * x[i]).abs() < 0.1);
        }
    }

    #[test]
    fn test_non_finite_points_skipped() {
        let x = vec![0.0, 1.0, f64::NAN, 3.0, 4.0];
        let y = vec![0.0, 1.0, 2.0, 3.0, f64::INFINITY];
        let fit = Loess::new(1.0, 1).fit(&x, &y);
        assert!(fit[2].is_nan());
        assert!(fit[4].is_nan());
        assert_approx_eq!(fit[1], 1.0, 1e-9);
    }

    #[test]
    fn test_solve3() {
        let a = [[2.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 4.0]];
        let s = solve3(a, [3.0, 5.0, 5.0]).unwrap();
        for (v, e) in s.iter().zip([1.0, 1.0, 1.0]) {
            assert_approx_eq!(*v, e, 1e-12);
        }
        assert!(solve3([[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]], [1.0, 2.0, 3.0]).is_none());
    }
}
