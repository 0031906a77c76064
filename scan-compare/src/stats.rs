//! Statistics functions

use ndarray::{ArrayView1, ArrayView2, Axis};

/// Return the median of `xs`, or `None` if it is empty. Sorts its argument in place.
pub fn median_mut(xs: &mut [f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    xs.sort_unstable_by(f64::total_cmp);
    let n = xs.len();
    Some(if n % 2 == 0 {
        (xs[n / 2] + xs[n / 2 - 1]) / 2.0
    } else {
        xs[n / 2]
    })
}

/// Quantile `q` of `xs` with linear interpolation between order statistics (R's default,
/// type 7). Sorts its argument in place; `None` if it is empty.
pub fn quantile_mut(xs: &mut [f64], q: f64) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    xs.sort_unstable_by(f64::total_cmp);
    let h = (xs.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(xs[lo] + (h - lo as f64) * (xs[hi] - xs[lo]))
}

/// Mean and sample variance (n - 1 denominator) of each row
pub fn row_mean_var(x: &ArrayView2<f64>) -> Vec<(f64, f64)> {
    x.axis_iter(Axis(0)).map(|r| mean_var(&r)).collect()
}

/// Mean and sample variance (n - 1 denominator); the variance is 0 for fewer than two values
pub fn mean_var(x: &ArrayView1<f64>) -> (f64, f64) {
    let n = x.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = x.sum() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }
    let var = x.fold(0.0, |acc, v| acc + (v - mean) * (v - mean)) / (n - 1) as f64;
    (mean, var)
}

#[cfg(test)]
mod test_stats {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;

    #[test]
    fn test_median_mut() {
        assert_eq!(median_mut(&mut Vec::<f64>::new()), None);
        assert_eq!(median_mut(&mut [1.0]), Some(1.0));
        assert_eq!(median_mut(&mut [10.0, 1.0]), Some(5.5));
        assert_eq!(median_mut(&mut [100.0, 1.0, 10.0]), Some(10.0));
    }

    #[test]
    fn test_quantile_mut() {
        // R: quantile(c(1, 2, 3, 4, 10), c(0.01, 0.5, 0.9))
        let mut x = [10.0, 2.0, 1.0, 4.0, 3.0];
        assert_approx_eq!(quantile_mut(&mut x, 0.01).unwrap(), 1.04);
        assert_approx_eq!(quantile_mut(&mut x, 0.5).unwrap(), 3.0);
        assert_approx_eq!(quantile_mut(&mut x, 0.9).unwrap(), 7.6);
        assert_eq!(quantile_mut(&mut Vec::<f64>::new(), 0.5), None);
    }

    #[test]
    fn test_row_mean_var() {
        let x = array![[1.0, 2.0, 3.0, 4.0], [5.0, 5.0, 5.0, 5.0]];
        let mv = row_mean_var(&x.view());
        assert_approx_eq!(mv[0].0, 2.5);
        assert_approx_eq!(mv[0].1, 1.666_666_666_666_666_7);
        assert_eq!(mv[1], (5.0, 0.0));
    }
}
