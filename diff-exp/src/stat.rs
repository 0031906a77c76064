//! statistics
//!
//! Summary statistics over slices, and average ranks for rank-based tests.

use std::cmp::Ordering;

/// Statistics Trait
///
/// It contains `sum`, `mean`, `var`
pub trait Statistics {
    /// Sum
    fn sum(&self) -> f64;
    /// mean stats; 0 for an empty slice
    fn mean(&self) -> f64;
    /// var stats, with `ddof` delta degrees of freedom; 0 when there are too few values
    fn var(&self, ddof: f64) -> f64;
}

impl Statistics for [f64] {
    fn sum(&self) -> f64 {
        self.iter().sum()
    }

    fn mean(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            Statistics::sum(self) / (self.len() as f64)
        }
    }

    fn var(&self, ddof: f64) -> f64 {
        let denom = (self.len() as f64) - ddof;
        if denom <= 0.0 {
            return 0.0;
        }
        let mean = self.mean();
        let v = self.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>();
        // N.B., with ddof = 1 this is the sample variance
        v / denom
    }
}

/// Average (1-based) ranks of `values`, tied values sharing the mean of their ranks.
/// Also returns `sum(t^3 - t)` over tie groups of size `t`, the tie correction term of the
/// rank-sum variance.
pub fn average_ranks(values: &[f64]) -> (Vec<f64>, f64) {
    let n = values.len();
    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; n];
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && values[order[j]] == values[order[i]] {
            j += 1;
        }
        // positions i..j hold ranks i+1..=j
        let rank = (i + j + 1) as f64 / 2.0;
        for &idx in &order[i..j] {
            ranks[idx] = rank;
        }
        let t = (j - i) as f64;
        tie_term += t * t * t - t;
        i = j;
    }

    (ranks, tie_term)
}
