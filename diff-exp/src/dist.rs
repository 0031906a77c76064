use crate::stat::{average_ranks, Statistics};
use scan_types::{Result, ScanError};
use serde::{Deserialize, Serialize};
use statrs::function::beta::beta_reg;
use statrs::function::erf::erfc;
use std::cmp::Ordering;
use std::f64::consts::SQRT_2;
use std::str::FromStr;

/// Two-sample test used by `compare_groups`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestMethod {
    /// Wilcoxon rank-sum test, normal approximation with tie and continuity correction
    #[default]
    #[serde(rename = "wilcox")]
    Wilcoxon,
    /// Welch two-sample t-test on the log-normalized values
    #[serde(rename = "t")]
    TTest,
}

impl FromStr for TestMethod {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wilcox" | "wilcoxon" => Ok(TestMethod::Wilcoxon),
            "t" | "ttest" | "t-test" | "welch" => Ok(TestMethod::TTest),
            _ => Err(ScanError::Config(format!("test method not recognized: {s}"))),
        }
    }
}

impl TestMethod {
    /// Two-sided p-value comparing `x` and `y`
    pub fn p_value(&self, x: &[f64], y: &[f64]) -> Result<f64> {
        match self {
            TestMethod::Wilcoxon => wilcoxon_rank_sum(x, y),
            TestMethod::TTest => welch_t_test(x, y),
        }
    }
}

/// Multiple testing correction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustMethod {
    /// family-wise error rate, `min(1, p * n)`
    #[default]
    #[serde(rename = "bonferroni")]
    Bonferroni,
    /// false discovery rate
    #[serde(rename = "bh")]
    BenjaminiHochberg,
}

impl FromStr for AdjustMethod {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bonferroni" => Ok(AdjustMethod::Bonferroni),
            "bh" | "fdr" => Ok(AdjustMethod::BenjaminiHochberg),
            _ => Err(ScanError::Config(format!("p-value adjustment not recognized: {s}"))),
        }
    }
}

impl AdjustMethod {
    /// Adjust `pvalues`, returning values in the input order
    pub fn adjust(&self, pvalues: &[f64]) -> Vec<f64> {
        match self {
            AdjustMethod::Bonferroni => adjusted_pvalue_bonferroni(pvalues),
            AdjustMethod::BenjaminiHochberg => {
                let indexed = pvalues.iter().copied().enumerate().collect::<Vec<_>>();
                let mut adjusted = vec![0.0; pvalues.len()];
                for (i, q) in adjusted_pvalue_bh(&indexed) {
                    adjusted[i] = q;
                }
                adjusted
            }
        }
    }
}

/// adjusted_pvalue_bonferroni
#[inline]
pub fn adjusted_pvalue_bonferroni(pvalue: &[f64]) -> Vec<f64> {
    let n = pvalue.len() as f64;
    pvalue.iter().map(|&p| (p * n).min(1.0)).collect()
}

/// adjusted_pvalue_bh
#[inline]
pub fn adjusted_pvalue_bh(pvalue: &[(usize, f64)]) -> Vec<(usize, f64)> {
    // sort pvalue and conserve the original indexes, NaNs to the front
    let mut arr = pvalue.to_vec();
    arr.sort_by(|&(_, a), &(_, b)| match a.partial_cmp(&b) {
        Some(o) => o.reverse(),
        None => {
            if a.is_nan() && b.is_nan() {
                Ordering::Equal
            } else if a.is_nan() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    });

    // compute q = np.minimum(1, np.minimum.accumulate(scale * p[descending])
    let len = arr.len() as f64;
    let mut min = f64::MAX;
    for (idx, (_, ref mut val)) in arr.iter_mut().enumerate() {
        *val *= len / (len - idx as f64);
        if *val < min {
            min = *val
        }
        *val = min.min(1.0);
    }

    arr
}

/// Wilcoxon rank-sum (Mann-Whitney) test, two-sided, using the normal approximation with tie
/// correction and continuity correction. A comparison whose rank sum has no variance (all values
/// tied) gives p = 1.
pub fn wilcoxon_rank_sum(x: &[f64], y: &[f64]) -> Result<f64> {
    let n1 = x.len() as f64;
    let n2 = y.len() as f64;
    if x.is_empty() || y.is_empty() {
        return Err(ScanError::StatisticalTest("rank-sum test needs both groups non-empty".into()));
    }

    let mut all = Vec::with_capacity(x.len() + y.len());
    all.extend_from_slice(x);
    all.extend_from_slice(y);
    if all.iter().any(|v| !v.is_finite()) {
        return Err(ScanError::StatisticalTest("non-finite expression value".into()));
    }

    let (ranks, tie_term) = average_ranks(&all);
    let rank_sum_x: f64 = ranks[..x.len()].iter().sum();
    let u = rank_sum_x - n1 * (n1 + 1.0) / 2.0;

    let n = n1 + n2;
    let sigma2 = (n1 * n2 / 12.0) * ((n + 1.0) - tie_term / (n * (n - 1.0)));
    if sigma2 <= 0.0 {
        return Ok(1.0);
    }

    let z = u - n1 * n2 / 2.0;
    let correction = 0.5 * z.signum() * f64::from(z != 0.0);
    let z = (z - correction) / sigma2.sqrt();

    Ok(erfc(z.abs() / SQRT_2).min(1.0))
}

/// Welch's unequal-variance t-test, two-sided. Two constant groups give p = 1 when their means
/// agree and p = 0 otherwise.
pub fn welch_t_test(x: &[f64], y: &[f64]) -> Result<f64> {
    if x.len() < 2 || y.len() < 2 {
        return Err(ScanError::StatisticalTest("t-test needs at least 2 cells per group".into()));
    }
    let n1 = x.len() as f64;
    let n2 = y.len() as f64;
    let (m1, m2) = (x.mean(), y.mean());
    let (v1, v2) = (x.var(1.0) / n1, y.var(1.0) / n2);
    let se2 = v1 + v2;

    if !(m1.is_finite() && m2.is_finite() && se2.is_finite()) {
        return Err(ScanError::StatisticalTest("non-finite expression value".into()));
    }
    if se2 == 0.0 {
        return Ok(if m1 == m2 { 1.0 } else { 0.0 });
    }

    let t = (m1 - m2) / se2.sqrt();
    let df = se2 * se2 / (v1 * v1 / (n1 - 1.0) + v2 * v2 / (n2 - 1.0));
    if !df.is_finite() || df <= 0.0 {
        return Err(ScanError::StatisticalTest(format!("degenerate Welch degrees of freedom: {df}")));
    }

    // P(|T| > t) = I_{df / (df + t^2)}(df / 2, 1 / 2)
    let x = df / (df + t * t);
    Ok(beta_reg(df / 2.0, 0.5, x.clamp(0.0, 1.0)).min(1.0))
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_adjusted_pvalue_bh() {
        let data = [
            ("Blue_fish", 0.34f64),
            ("Bread", 0.594f64),
            ("Butter", 0.212f64),
            ("Carbohydrates", 0.384f64),
            ("Cereals_and_pasta", 0.074f64),
            ("Dairy_products", 0.94f64),
            ("Eggs", 0.275f64),
            ("Fats", 0.696f64),
            ("Fruit", 0.269f64),
            ("Legumes", 0.341f64),
            ("Nuts", 0.06f64),
            ("Olive_oil", 0.008f64),
            ("Potatoes", 0.569f64),
            ("Processed_meat", 0.986f64),
            ("Proteins", 0.042f64),
            ("Red_meat", 0.251f64),
            ("Semi-skimmed_milk", 0.942f64),
            ("Skimmed_milk", 0.222f64),
            ("Sweets", 0.762f64),
            ("Total_calories", 0.001f64),
            ("Total_meat", 0.975f64),
            ("Vegetables", 0.216f64),
            ("White_fish", 0.205f64),
            ("White_meat", 0.041f64),
            ("Whole_milk", 0.039f64),
        ];
        let pvalues = data.iter().map(|x| x.1).collect::<Vec<_>>();

        let expected = [
            0.5328125f64,
            0.781578947368421,
            0.49107142857142866,
            0.5647058823529413,
            0.2642857142857143,
            0.986,
            0.49107142857142866,
            0.8699999999999999,
            0.49107142857142866,
            0.5328125,
            0.25,
            0.1,
            0.781578947368421,
            0.986,
            0.21000000000000002,
            0.49107142857142866,
            0.986,
            0.49107142857142866,
            0.9071428571428571,
            0.025,
            0.986,
            0.49107142857142866,
            0.49107142857142866,
            0.21000000000000002,
            0.21000000000000002,
        ];

        let adjusted = AdjustMethod::BenjaminiHochberg.adjust(&pvalues);
        for (&e, &q) in expected.iter().zip(&adjusted) {
            assert_approx_eq!(e, q, 1e-12);
        }
    }

    #[test]
    fn test_bonferroni() {
        let adjusted = AdjustMethod::Bonferroni.adjust(&[0.01, 0.2, 0.5]);
        assert_approx_eq!(adjusted[0], 0.03);
        assert_approx_eq!(adjusted[1], 0.6);
        assert_eq!(adjusted[2], 1.0);
    }

    #[test]
    fn test_wilcoxon_matches_r() {
        // wilcox.test(c(1.1, 2.2, 3.3, 4.4, 5.5), c(0, 0, 0.5, 1.1, 2.0, 0), exact = FALSE)
        // W = 28.5, ties at 0 (x3) and 1.1 (x2), p-value = 0.01635
        let x = [1.1, 2.2, 3.3, 4.4, 5.5];
        let y = [0.0, 0.0, 0.5, 1.1, 2.0, 0.0];
        let p = wilcoxon_rank_sum(&x, &y).unwrap();
        assert_approx_eq!(p, 0.016_354_6, 1e-5);

        // symmetric in the arguments
        assert_approx_eq!(wilcoxon_rank_sum(&y, &x).unwrap(), p, 1e-12);
    }

    #[test]
    fn test_wilcoxon_degenerate() {
        assert_eq!(wilcoxon_rank_sum(&[0.0, 0.0], &[0.0, 0.0, 0.0]).unwrap(), 1.0);
        assert_eq!(wilcoxon_rank_sum(&[1.0, 2.0], &[1.0, 2.0]).unwrap(), 1.0);
        assert!(wilcoxon_rank_sum(&[], &[1.0]).is_err());
    }

    #[test]
    fn test_welch_matches_r() {
        // t.test(c(1, 2, 3, 4, 5), c(2, 4, 6, 8, 10, 12))
        // t = -2.3764, df = 6.9723, p-value = 0.04928
        let p = welch_t_test(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 4.0, 6.0, 8.0, 10.0, 12.0]).unwrap();
        assert_approx_eq!(p, 0.049_28, 1e-4);
    }

    #[test]
    fn test_welch_constant_groups() {
        assert_eq!(welch_t_test(&[3.0, 3.0], &[0.0, 0.0]).unwrap(), 0.0);
        assert_eq!(welch_t_test(&[1.0, 1.0], &[1.0, 1.0]).unwrap(), 1.0);
        assert!(matches!(welch_t_test(&[1.0], &[1.0, 2.0]), Err(ScanError::StatisticalTest(_))));
    }

    #[test]
    fn test_parse_methods() {
        assert_eq!("wilcox".parse::<TestMethod>().unwrap(), TestMethod::Wilcoxon);
        assert_eq!("t".parse::<TestMethod>().unwrap(), TestMethod::TTest);
        assert!(matches!("bimod".parse::<TestMethod>(), Err(ScanError::Config(_))));
        assert_eq!("fdr".parse::<AdjustMethod>().unwrap(), AdjustMethod::BenjaminiHochberg);
    }
}
