use crate::nn::{knn, knn_between, Neighbors};
use crate::stats::quantile_mut;
use log::debug;
use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;

/// A correspondence between a reference cell and a query cell
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Anchor {
    /// Cell of the reference condition
    pub reference_cell: usize,
    /// Cell of the query condition
    pub query_cell: usize,
    /// Support from shared neighborhoods, in [0, 1]
    pub score: f64,
}

/// Quantiles that map shared-neighbor counts onto 0 and 1
const SCORE_QUANTILES: (f64, f64) = (0.01, 0.9);

/// Mutual nearest neighbors between the rows of `reference` and `query`: `(a, b)` is kept only
/// if `b` is among the `k` nearest query rows of `a` and `a` is among the `k` nearest reference
/// rows of `b`. Pairs are sorted by `(a, b)`.
pub fn find_mnn(reference: &ArrayView2<f64>, query: &ArrayView2<f64>, k: usize) -> Vec<(usize, usize)> {
    let ref_to_query = knn_between(reference, query, k);
    let query_to_ref = knn_between(query, reference, k);

    let mut pairs = ref_to_query
        .indices
        .axis_iter(Axis(0))
        .enumerate()
        .flat_map(|(a, row)| {
            let back = &query_to_ref;
            row.to_vec()
                .into_iter()
                .filter(move |&b| back.indices.row(b).iter().any(|&x| x == a))
                .map(move |b| (a, b))
        })
        .collect::<Vec<_>>();
    pairs.sort_unstable();
    debug!("{} mutual nearest neighbors at k = {k}", pairs.len());
    pairs
}

/// Keep the pairs whose query cell is among the `k_filter` nearest query cells of the reference
/// cell in feature space (rows are cells).
pub fn filter_anchors(
    pairs: Vec<(usize, usize)>,
    reference_features: &ArrayView2<f64>,
    query_features: &ArrayView2<f64>,
    k_filter: usize,
) -> Vec<(usize, usize)> {
    let cells = pairs.iter().map(|&(a, _)| a).collect::<BTreeSet<_>>().into_iter().collect::<Vec<_>>();
    let selected = reference_features.select(Axis(0), &cells);
    let nn = knn_between(&selected.view(), query_features, k_filter);

    let before = pairs.len();
    let kept = pairs
        .into_iter()
        .filter(|&(a, b)| {
            cells
                .binary_search(&a)
                .map_or(false, |row| nn.indices.row(row).iter().any(|&x| x == b))
        })
        .collect::<Vec<_>>();
    debug!("anchor filter kept {} of {before} pairs", kept.len());
    kept
}

/// Neighborhood of every cell in the combined (reference, then query) index space: the cell,
/// its `k` nearest cells in its own condition and its `k` nearest cells in the other one.
fn combined_neighborhoods(own: &Neighbors, other: &Neighbors, own_offset: usize, other_offset: usize) -> Vec<Vec<usize>> {
    own.indices
        .axis_iter(Axis(0))
        .zip(other.indices.axis_iter(Axis(0)))
        .enumerate()
        .map(|(i, (own_row, other_row))| {
            let mut set = Vec::with_capacity(own_row.len() + other_row.len() + 1);
            set.push(own_offset + i);
            set.extend(own_row.iter().map(|&j| own_offset + j));
            set.extend(other_row.iter().map(|&j| other_offset + j));
            set.sort_unstable();
            set
        })
        .collect()
}

fn shared_count(a: &[usize], b: &[usize]) -> usize {
    let (mut i, mut j, mut n) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                n += 1;
                i += 1;
                j += 1;
            }
        }
    }
    n
}

/// Score anchors by the overlap of their endpoints' combined neighborhoods in the shared space.
///
/// Raw overlaps are rescaled so that the 1% quantile maps to 0 and the 90% quantile to 1,
/// then clipped to [0, 1]. When all overlaps are equal every anchor scores 1.
pub fn score_anchors(
    pairs: &[(usize, usize)],
    reference: &ArrayView2<f64>,
    query: &ArrayView2<f64>,
    k_score: usize,
) -> Vec<Anchor> {
    if pairs.is_empty() {
        return Vec::new();
    }
    let n_ref = reference.nrows();
    let ref_sets = combined_neighborhoods(
        &knn(reference, k_score),
        &knn_between(reference, query, k_score),
        0,
        n_ref,
    );
    let query_sets = combined_neighborhoods(
        &knn(query, k_score),
        &knn_between(query, reference, k_score),
        n_ref,
        0,
    );

    let shared = pairs
        .par_iter()
        .map(|&(a, b)| shared_count(&ref_sets[a], &query_sets[b]) as f64)
        .collect::<Vec<_>>();

    let mut sorted = shared.clone();
    let lo = quantile_mut(&mut sorted, SCORE_QUANTILES.0).unwrap_or(0.0);
    let hi = quantile_mut(&mut sorted, SCORE_QUANTILES.1).unwrap_or(0.0);

    pairs
        .iter()
        .zip(shared)
        .map(|(&(a, b), s)| Anchor {
            reference_cell: a,
            query_cell: b,
            score: if hi > lo { ((s - lo) / (hi - lo)).clamp(0.0, 1.0) } else { 1.0 },
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{array, Array2};
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_distr::Normal;
    use rand_pcg::Pcg64Mcg;

    fn points(n: usize, seed: u64) -> Array2<f64> {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        Array2::random_using((n, 3), Normal::new(0.0, 1.0).unwrap(), &mut rng)
    }

    #[test]
    fn test_mnn_reciprocal() {
        let r = points(100, 0);
        let q = points(80, 1);
        let k = 5;
        let pairs = find_mnn(&r.view(), &q.view(), k);
        assert!(!pairs.is_empty());

        let rq = knn_between(&r.view(), &q.view(), k);
        let qr = knn_between(&q.view(), &r.view(), k);
        for &(a, b) in &pairs {
            assert!(rq.indices.row(a).iter().any(|&x| x == b));
            assert!(qr.indices.row(b).iter().any(|&x| x == a));
        }
        // and no reciprocal pair was missed
        let mut count = 0;
        for a in 0..100 {
            for &b in rq.indices.row(a) {
                if qr.indices.row(b).iter().any(|&x| x == a) {
                    count += 1;
                }
            }
        }
        assert_eq!(count, pairs.len());
    }

    #[test]
    fn test_one_way_hits_discarded() {
        // query 0 is nearest to reference 0, but reference 0 has the closer query 1
        let r = array![[0.0], [10.0]];
        let q = array![[-1.0], [0.5]];
        assert_eq!(find_mnn(&r.view(), &q.view(), 1), vec![(0, 1)]);
    }

    #[test]
    fn test_filter() {
        let rf = array![[1.0, 0.0], [0.0, 1.0]];
        let qf = array![[1.0, 0.0], [0.9, 0.1], [0.0, 1.0]];
        let pairs = vec![(0, 0), (0, 2), (1, 2), (1, 0)];
        let kept = filter_anchors(pairs, &rf.view(), &qf.view(), 2);
        assert_eq!(kept, vec![(0, 0), (1, 2)]);
    }

    #[test]
    fn test_shared_count() {
        assert_eq!(shared_count(&[1, 3, 5, 7], &[2, 3, 4, 7, 9]), 2);
        assert_eq!(shared_count(&[], &[1]), 0);
    }

    #[test]
    fn test_scores_in_unit_range() {
        let r = points(60, 2);
        let q = points(60, 3);
        let pairs = find_mnn(&r.view(), &q.view(), 5);
        let anchors = score_anchors(&pairs, &r.view(), &q.view(), 10);
        assert_eq!(anchors.len(), pairs.len());
        assert!(anchors.iter().all(|a| (0.0..=1.0).contains(&a.score)));
        assert!(anchors.iter().any(|a| a.score == 1.0));
        assert!(score_anchors(&[], &r.view(), &q.view(), 10).is_empty());
    }
}
