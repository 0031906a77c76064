//! Nearest neighbor search and shared-nearest-neighbor graphs

use log::{info, warn};
use ndarray::{Array2, ArrayView2, Axis};
use noisy_float::checkers::NumChecker;
use noisy_float::NoisyFloat;
use num_traits::Bounded;
use rayon::prelude::*;
use scan_types::{Result, ScanError};
use vpsearch::{BestCandidate, MetricSpace, Tree};

type Dist = NoisyFloat<f64, NumChecker>;

#[derive(Clone, Debug)]
struct Sample<'a> {
    data: &'a [f64],
    idx: usize,
}

/// Euclidean distance between two rows
impl MetricSpace for Sample<'_> {
    type UserData = ();
    type Distance = Dist;

    fn distance(&self, other: &Self, _: &Self::UserData) -> Self::Distance {
        let d2 = self
            .data
            .iter()
            .zip(other.data)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>();
        Dist::new(d2.sqrt())
    }
}

/// Collects the `max_item_count` closest points seen, sorted by (distance, index)
struct CountBasedNeighborhood {
    max_item_count: usize,
    max_observed_distance: Dist,
    distance_x_index: Vec<(Dist, usize)>,
}

impl CountBasedNeighborhood {
    fn new(max_item_count: usize) -> Self {
        CountBasedNeighborhood {
            max_item_count,
            max_observed_distance: <Dist as Bounded>::max_value(),
            distance_x_index: Vec::with_capacity(max_item_count + 1),
        }
    }

    fn clear(&mut self) {
        self.max_observed_distance = <Dist as Bounded>::max_value();
        self.distance_x_index.clear();
    }

    fn insert_index(&mut self, index: usize, distance: Dist) {
        let val = (distance, index);
        let pos = self.distance_x_index.binary_search(&val).unwrap_or_else(|x| x);
        self.distance_x_index.insert(pos, val);
        if self.distance_x_index.len() >= self.max_item_count {
            self.distance_x_index.truncate(self.max_item_count);
            if let Some(&(d, _)) = self.distance_x_index.last() {
                self.max_observed_distance = d;
            }
        }
    }
}

impl<'a, 's> BestCandidate<Sample<'s>, ()> for &'a mut CountBasedNeighborhood {
    type Output = std::iter::Cloned<std::slice::Iter<'a, (Dist, usize)>>;

    #[inline]
    fn consider(&mut self, _: &Sample<'s>, distance: Dist, candidate_index: usize, _: &()) {
        if self.max_item_count == 0 {
            return;
        }
        // equal distances are admitted so that the lower index can displace a higher one
        if distance <= self.max_observed_distance || self.distance_x_index.len() < self.max_item_count {
            self.insert_index(candidate_index, distance);
        }
    }

    #[inline]
    fn distance(&self) -> Dist {
        self.max_observed_distance
    }

    fn result(self, _: &()) -> Self::Output {
        self.distance_x_index.as_slice().iter().cloned()
    }
}

/// k nearest neighbors of each query point; row `i` lists the neighbors of query `i` closest
/// first, ties ordered by index.
#[derive(Clone, Debug)]
pub struct Neighbors {
    /// Row indices into the reference points
    pub indices: Array2<usize>,
    /// Euclidean distances
    pub distances: Array2<f64>,
}

impl Neighbors {
    /// Number of neighbors per point
    pub fn k(&self) -> usize {
        self.indices.ncols()
    }
}

fn samples(data: &[f64], n: usize, dim: usize) -> Vec<Sample<'_>> {
    (0..n)
        .map(|idx| Sample {
            data: &data[idx * dim..(idx + 1) * dim],
            idx,
        })
        .collect()
}

fn search(reference: &ArrayView2<f64>, query: &ArrayView2<f64>, k: usize, skip_self: bool) -> Neighbors {
    let dim = reference.ncols();
    // row-major copies, so every row is a contiguous slice
    let ref_data = reference.iter().copied().collect::<Vec<_>>();
    let query_data = query.iter().copied().collect::<Vec<_>>();
    let ref_samples = samples(&ref_data, reference.nrows(), dim);
    let query_samples = samples(&query_data, query.nrows(), dim);
    let vp = Tree::new_with_user_data_ref(&ref_samples, &());

    let n_query = query.nrows();
    let mut indices = Array2::from_elem((n_query, k), usize::MAX);
    let mut distances = Array2::from_elem((n_query, k), f64::INFINITY);

    indices
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip_eq(distances.axis_iter_mut(Axis(0)).into_par_iter())
        .enumerate()
        .for_each_init(
            || CountBasedNeighborhood::new(k + usize::from(skip_self)),
            |neighborhood, (cell, (mut indices, mut distances))| {
                neighborhood.clear();
                let q = &query_samples[cell];
                let mut j = 0;
                for (dist, idx) in vp.find_nearest_custom(q, &(), &mut *neighborhood) {
                    if (skip_self && idx == q.idx) || j >= k {
                        continue;
                    }
                    indices[j] = idx;
                    distances[j] = dist.raw();
                    j += 1;
                }
            },
        );

    Neighbors { indices, distances }
}

/// k nearest neighbors of every row of `points` among the other rows (self excluded).
/// `k` is clamped to `n - 1`.
pub fn knn(points: &ArrayView2<f64>, k: usize) -> Neighbors {
    let n = points.nrows();
    let k = clamp_k(k, n.saturating_sub(1));
    search(points, points, k, true)
}

/// k nearest rows of `reference` for every row of `query`. `k` is clamped to the number of
/// reference rows.
pub fn knn_between(query: &ArrayView2<f64>, reference: &ArrayView2<f64>, k: usize) -> Neighbors {
    let k = clamp_k(k, reference.nrows());
    search(reference, query, k, false)
}

fn clamp_k(k: usize, available: usize) -> usize {
    if k > available {
        warn!("{} neighbors requested, but only {} available", k, available);
        available
    } else {
        k
    }
}

/// Shared-nearest-neighbor graph over the cells of an embedding.
#[derive(Clone, Debug)]
pub struct NeighborGraph {
    /// Number of cells (nodes)
    pub n_cells: usize,
    /// Neighborhood size, including the cell itself
    pub k: usize,
    /// The k - 1 nearest other cells of each cell
    pub knn: Neighbors,
    /// Undirected Jaccard-weighted edges `(i, j, w)` with `i < j`, sorted by `(i, j)`
    pub edges: Vec<(usize, usize, f64)>,
}

impl NeighborGraph {
    /// Build the graph on the rows of `embedding`.
    ///
    /// Each cell's neighborhood is itself plus its `k - 1` nearest cells. Every pair of cells
    /// sharing at least one neighbor is weighted by the Jaccard index of their neighborhoods,
    /// and pairs weighted below `prune` are dropped.
    pub fn build(embedding: &ArrayView2<f64>, k: usize, prune: f64) -> Result<NeighborGraph> {
        if k == 0 {
            return Err(ScanError::Config("neighbor count must be positive".into()));
        }
        let n = embedding.nrows();
        if n < 2 {
            return Err(ScanError::Data(format!("cannot build a neighbor graph on {n} cells")));
        }
        let knn = knn(embedding, k - 1);
        let k = knn.k() + 1;

        // for each cell m, the cells whose neighborhood contains m
        let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, row) in knn.indices.axis_iter(Axis(0)).enumerate() {
            reverse[i].push(i);
            for &m in row {
                reverse[m].push(i);
            }
        }

        let mut edges = (0..n)
            .into_par_iter()
            .map_init(
                || (vec![0u32; n], Vec::new()),
                |(shared, touched), i| {
                    let row = knn.indices.row(i);
                    for &m in std::iter::once(&i).chain(row.iter()) {
                        for &j in &reverse[m] {
                            if j > i {
                                if shared[j] == 0 {
                                    touched.push(j);
                                }
                                shared[j] += 1;
                            }
                        }
                    }
                    let mut out = Vec::with_capacity(touched.len());
                    for &j in touched.iter() {
                        let s = f64::from(shared[j]);
                        let w = s / (2.0 * k as f64 - s);
                        if w >= prune {
                            out.push((i, j, w));
                        }
                        shared[j] = 0;
                    }
                    touched.clear();
                    out
                },
            )
            .flatten()
            .collect::<Vec<_>>();
        edges.par_sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        info!("snn graph: {n} cells, k = {k}, {} edges", edges.len());
        Ok(NeighborGraph {
            n_cells: n,
            k,
            knn,
            edges,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_distr::Normal;
    use rand_pcg::Pcg64Mcg;

    fn brute_force(query: &Array2<f64>, reference: &Array2<f64>, k: usize, skip_self: bool) -> Vec<Vec<usize>> {
        query
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(i, q)| {
                let mut d = reference
                    .axis_iter(Axis(0))
                    .enumerate()
                    .filter(|(j, _)| !(skip_self && *j == i))
                    .map(|(j, r)| ((&q - &r).mapv(|x| x * x).sum(), j))
                    .collect::<Vec<_>>();
                d.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                d.into_iter().take(k).map(|(_, j)| j).collect()
            })
            .collect()
    }

    fn points(n: usize, dim: usize, seed: u64) -> Array2<f64> {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        Array2::random_using((n, dim), Normal::new(0.0, 1.0).unwrap(), &mut rng)
    }

    #[test]
    fn test_knn_matches_brute_force() {
        let x = points(300, 5, 0);
        let nn = knn(&x.view(), 10);
        let oracle = brute_force(&x, &x, 10, true);
        for (i, expected) in oracle.iter().enumerate() {
            assert_eq!(nn.indices.row(i).to_vec(), *expected);
        }
        for row in nn.distances.axis_iter(Axis(0)) {
            for w in row.to_vec().windows(2) {
                assert!(w[0] <= w[1]);
            }
        }
    }

    #[test]
    fn test_knn_between_matches_brute_force() {
        let q = points(50, 4, 1);
        let r = points(120, 4, 2);
        let nn = knn_between(&q.view(), &r.view(), 7);
        let oracle = brute_force(&q, &r, 7, false);
        for (i, expected) in oracle.iter().enumerate() {
            assert_eq!(nn.indices.row(i).to_vec(), *expected);
        }
    }

    #[test]
    fn test_k_clamped() {
        let x = array![[0.0], [1.0], [3.0]];
        let nn = knn(&x.view(), 10);
        assert_eq!(nn.k(), 2);
        assert_eq!(nn.indices.row(0).to_vec(), vec![1, 2]);
        assert_eq!(nn.distances.row(2).to_vec(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_snn_two_groups() {
        // two well separated groups of 5 points on a line
        let x = array![[0.0], [0.1], [0.2], [0.3], [0.4], [10.0], [10.1], [10.2], [10.3], [10.4]];
        let g = NeighborGraph::build(&x.view(), 5, 0.0).unwrap();
        assert_eq!(g.k, 5);
        // every group's neighborhood is the whole group
        assert_eq!(g.edges.len(), 20);
        for &(i, j, w) in &g.edges {
            assert!(i < j);
            assert_eq!(i < 5, j < 5);
            assert_eq!(w, 1.0);
        }
    }

    #[test]
    fn test_snn_jaccard_and_prune() {
        let x = points(80, 3, 3);
        let k = 6;
        let g = NeighborGraph::build(&x.view(), k, 0.0).unwrap();
        let sets = (0..80)
            .map(|i| {
                let mut s = g.knn.indices.row(i).to_vec();
                s.push(i);
                s.into_iter().collect::<std::collections::BTreeSet<_>>()
            })
            .collect::<Vec<_>>();
        for &(i, j, w) in &g.edges {
            let inter = sets[i].intersection(&sets[j]).count() as f64;
            let union = sets[i].union(&sets[j]).count() as f64;
            assert!((w - inter / union).abs() < 1e-12);
        }

        let pruned = NeighborGraph::build(&x.view(), k, 0.2).unwrap();
        assert!(pruned.edges.iter().all(|e| e.2 >= 0.2));
        assert!(pruned.edges.len() < g.edges.len());
    }

    #[test]
    fn test_invalid() {
        let x = points(10, 2, 4);
        assert!(matches!(NeighborGraph::build(&x.view(), 0, 0.1), Err(ScanError::Config(_))));
        let one = points(1, 2, 4);
        assert!(matches!(NeighborGraph::build(&one.view(), 3, 0.1), Err(ScanError::Data(_))));
    }
}
