//! Graph-based clustering of cells

use crate::nn::NeighborGraph;
use log::info;
use louvain::{Louvain, Network};
use scan_types::{ClusterKey, ClusterLabels, Result, ScanError};

/// Partition the cells of `graph` by modularity optimization at `key.resolution`.
///
/// Runs `starts` seeded restarts of at most `iterations` Louvain steps each and keeps the
/// partition with the highest modularity. Labels are numbered by decreasing cluster size.
pub fn find_clusters(graph: &NeighborGraph, key: ClusterKey, starts: usize, iterations: usize) -> Result<ClusterLabels> {
    if !(key.resolution > 0.0) {
        return Err(ScanError::Config(format!(
            "resolution must be positive, got {}",
            key.resolution
        )));
    }
    if starts == 0 || iterations == 0 {
        return Err(ScanError::Config("louvain starts and iterations must be positive".into()));
    }

    let network = Network::from_edges(graph.n_cells, graph.edges.iter().copied());
    let result = Louvain::new(key.resolution, key.seed).run(&network, starts, iterations);

    let num_clusters = result.clustering.num_clusters();
    info!("{key}: {num_clusters} clusters");
    Ok(ClusterLabels {
        key,
        labels: result.clustering.into_labels(),
        num_clusters,
        modularity: result.modularity,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{Array2, Axis};
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_distr::Normal;
    use rand_pcg::Pcg64Mcg;

    /// three Gaussian blobs of 40 points each in 4 dimensions
    fn blobs(seed: u64) -> Array2<f64> {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let mut x = Array2::random_using((120, 4), Normal::new(0.0, 0.3).unwrap(), &mut rng);
        for (i, mut row) in x.axis_iter_mut(Axis(0)).enumerate() {
            row[i / 40] += 10.0;
        }
        x
    }

    #[test]
    fn test_recovers_blobs() {
        let x = blobs(0);
        let g = NeighborGraph::build(&x.view(), 15, 1.0 / 15.0).unwrap();
        let labels = find_clusters(&g, ClusterKey::new("pca", 0.8, 0), 5, 10).unwrap();
        assert_eq!(labels.num_clusters, 3);
        for blob in 0..3 {
            let l = labels.labels[blob * 40];
            assert!(labels.labels[blob * 40..(blob + 1) * 40].iter().all(|&x| x == l));
        }
        assert_eq!(labels.sizes(), vec![40, 40, 40]);
        assert!(labels.modularity > 0.5);
    }

    #[test]
    fn test_reproducible() {
        let x = blobs(1);
        let g = NeighborGraph::build(&x.view(), 10, 0.0).unwrap();
        let key = ClusterKey::new("pca", 2.0, 7);
        let a = find_clusters(&g, key.clone(), 3, 10).unwrap();
        let b = find_clusters(&g, key, 3, 10).unwrap();
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn test_resolution_granularity() {
        let x = blobs(2);
        let g = NeighborGraph::build(&x.view(), 10, 0.0).unwrap();
        let coarse = find_clusters(&g, ClusterKey::new("pca", 0.1, 0), 3, 10).unwrap();
        let fine = find_clusters(&g, ClusterKey::new("pca", 3.0, 0), 3, 10).unwrap();
        assert!(fine.num_clusters > coarse.num_clusters);
    }

    #[test]
    fn test_invalid_resolution() {
        let x = blobs(3);
        let g = NeighborGraph::build(&x.view(), 5, 0.0).unwrap();
        assert!(matches!(
            find_clusters(&g, ClusterKey::new("pca", 0.0, 0), 1, 1),
            Err(ScanError::Config(_))
        ));
    }
}
