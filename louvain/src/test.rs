use crate::louvain::Louvain;
use crate::objective::modularity;
use crate::{Clustering, Network};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::collections::HashMap;

/// Generate a random planted-partition graph: each edge stays inside its cluster with
/// probability `1 - mu`.
fn gen_sample_network(
    rng: &mut impl Rng,
    num_clusters: usize,
    nodes_per_cluster: usize,
    mean_degree: f64,
    mu: f64,
) -> (Network, Clustering) {
    assert!(num_clusters > 1);
    assert!(nodes_per_cluster > 1);

    let total_nodes = num_clusters * nodes_per_cluster;
    let total_edges = (total_nodes as f64 * mean_degree / 2.0).ceil() as usize;
    let cluster = (0..total_nodes).map(|n| n / nodes_per_cluster).collect::<Vec<_>>();

    let mut edges = Vec::with_capacity(total_edges);
    for _ in 0..total_edges {
        let in_cluster = rng.gen_bool(1.0 - mu);
        let n1 = rng.gen_range(0..total_nodes);
        let c1 = cluster[n1];

        loop {
            let n2 = if in_cluster {
                rng.gen_range(c1 * nodes_per_cluster..(c1 + 1) * nodes_per_cluster)
            } else {
                rng.gen_range(0..total_nodes)
            };
            if n1 != n2 && (cluster[n2] == c1) == in_cluster {
                edges.push((n1, n2, 1.0));
                break;
            }
        }
    }

    (Network::from_edges(total_nodes, edges), Clustering::from_labels(&cluster))
}

/// Fraction of node pairs on which two clusterings agree (same / different cluster)
fn rand_index(a: &Clustering, b: &Clustering) -> f64 {
    let n = a.nodes();
    let mut agree = 0usize;
    let mut total = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            total += 1;
            if (a.get(i) == a.get(j)) == (b.get(i) == b.get(j)) {
                agree += 1;
            }
        }
    }
    agree as f64 / total as f64
}

#[test]
fn test_recovers_planted_partition() {
    let mut rng = Pcg64Mcg::seed_from_u64(0);
    let (network, truth) = gen_sample_network(&mut rng, 5, 40, 12.0, 0.05);

    let result = Louvain::new(1.0, 0).run(&network, 5, 10);
    assert_eq!(result.clustering.num_clusters(), 5);
    assert!(rand_index(&result.clustering, &truth) > 0.99);

    // the recovered partition is at least as good as the planted one
    assert!(result.modularity >= modularity(1.0, &network, &truth) - 1e-9);
}

#[test]
fn test_seed_reproducibility() {
    let mut rng = Pcg64Mcg::seed_from_u64(1);
    let (network, _) = gen_sample_network(&mut rng, 4, 30, 8.0, 0.3);

    let r1 = Louvain::new(0.8, 42).run(&network, 3, 10);
    let r2 = Louvain::new(0.8, 42).run(&network, 3, 10);
    assert_eq!(r1.clustering, r2.clustering);
    assert_eq!(r1.modularity, r2.modularity);
}

#[test]
fn test_resolution_controls_granularity() {
    let mut rng = Pcg64Mcg::seed_from_u64(2);
    let (network, _) = gen_sample_network(&mut rng, 6, 25, 10.0, 0.2);

    let coarse = Louvain::new(0.1, 0).run(&network, 3, 10);
    let fine = Louvain::new(3.0, 0).run(&network, 3, 10);
    assert!(fine.clustering.num_clusters() > coarse.clustering.num_clusters());
}

#[test]
fn test_labels_ordered_by_size() {
    // a 6-clique and a 3-clique
    let mut edges = Vec::new();
    for i in 0..6 {
        for j in (i + 1)..6 {
            edges.push((i, j, 1.0));
        }
    }
    edges.extend([(6, 7, 1.0), (7, 8, 1.0), (6, 8, 1.0), (0, 8, 0.1)]);
    // put the small clique first so its initial labels are lower
    let perm = [3, 4, 5, 6, 7, 8, 0, 1, 2];
    let edges = edges.into_iter().map(|(i, j, w)| (perm[i], perm[j], w)).collect::<Vec<_>>();
    let network = Network::from_edges(9, edges);

    let result = Louvain::new(1.0, 7).run(&network, 2, 10);
    let labels = result.clustering.labels();
    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for &l in labels {
        *sizes.entry(l).or_default() += 1;
    }
    assert_eq!(sizes[&0], 6);
    assert_eq!(sizes[&1], 3);
    assert_eq!(labels[0], 1);
    assert_eq!(labels[3], 0);
}

#[test]
fn test_edgeless_network() {
    let network = Network::from_edges(4, Vec::new());
    let result = Louvain::new(1.0, 0).run(&network, 2, 2);
    assert_eq!(result.clustering.num_clusters(), 4);
}
