use crate::{Clustering, Network};

/// Modularity of a clustering with a resolution parameter:
/// `sum_c [ w_in(c) / m - resolution * (K_c / 2m)^2 ]`, where `w_in(c)` is the edge weight inside
/// cluster `c`, `K_c` the summed node weight of `c`, and `m` the total edge weight.
pub fn modularity(resolution: f64, network: &Network, clustering: &Clustering) -> f64 {
    let m = network.total_edge_weight();
    if m == 0.0 {
        return 0.0;
    }

    let mut internal = 0.0f64;
    let mut cluster_weights = vec![0.0; clustering.num_clusters()];

    for i in 0..network.nodes() {
        let ci = clustering.get(i);
        internal += network.self_loop(i);
        cluster_weights[ci] += network.weight(i);

        for (j, w) in network.neighbors(i) {
            if j > i && clustering.get(j) == ci {
                internal += w;
            }
        }
    }

    let mut quality = internal / m;
    for cluster_weight in cluster_weights {
        quality -= resolution * (cluster_weight / (2.0 * m)).powi(2);
    }

    quality
}
