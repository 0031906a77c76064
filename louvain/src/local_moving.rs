use crate::{Clustering, Network, ZeroVec};
use rand::{seq::SliceRandom, Rng};

/// Standard local moving: visit nodes in random order, moving each to the neighboring cluster
/// with the largest modularity gain, until a full cycle of visits moves nothing.
#[derive(Default)]
pub(crate) struct LocalMoving {
    resolution: f64,
    cluster_weights: Vec<f64>,
    nodes_per_cluster: Vec<usize>,
    unused_clusters: Vec<usize>,
    node_order: Vec<usize>,
    edge_weight_per_cluster: Vec<f64>,
    neighboring_clusters: Vec<usize>,
}

impl LocalMoving {
    pub fn new(resolution: f64) -> Self {
        LocalMoving {
            resolution,
            ..LocalMoving::default()
        }
    }

    /// Returns true if any node changed cluster.
    pub fn iterate(&mut self, n: &Network, c: &mut Clustering, rng: &mut impl Rng) -> bool {
        let num_nodes = n.nodes();
        if num_nodes == 0 || n.total_edge_weight() == 0.0 {
            return false;
        }

        let mut update = false;
        let two_m = 2.0 * n.total_edge_weight();

        self.cluster_weights.zero_len(num_nodes);
        self.nodes_per_cluster.zero_len(num_nodes);

        for i in 0..num_nodes {
            self.cluster_weights[c.get(i)] += n.weight(i);
            self.nodes_per_cluster[c.get(i)] += 1;
        }

        // stack of unused cluster ids
        let mut num_unused_clusters = 0;
        self.unused_clusters.zero_len(num_nodes);
        for i in (0..num_nodes).rev() {
            if self.nodes_per_cluster[i] == 0 {
                self.unused_clusters[num_unused_clusters] = i;
                num_unused_clusters += 1;
            }
        }

        self.node_order.clear();
        self.node_order.extend(0..num_nodes);
        self.node_order.shuffle(rng);

        self.edge_weight_per_cluster.zero_len(num_nodes);
        self.neighboring_clusters.zero_len(num_nodes);

        let mut num_stable_nodes = 0;
        let mut i = 0;

        while num_stable_nodes < num_nodes {
            let j = self.node_order[i];
            let current_cluster = c.get(j);
            let node_weight = n.weight(j);

            // Remove the node from its current cluster.
            self.cluster_weights[current_cluster] -= node_weight;
            self.nodes_per_cluster[current_cluster] -= 1;
            if self.nodes_per_cluster[current_cluster] == 0 {
                self.unused_clusters[num_unused_clusters] = current_cluster;
                num_unused_clusters += 1;
            }

            // Candidate clusters: an empty one, plus every cluster the node has an edge into.
            self.neighboring_clusters[0] = self.unused_clusters[num_unused_clusters - 1];
            let mut num_neighboring_clusters = 1;
            for (target, edge_weight) in n.neighbors(j) {
                let neighbor_cluster = c.get(target);
                if self.edge_weight_per_cluster[neighbor_cluster] == 0.0 {
                    self.neighboring_clusters[num_neighboring_clusters] = neighbor_cluster;
                    num_neighboring_clusters += 1;
                }
                self.edge_weight_per_cluster[neighbor_cluster] += edge_weight;
            }

            // The old cluster wins ties, other ties go to the lowest label.
            let mut best_cluster = current_cluster;
            let mut max_qv_increment = self.edge_weight_per_cluster[current_cluster]
                - node_weight * self.cluster_weights[current_cluster] * self.resolution / two_m;

            for &l in &self.neighboring_clusters[..num_neighboring_clusters] {
                let qv_increment =
                    self.edge_weight_per_cluster[l] - node_weight * self.cluster_weights[l] * self.resolution / two_m;
                if qv_increment > max_qv_increment {
                    best_cluster = l;
                    max_qv_increment = qv_increment;
                } else if qv_increment == max_qv_increment && best_cluster != current_cluster && l < best_cluster {
                    best_cluster = l;
                }
            }
            for &l in &self.neighboring_clusters[..num_neighboring_clusters] {
                self.edge_weight_per_cluster[l] = 0.0;
            }

            self.cluster_weights[best_cluster] += node_weight;
            self.nodes_per_cluster[best_cluster] += 1;
            if best_cluster == self.unused_clusters[num_unused_clusters - 1] {
                num_unused_clusters -= 1;
            }

            if best_cluster == current_cluster {
                num_stable_nodes += 1;
            } else {
                c.set(j, best_cluster);
                num_stable_nodes = 1;
                update = true;
            }

            i = (i + 1) % num_nodes;
        }

        if update {
            c.remove_empty_clusters();
        }

        update
    }
}
