use crate::Clustering;
use fxhash::FxHashMap;

/// Weighted undirected graph being clustered. Node weights are weighted degrees, so that the
/// local-moving gain is the modularity gain.
#[derive(Debug, Clone, Default)]
pub struct Network {
    node_weights: Vec<f64>,
    neighbors: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    total_edge_weight: f64,
}

impl Network {
    /// Build a network over `n_nodes` nodes from `(i, j, weight)` edges. Each undirected edge should
    /// be listed once; repeated pairs have their weights summed. Non-positive weights are ignored.
    pub fn from_edges<I: IntoIterator<Item = (usize, usize, f64)>>(n_nodes: usize, edges: I) -> Network {
        let mut memo: FxHashMap<(usize, usize), f64> = FxHashMap::default();
        let mut self_loops = vec![0.0; n_nodes];

        for (i, j, w) in edges {
            if w <= 0.0 {
                continue;
            }
            if i == j {
                self_loops[i] += w;
            } else {
                let key = if i < j { (i, j) } else { (j, i) };
                *memo.entry(key).or_insert(0.0) += w;
            }
        }

        let mut pairs = memo.into_iter().collect::<Vec<_>>();
        pairs.sort_by_key(|&(k, _)| k);

        let mut neighbors = vec![Vec::new(); n_nodes];
        let mut node_weights = vec![0.0; n_nodes];
        let mut total_edge_weight = 0.0;

        for ((i, j), w) in pairs {
            neighbors[i].push((j, w));
            neighbors[j].push((i, w));
            node_weights[i] += w;
            node_weights[j] += w;
            total_edge_weight += w;
        }
        for (i, &w) in self_loops.iter().enumerate() {
            node_weights[i] += 2.0 * w;
            total_edge_weight += w;
        }

        Network {
            node_weights,
            neighbors,
            self_loops,
            total_edge_weight,
        }
    }

    /// Number of nodes in the graph
    pub fn nodes(&self) -> usize {
        self.node_weights.len()
    }

    /// Get the node weight of `node`.
    pub fn weight(&self, node: usize) -> f64 {
        self.node_weights[node]
    }

    /// Weight of the self-loop on `node` (edges internal to an aggregated cluster)
    pub fn self_loop(&self, node: usize) -> f64 {
        self.self_loops[node]
    }

    /// Iterator over pairs of (adjacent node id, edge_weight) for all neighbors of `node`,
    /// excluding the node itself.
    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.neighbors[node].iter().copied()
    }

    /// Total edge weight of the original graph, each undirected edge counted once.
    /// Aggregation preserves it.
    pub fn total_edge_weight(&self) -> f64 {
        self.total_edge_weight
    }

    /// Number of undirected edges, self-loops excluded
    pub fn edges(&self) -> usize {
        self.neighbors.iter().map(|n| n.len()).sum::<usize>() / 2
    }

    /// Creates a reduced (or aggregate) network based on a clustering.
    /// Each node in the reduced network corresponds to a cluster of nodes in
    /// the original network. The weight of a node in the reduced network equals
    /// the sum of the weights of the nodes in the corresponding cluster in the
    /// original network. Edges between two clusters are summed; edges within a
    /// cluster become a self-loop, so the modularity of the aggregate equals the
    /// modularity of the clustering.
    pub fn create_reduced_network(&self, clustering: &Clustering) -> Network {
        let k = clustering.num_clusters();
        let mut node_weights = vec![0.0; k];
        let mut self_loops = vec![0.0; k];
        let mut memo: FxHashMap<(usize, usize), f64> = FxHashMap::default();

        for i in 0..self.nodes() {
            let ci = clustering.get(i);
            node_weights[ci] += self.node_weights[i];
            self_loops[ci] += self.self_loops[i];

            for &(j, w) in &self.neighbors[i] {
                // visit each undirected edge once
                if j < i {
                    continue;
                }
                let cj = clustering.get(j);
                if ci == cj {
                    self_loops[ci] += w;
                } else {
                    let key = if ci < cj { (ci, cj) } else { (cj, ci) };
                    *memo.entry(key).or_insert(0.0) += w;
                }
            }
        }

        let mut pairs = memo.into_iter().collect::<Vec<_>>();
        pairs.sort_by_key(|&(k, _)| k);

        let mut neighbors = vec![Vec::new(); k];
        for ((c1, c2), w) in pairs {
            neighbors[c1].push((c2, w));
            neighbors[c2].push((c1, w));
        }

        Network {
            node_weights,
            neighbors,
            self_loops,
            total_edge_weight: self.total_edge_weight,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_edges() {
        let n = Network::from_edges(4, vec![(0, 1, 1.0), (1, 0, 0.5), (2, 3, 2.0), (3, 3, 1.0), (1, 2, 0.0)]);
        assert_eq!(n.nodes(), 4);
        assert_eq!(n.edges(), 2);
        assert_eq!(n.weight(0), 1.5);
        assert_eq!(n.weight(3), 4.0);
        assert_eq!(n.total_edge_weight(), 4.5);
    }

    #[test]
    fn test_reduced_network_preserves_weight() {
        let n = Network::from_edges(4, vec![(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0), (3, 0, 1.0)]);
        let c = Clustering::from_labels(&[0, 0, 1, 1]);
        let r = n.create_reduced_network(&c);

        assert_eq!(r.nodes(), 2);
        assert_eq!(r.total_edge_weight(), n.total_edge_weight());
        assert_eq!(r.self_loop(0), 1.0);
        assert_eq!(r.self_loop(1), 1.0);
        assert_eq!(r.neighbors(0).collect::<Vec<_>>(), vec![(1, 2.0)]);
        assert_eq!(r.weight(0) + r.weight(1), 8.0);
    }
}
