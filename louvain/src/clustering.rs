use std::collections::BTreeMap;

/// Assignment of each node to a single integer cluster label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clustering {
    labels: Vec<usize>,
    num_clusters: usize,
}

impl Clustering {
    /// Each node in its own cluster
    pub fn singletons(num_nodes: usize) -> Self {
        Clustering {
            labels: (0..num_nodes).collect(),
            num_clusters: num_nodes,
        }
    }

    /// Initialize the clustering with a known set of labels. Unused labels are compacted away.
    pub fn from_labels(input_labels: &[usize]) -> Self {
        let num_clusters = input_labels.iter().max().map_or(0, |m| m + 1);
        let mut r = Clustering {
            labels: input_labels.to_vec(),
            num_clusters,
        };
        r.remove_empty_clusters();
        r
    }

    /// Node lists of each cluster
    pub fn nodes_per_cluster(&self) -> Vec<Vec<usize>> {
        let mut cluster_lists = vec![Vec::new(); self.num_clusters];
        for (node, &label) in self.labels.iter().enumerate() {
            cluster_lists[label].push(node)
        }
        cluster_lists
    }

    /// Label of `node`
    pub fn get(&self, node: usize) -> usize {
        self.labels[node]
    }

    /// Set the label of `node`
    pub fn set(&mut self, node: usize, label: usize) {
        self.labels[node] = label;
        if label >= self.num_clusters {
            self.num_clusters = label + 1;
        }
    }

    /// Total number of nodes
    pub fn nodes(&self) -> usize {
        self.labels.len()
    }

    /// Number of distinct clusters
    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    /// The labels, indexed by node
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Consume the clustering, returning the labels
    pub fn into_labels(self) -> Vec<usize> {
        self.labels
    }

    /// Renumber labels to 0..n, dropping unused ones and keeping the relative order of the rest.
    pub fn remove_empty_clusters(&mut self) {
        let mut counts = vec![0usize; self.num_clusters];
        for &l in &self.labels {
            counts[l] += 1;
        }

        let mut new_labels = vec![usize::MAX; self.num_clusters];
        let mut next = 0;
        for (old, &count) in counts.iter().enumerate() {
            if count > 0 {
                new_labels[old] = next;
                next += 1;
            }
        }

        for l in self.labels.iter_mut() {
            *l = new_labels[*l];
        }
        self.num_clusters = next;
    }

    /// Take a clustering of the cluster labels, and reassign each node to its cluster's cluster.
    pub fn merge_clusters(&mut self, cluster_clustering: &Clustering) {
        for l in self.labels.iter_mut() {
            *l = cluster_clustering.get(*l);
        }
        self.num_clusters = cluster_clustering.num_clusters();
        self.remove_empty_clusters();
    }

    /// Relabel so that cluster 0 is the largest; equal sizes keep their previous relative order.
    pub fn relabel_by_size(&mut self) {
        let mut hist: BTreeMap<usize, usize> = BTreeMap::new();
        for &l in &self.labels {
            *hist.entry(l).or_default() += 1;
        }
        let mut hist = hist.into_iter().collect::<Vec<_>>();
        // stable sort, so ties stay in label order
        hist.sort_by(|(_, x), (_, y)| y.cmp(x));

        let mut map = vec![0; self.num_clusters];
        for (new, (old, _)) in hist.into_iter().enumerate() {
            map[old] = new;
        }
        for l in self.labels.iter_mut() {
            *l = map[*l];
        }
    }
}
