use crate::local_moving::LocalMoving;
use crate::objective::modularity;
use crate::{Clustering, Network};
use log::{debug, info};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Perform the Louvain clustering algorithm
pub struct Louvain {
    resolution: f64,
    rng: ChaCha20Rng,
    local_moving: LocalMoving,
}

/// Default resolution for Louvain
pub const DEFAULT_RESOLUTION: f64 = 1.0;

/// Best partition found over all random starts
#[derive(Debug, Clone)]
pub struct LouvainResult {
    /// Labels, 0 being the largest cluster
    pub clustering: Clustering,
    /// Modularity of `clustering`
    pub modularity: f64,
}

impl Louvain {
    /// Initialize the algorithm with the given resolution. All randomness (node visiting order)
    /// is drawn from a generator seeded with `seed`.
    pub fn new(resolution: f64, seed: u64) -> Louvain {
        Louvain {
            resolution,
            rng: ChaCha20Rng::seed_from_u64(seed),
            local_moving: LocalMoving::new(resolution),
        }
    }

    /// Iterate the Louvain algorithm a single level
    pub fn iterate_one_level(&mut self, n: &Network, c: &mut Clustering) -> bool {
        self.local_moving.iterate(n, c, &mut self.rng)
    }

    /// Iterate the Louvain algorithm one step: local moving, then recursion on the aggregate
    /// network. Returns true if cluster labels were updated, otherwise returns false.
    pub fn iterate(&mut self, n: &Network, c: &mut Clustering) -> bool {
        let mut update = self.local_moving.iterate(n, c, &mut self.rng);

        if c.num_clusters() == n.nodes() {
            return update;
        }

        let reduced_n = n.create_reduced_network(c);
        let mut reduced_clusters = Clustering::singletons(reduced_n.nodes());

        update |= self.iterate(&reduced_n, &mut reduced_clusters);

        c.merge_clusters(&reduced_clusters);

        update
    }

    /// Run `n_starts` independent optimizations of at most `n_iterations` steps each, keeping the
    /// partition with the highest modularity (the earliest start wins ties).
    pub fn run(&mut self, n: &Network, n_starts: usize, n_iterations: usize) -> LouvainResult {
        let mut best: Option<LouvainResult> = None;

        for start in 0..n_starts.max(1) {
            let mut c = Clustering::singletons(n.nodes());
            for it in 0..n_iterations.max(1) {
                if !self.iterate(n, &mut c) {
                    debug!("start {start}: converged after {} iterations", it + 1);
                    break;
                }
            }

            let q = modularity(self.resolution, n, &c);
            debug!("start {start}: {} clusters, modularity {q:.6}", c.num_clusters());
            if best.as_ref().map_or(true, |b| q > b.modularity) {
                best = Some(LouvainResult {
                    clustering: c,
                    modularity: q,
                });
            }
        }

        let mut best = best.unwrap_or_else(|| LouvainResult {
            clustering: Clustering::singletons(n.nodes()),
            modularity: 0.0,
        });
        best.clustering.relabel_by_size();

        info!(
            "louvain: {} nodes, {} clusters, modularity {:.4} at resolution {}",
            n.nodes(),
            best.clustering.num_clusters(),
            best.modularity,
            self.resolution
        );
        best
    }
}
