//! The comparative analysis, stage by stage
//!
//! Stages run strictly in order; each reads the context slots filled by its predecessors and
//! writes its own. Per-gene and per-cluster problems end up in the context diagnostics, while
//! configuration and data errors abort the run.

use crate::cluster::find_clusters;
use crate::config::AnalysisConfig;
use crate::context::{AnalysisContext, INTEGRATED, PCA};
use crate::dim_red::run_pca;
use crate::features::{find_variable_features, select_integration_features};
use crate::integrate::{Anchor, IntegrationInput, Integrator};
use crate::nn::NeighborGraph;
use crate::normalization::{log_normalize, scale_data, ScaledData};
use crate::qc::{compute_qc_metrics, QcFilter};
use diff_exp::{all_markers, compare_groups, condition_de_per_cluster, conserved_markers, ConservedTable, DeTable};
use log::{info, warn};
use ndarray::{Array2, Axis};
use scan_types::{ClusterKey, ClusterLabels, CountMatrix, Diagnostics, Embedding, Result, ScanError};
use std::collections::HashMap;

/// Compute QC metrics and, when thresholds are configured, drop the failing cells.
/// Cells without any counts are always reported.
pub fn run_qc(ctx: &mut AnalysisContext, config: &AnalysisConfig) -> Result<()> {
    let metrics = compute_qc_metrics(&ctx.counts, &config.qc.mito_prefix);
    for (c, &total) in metrics.total_counts.iter().enumerate() {
        if total == 0 {
            let err = ScanError::Data("library size of zero".into());
            ctx.diagnostics.exclude("qc", ctx.counts.cell_ids[c].clone(), &err);
        }
    }

    let filter = QcFilter::from(&config.qc);
    let keep = filter.apply(&metrics);
    let n_cells = ctx.counts.n_cells();
    ctx.set_qc(metrics);
    if keep.len() < n_cells {
        ctx.retain_cells(&keep)?;
    }
    Ok(())
}

/// Log-normalize the merged counts
pub fn normalize(ctx: &mut AnalysisContext, config: &AnalysisConfig) -> Result<()> {
    ctx.normalized = Some(log_normalize(&ctx.counts, config.scale_factor)?);
    Ok(())
}

/// Select variable features on the merged counts and scale them
pub fn select_and_scale(ctx: &mut AnalysisContext, config: &AnalysisConfig) -> Result<()> {
    let vf = find_variable_features(&ctx.counts, config.n_features, config.loess_span);
    ctx.diagnostics.extend(vf.exclusions.iter().cloned());
    if vf.features.is_empty() {
        return Err(ScanError::Data("no variable features could be selected".into()));
    }

    let scaled = scale_data(ctx.normalized()?, &vf.features, config.scale_max);
    ctx.diagnostics.extend(scaled.exclusions.iter().cloned());
    ctx.variable_features = Some(vf);
    ctx.scaled = Some(scaled);
    Ok(())
}

/// Principal components of the scaled variable features, stored as the `pca` embedding
pub fn reduce(ctx: &mut AnalysisContext, config: &AnalysisConfig) -> Result<()> {
    let pca = run_pca(&ctx.scaled()?.data, config.n_components, config.random_seed)?;
    ctx.diagnostics.extend(pca.exclusions.iter().cloned());
    if pca.attained == 0 {
        return Err(ScanError::Numerical("scaled data has no variance to decompose".into()));
    }
    ctx.add_embedding(Embedding {
        name: PCA.to_string(),
        source: format!("pca of {} scaled features", ctx.scaled()?.features.len()),
        coords: pca.embedding.clone(),
        stdev: Some(pca.stdev.clone()),
    })?;
    ctx.pca = Some(pca);
    Ok(())
}

/// Build the neighbor graph on `embedding` and cluster it. Returns the key of the new
/// cluster column.
pub fn cluster(ctx: &mut AnalysisContext, config: &AnalysisConfig, embedding: &str) -> Result<ClusterKey> {
    let graph = NeighborGraph::build(&ctx.embedding(embedding)?.coords.view(), config.neighbor_k, config.snn_prune)?;
    let key = ClusterKey::new(embedding, config.resolution, config.random_seed);
    let labels = find_clusters(&graph, key.clone(), config.louvain_starts, config.louvain_iterations)?;
    ctx.graphs.insert(embedding.to_string(), graph);
    ctx.metadata.add_clustering(labels)?;
    Ok(key)
}

/// Reference and query condition labels
fn reference_and_query(ctx: &AnalysisContext, config: &AnalysisConfig) -> Result<(String, String)> {
    let levels = [ctx.ctrl_label.clone(), ctx.stim_label.clone()];
    let reference = config
        .integration
        .reference_condition
        .clone()
        .unwrap_or_else(|| levels[0].clone());
    match levels.iter().position(|l| *l == reference) {
        Some(i) => Ok((reference, levels[1 - i].clone())),
        None => Err(ScanError::Config(format!(
            "reference condition {reference} is neither {} nor {}",
            levels[0], levels[1]
        ))),
    }
}

/// Align the two conditions and store the corrected `integrated` embedding.
pub fn integrate(ctx: &mut AnalysisContext, config: &AnalysisConfig) -> Result<()> {
    let (reference, query) = reference_and_query(ctx, config)?;
    let reference_cells = ctx.metadata.cells_in_condition(&reference);
    let query_cells = ctx.metadata.cells_in_condition(&query);

    // per-condition feature rankings
    let rankings = [&reference_cells, &query_cells]
        .iter()
        .map(|cells| {
            let counts = ctx.counts.select_cells(cells);
            let vf = find_variable_features(&counts, config.n_features, config.loess_span);
            vf.feature_ids(&counts.gene_ids)
        })
        .collect::<Vec<_>>();
    let features = select_integration_features(&rankings, &ctx.counts.gene_ids, config.n_features);
    let row_of = ctx
        .counts
        .gene_ids
        .iter()
        .enumerate()
        .map(|(i, g)| (g.as_str(), i))
        .collect::<HashMap<_, _>>();
    let rows = features.iter().filter_map(|g| row_of.get(g.as_str()).copied()).collect::<Vec<_>>();

    // a feature constant within either condition cannot be scaled there and is dropped from both
    let normalized = ctx.normalized()?;
    let ref_scaled = scale_data(&normalized.select_cells(&reference_cells), &rows, config.scale_max);
    let query_scaled = scale_data(&normalized.select_cells(&query_cells), &rows, config.scale_max);
    let shared = rows
        .iter()
        .copied()
        .filter(|g| ref_scaled.features.contains(g) && query_scaled.features.contains(g))
        .collect::<Vec<_>>();
    if shared.is_empty() {
        return Err(ScanError::Data("no integration feature varies in both conditions".into()));
    }
    let pick = |scaled: &ScaledData| -> Array2<f64> {
        let idx = shared
            .iter()
            .filter_map(|g| scaled.features.iter().position(|f| f == g))
            .collect::<Vec<_>>();
        scaled.data.select(Axis(0), &idx)
    };
    let reference_scaled = pick(&ref_scaled);
    let query_scaled_data = pick(&query_scaled);
    let mut exclusions = ref_scaled.exclusions;
    exclusions.extend(query_scaled.exclusions);
    for e in &mut exclusions {
        e.stage = "integration_features".to_string();
    }
    ctx.diagnostics.extend(exclusions);
    info!(
        "integrating {query} onto {reference} over {} features",
        shared.len()
    );

    let embedding = ctx.embedding(PCA)?.coords.clone();
    let input = IntegrationInput {
        reference: reference.clone(),
        query: query.clone(),
        reference_cells: &reference_cells,
        query_cells: &query_cells,
        reference_scaled: reference_scaled.view(),
        query_scaled: query_scaled_data.view(),
        embedding: embedding.view(),
    };
    let result = config
        .integration
        .method
        .integrator(&config.integration, config.random_seed)
        .integrate(&input)?;

    if result.low_confidence {
        ctx.diagnostics.warn(format!(
            "integration of {query} onto {reference} found only {} anchors (minimum {}); the integrated embedding is low confidence",
            result.anchors.len(),
            config.integration.min_anchors
        ));
    }
    ctx.add_embedding(Embedding {
        name: INTEGRATED.to_string(),
        source: format!("cca anchors, {} onto {}", query, reference),
        coords: result.embedding.clone(),
        stdev: None,
    })?;
    ctx.integration_features = Some(shared.iter().map(|&g| ctx.counts.gene_ids[g].clone()).collect());
    ctx.integration = Some(result);
    Ok(())
}

/// Differential expression tables of a run
#[derive(Clone, Debug)]
pub struct DeReport {
    /// All query cells against all reference cells
    pub condition: DeTable,
    /// Query against reference within each integrated cluster
    pub condition_per_cluster: DeTable,
    /// Every integrated cluster against the rest
    pub markers: DeTable,
    /// Markers of each integrated cluster conserved across conditions, by cluster id
    pub conserved: Vec<ConservedTable>,
}

/// Run every differential expression comparison on the integrated clustering
pub fn differential_expression(ctx: &mut AnalysisContext, config: &AnalysisConfig, key: &ClusterKey) -> Result<DeReport> {
    let (reference, query) = reference_and_query(ctx, config)?;
    let normalized = ctx.normalized()?;
    let genes = &normalized.gene_ids;
    let labels = ctx.metadata.clustering(key)?;
    let conditions = &ctx.metadata.conditions;
    let params = &config.de;

    let condition = compare_groups(
        genes,
        &normalized.data,
        &ctx.metadata.cells_in_condition(&query),
        &ctx.metadata.cells_in_condition(&reference),
        params,
    )?
    .with_condition(&format!("{query}_vs_{reference}"));
    let per_cluster =
        condition_de_per_cluster(genes, &normalized.data, &labels.labels, conditions, &query, &reference, params)?;
    let markers = all_markers(genes, &normalized.data, &labels.labels, params)?;
    let conserved = labels
        .cluster_ids()
        .into_iter()
        .map(|c| conserved_markers(genes, &normalized.data, &labels.labels, c, conditions, params))
        .collect::<Result<Vec<_>>>()?;

    let exclusions = [&condition, &per_cluster, &markers]
        .into_iter()
        .flat_map(|t| t.exclusions.iter().cloned())
        .chain(conserved.iter().flat_map(|t| t.exclusions.iter().cloned()))
        .collect::<Vec<_>>();
    ctx.diagnostics.extend(exclusions);

    Ok(DeReport {
        condition,
        condition_per_cluster: per_cluster,
        markers,
        conserved,
    })
}

/// Outputs of a complete comparative analysis
#[derive(Debug)]
pub struct ComparativeReport {
    /// Final context: metadata with QC and cluster columns, embeddings, graphs
    pub context: AnalysisContext,
    /// Clustering of the uncorrected principal components
    pub unintegrated_clusters: ClusterKey,
    /// Clustering of the integrated embedding
    pub integrated_clusters: ClusterKey,
    /// Differential expression tables
    pub de: DeReport,
    /// Canonically ordered exclusions and warnings of all stages
    pub diagnostics: Diagnostics,
}

impl ComparativeReport {
    /// Anchors of the integration
    pub fn anchors(&self) -> &[Anchor] {
        self.context.integration.as_ref().map_or(&[], |r| r.anchors.as_slice())
    }

    /// True if the integration was flagged low-confidence
    pub fn low_confidence(&self) -> bool {
        self.context.integration.as_ref().map_or(false, |r| r.low_confidence)
    }

    /// Labels of the integrated clustering
    pub fn integrated_labels(&self) -> Result<&ClusterLabels> {
        self.context.metadata.clustering(&self.integrated_clusters)
    }

    /// Fraction of cells from each condition per integrated cluster, as (cluster, condition, fraction)
    pub fn condition_composition(&self) -> Result<Vec<(usize, String, f64)>> {
        let labels = self.integrated_labels()?;
        let conditions = &self.context.metadata.conditions;
        let levels = self.context.metadata.condition_levels();
        let mut out = Vec::new();
        for c in labels.cluster_ids() {
            let members = labels.members(c);
            for level in &levels {
                let n = members.iter().filter(|&&m| conditions[m] == *level).count();
                out.push((c, level.clone(), n as f64 / members.len().max(1) as f64));
            }
        }
        Ok(out)
    }
}

/// Run the whole comparison of two conditions:
/// QC, normalization, variable features, scaling, PCA, unintegrated clusters, anchor
/// integration, integrated clusters and differential expression.
pub fn run_comparative_analysis(
    config: &AnalysisConfig,
    ctrl: (&CountMatrix, &str),
    stim: (&CountMatrix, &str),
) -> Result<ComparativeReport> {
    config.validate()?;
    let mut ctx = AnalysisContext::new(ctrl.0, ctrl.1, stim.0, stim.1)?;
    info!(
        "comparing {} ({} cells) with {} ({} cells) over {} genes",
        ctrl.1,
        ctrl.0.n_cells(),
        stim.1,
        stim.0.n_cells(),
        ctx.counts.n_genes()
    );

    run_qc(&mut ctx, config)?;
    normalize(&mut ctx, config)?;
    select_and_scale(&mut ctx, config)?;
    reduce(&mut ctx, config)?;
    let unintegrated = cluster(&mut ctx, config, PCA)?;
    integrate(&mut ctx, config)?;
    let integrated = cluster(&mut ctx, config, INTEGRATED)?;
    let de = differential_expression(&mut ctx, config, &integrated)?;

    let mut diagnostics = ctx.diagnostics.clone();
    diagnostics.finalize();
    if !diagnostics.is_empty() {
        warn!("{} units were excluded, see the diagnostics report", diagnostics.len());
    }
    Ok(ComparativeReport {
        context: ctx,
        unintegrated_clusters: unintegrated,
        integrated_clusters: integrated,
        de,
        diagnostics,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::IntegrationConfig;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Poisson};
    use rand_pcg::Pcg64Mcg;

    /// Two conditions with three cell types of 40 cells each. Types differ in 10 marker genes
    /// each; the stimulated condition additionally induces genes 30..35 in every cell.
    fn conditions(seed: u64) -> (CountMatrix, CountMatrix) {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let n_genes = 200;
        let genes = (0..n_genes).map(|g| format!("G{g:03}")).collect::<Vec<_>>();
        let make = |stim: bool, rng: &mut Pcg64Mcg| {
            let n = 120;
            let mut dense = Array2::<u32>::zeros((n_genes, n));
            for c in 0..n {
                let t = c % 3;
                for g in 0..n_genes {
                    let mut lambda = 1.0;
                    if g / 10 == t {
                        lambda = 12.0;
                    }
                    if stim && (30..35).contains(&g) {
                        lambda = 15.0;
                    }
                    dense[[g, c]] = Poisson::new(lambda).unwrap().sample(rng) as u32;
                }
            }
            let cells = (0..n).map(|c| format!("BC{c}-1")).collect();
            CountMatrix::from_dense(genes.clone(), cells, &dense).unwrap()
        };
        let ctrl = make(false, &mut rng);
        let stim = make(true, &mut rng);
        (ctrl, stim)
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            n_features: 60,
            n_components: 10,
            neighbor_k: 15,
            resolution: 0.5,
            louvain_starts: 3,
            integration: IntegrationConfig {
                n_cc: 5,
                k_score: 20,
                k_weight: 50,
                k_filter: Some(100),
                min_anchors: 20,
                ..IntegrationConfig::default()
            },
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn test_end_to_end() {
        let (ctrl, stim) = conditions(0);
        let report = run_comparative_analysis(&config(), (&ctrl, "CTRL"), (&stim, "STIM")).unwrap();
        let ctx = &report.context;

        assert_eq!(ctx.metadata.n_cells(), 240);
        assert!(ctx.metadata.cell_ids.iter().all(|c| c.starts_with("CTRL_") || c.starts_with("STIM_")));
        assert_eq!(ctx.variable_features().unwrap().features.len(), 60);
        assert_eq!(ctx.embedding(PCA).unwrap().dims(), 10);
        assert_eq!(ctx.embedding(INTEGRATED).unwrap().dims(), 10);
        assert!(!report.low_confidence());
        assert!(!report.anchors().is_empty());

        // cluster columns of both embeddings coexist
        assert_eq!(ctx.metadata.clusterings.len(), 2);
        assert_ne!(report.unintegrated_clusters, report.integrated_clusters);

        // the integrated clusters mix both conditions
        let labels = report.integrated_labels().unwrap();
        assert!(labels.num_clusters >= 3);
        for (_, _, frac) in report.condition_composition().unwrap() {
            assert!(frac > 0.1, "{:?}", report.condition_composition());
        }

        // induced genes lead the condition comparison
        let mut top = report.de.condition.rows.iter().take(5).map(|r| r.gene.as_str()).collect::<Vec<_>>();
        top.sort_unstable();
        assert_eq!(top, vec!["G030", "G031", "G032", "G033", "G034"]);
        assert!(report.de.condition.rows[0].log2_fold_change > 2.0);
        assert_eq!(
            report.de.condition.rows[0].condition.as_deref(),
            Some("STIM_vs_CTRL")
        );

        assert_eq!(report.de.conserved.len(), labels.num_clusters);
        assert!(!report.de.markers.rows.is_empty());
    }

    #[test]
    fn test_reproducible() {
        let (ctrl, stim) = conditions(1);
        let a = run_comparative_analysis(&config(), (&ctrl, "CTRL"), (&stim, "STIM")).unwrap();
        let b = run_comparative_analysis(&config(), (&ctrl, "CTRL"), (&stim, "STIM")).unwrap();
        assert_eq!(a.integrated_labels().unwrap().labels, b.integrated_labels().unwrap().labels);
        assert_eq!(a.de.markers.rows, b.de.markers.rows);
    }

    #[test]
    fn test_low_confidence_reported() {
        let (ctrl, stim) = conditions(2);
        let mut cfg = config();
        cfg.integration.min_anchors = 1_000_000;
        let report = run_comparative_analysis(&cfg, (&ctrl, "CTRL"), (&stim, "STIM")).unwrap();
        assert!(report.low_confidence());
        assert!(report.diagnostics.warnings.iter().any(|w| w.contains("low confidence")));
    }

    #[test]
    fn test_reference_must_exist() {
        let (ctrl, stim) = conditions(3);
        let mut cfg = config();
        cfg.integration.reference_condition = Some("OTHER".into());
        assert!(matches!(
            run_comparative_analysis(&cfg, (&ctrl, "CTRL"), (&stim, "STIM")),
            Err(ScanError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected_first() {
        let (ctrl, stim) = conditions(4);
        let mut cfg = config();
        cfg.resolution = 0.0;
        assert!(matches!(
            run_comparative_analysis(&cfg, (&ctrl, "CTRL"), (&stim, "STIM")),
            Err(ScanError::Config(_))
        ));
    }

    #[test]
    fn test_qc_filter_and_zero_library() {
        let (ctrl, mut stim) = conditions(5);
        let mut dense = stim.counts().to_dense();
        dense.column_mut(0).fill(0);
        stim = CountMatrix::from_dense(stim.gene_ids.clone(), stim.cell_ids.clone(), &dense).unwrap();

        // without a filter the empty cell reaches the normalizer
        let err = run_comparative_analysis(&config(), (&ctrl, "CTRL"), (&stim, "STIM")).unwrap_err();
        assert!(matches!(err, ScanError::Data(_)));

        let mut cfg = config();
        cfg.qc.min_counts = Some(1);
        let report = run_comparative_analysis(&cfg, (&ctrl, "CTRL"), (&stim, "STIM")).unwrap();
        assert_eq!(report.context.metadata.n_cells(), 239);
        assert!(report
            .diagnostics
            .exclusions
            .iter()
            .any(|e| e.stage == "qc" && e.unit == "STIM_BC0-1"));
    }
}
