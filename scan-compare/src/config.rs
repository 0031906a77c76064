//! Analysis parameters
//!
//! Every option has a default; a JSON file only needs to carry the values it changes.

use diff_exp::DeParams;
use scan_types::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Batch integration strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationMethod {
    /// Canonical correlation analysis followed by mutual-nearest-neighbor anchors
    #[serde(rename = "cca")]
    CcaAnchors,
}

impl FromStr for IntegrationMethod {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cca" => Ok(IntegrationMethod::CcaAnchors),
            _ => Err(ScanError::Config(format!("integration method not recognized: {s}"))),
        }
    }
}

/// Per-cell QC. Thresholds are opt-in: with the defaults no cell is removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcConfig {
    /// Case-insensitive prefix of mitochondrial gene names
    pub mito_prefix: String,
    /// Drop cells with fewer detected genes
    pub min_features: Option<u32>,
    /// Drop cells with more detected genes
    pub max_features: Option<u32>,
    /// Drop cells with fewer total counts
    pub min_counts: Option<u64>,
    /// Drop cells with a higher mitochondrial percentage
    pub max_percent_mito: Option<f64>,
}

impl Default for QcConfig {
    fn default() -> Self {
        QcConfig {
            mito_prefix: "MT-".to_string(),
            min_features: None,
            max_features: None,
            min_counts: None,
            max_percent_mito: None,
        }
    }
}

/// Anchor-based integration parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    /// Integration strategy
    pub method: IntegrationMethod,
    /// Condition that stays fixed; the first condition when unset
    pub reference_condition: Option<String>,
    /// Number of canonical vectors
    pub n_cc: usize,
    /// Neighbors searched when looking for mutual nearest neighbors
    pub k_anchor: usize,
    /// Anchors are kept only if they are this close in feature space; `None` skips the filter
    pub k_filter: Option<usize>,
    /// Neighborhood size used to score anchors
    pub k_score: usize,
    /// Number of anchors used to correct each cell
    pub k_weight: usize,
    /// Bandwidth of the Gaussian anchor weighting
    pub sd_weight: f64,
    /// Below this many anchors the result is flagged low-confidence
    pub min_anchors: usize,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        IntegrationConfig {
            method: IntegrationMethod::CcaAnchors,
            reference_condition: None,
            n_cc: 30,
            k_anchor: 5,
            k_filter: Some(200),
            k_score: 30,
            k_weight: 100,
            sd_weight: 1.0,
            min_anchors: 30,
        }
    }
}

/// All parameters of a comparative analysis run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Target library size of the log normalization
    pub scale_factor: f64,
    /// Number of variable features
    pub n_features: usize,
    /// Loess span of the mean-variance fit
    pub loess_span: f64,
    /// Scaled values are clipped at this magnitude
    pub scale_max: f64,
    /// Number of principal components
    pub n_components: usize,
    /// Nearest neighbors per cell, the cell itself included
    pub neighbor_k: usize,
    /// Shared-neighbor edges with a lower Jaccard index are dropped
    pub snn_prune: f64,
    /// Modularity resolution
    pub resolution: f64,
    /// Random restarts of the community detection
    pub louvain_starts: usize,
    /// Maximum iterations per restart
    pub louvain_iterations: usize,
    /// Seed of every stochastic step
    pub random_seed: u64,
    /// QC
    pub qc: QcConfig,
    /// Integration
    pub integration: IntegrationConfig,
    /// Differential expression
    pub de: DeParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            scale_factor: 1e4,
            n_features: 2000,
            loess_span: 0.3,
            scale_max: 10.0,
            n_components: 30,
            neighbor_k: 20,
            snn_prune: 1.0 / 15.0,
            resolution: 0.8,
            louvain_starts: 10,
            louvain_iterations: 10,
            random_seed: 0,
            qc: QcConfig::default(),
            integration: IntegrationConfig::default(),
            de: DeParams::default(),
        }
    }
}

fn positive(name: &str, v: f64) -> Result<()> {
    if v > 0.0 && v.is_finite() {
        Ok(())
    } else {
        Err(ScanError::Config(format!("{name} must be positive, got {v}")))
    }
}

fn nonzero(name: &str, v: usize) -> Result<()> {
    if v > 0 {
        Ok(())
    } else {
        Err(ScanError::Config(format!("{name} must be positive, got 0")))
    }
}

impl AnalysisConfig {
    /// Reject parameter values no stage can work with
    pub fn validate(&self) -> Result<()> {
        positive("scale_factor", self.scale_factor)?;
        positive("resolution", self.resolution)?;
        positive("scale_max", self.scale_max)?;
        nonzero("n_features", self.n_features)?;
        nonzero("n_components", self.n_components)?;
        nonzero("neighbor_k", self.neighbor_k)?;
        nonzero("louvain_starts", self.louvain_starts)?;
        nonzero("louvain_iterations", self.louvain_iterations)?;
        if !(self.loess_span > 0.0 && self.loess_span <= 1.0) {
            return Err(ScanError::Config(format!("loess_span must be in (0, 1], got {}", self.loess_span)));
        }
        if !(0.0..1.0).contains(&self.snn_prune) {
            return Err(ScanError::Config(format!("snn_prune must be in [0, 1), got {}", self.snn_prune)));
        }

        let int = &self.integration;
        nonzero("integration.n_cc", int.n_cc)?;
        nonzero("integration.k_anchor", int.k_anchor)?;
        nonzero("integration.k_score", int.k_score)?;
        nonzero("integration.k_weight", int.k_weight)?;
        if let Some(k) = int.k_filter {
            nonzero("integration.k_filter", k)?;
        }
        positive("integration.sd_weight", int.sd_weight)?;

        self.de.validate()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use diff_exp::{AdjustMethod, TestMethod};

    #[test]
    fn test_defaults_validate() {
        let c = AnalysisConfig::default();
        c.validate().unwrap();
        assert_eq!(c.integration.reference_condition, None);
        assert_eq!(c.de.test_method, TestMethod::Wilcoxon);
        assert_eq!(c.qc.max_percent_mito, None);
    }

    #[test]
    fn test_invalid_values() {
        let bad = [
            AnalysisConfig {
                resolution: 0.0,
                ..AnalysisConfig::default()
            },
            AnalysisConfig {
                neighbor_k: 0,
                ..AnalysisConfig::default()
            },
            AnalysisConfig {
                n_components: 0,
                ..AnalysisConfig::default()
            },
            AnalysisConfig {
                snn_prune: 1.0,
                ..AnalysisConfig::default()
            },
        ];
        for c in bad {
            assert!(matches!(c.validate(), Err(ScanError::Config(_))));
        }
    }

    #[test]
    fn test_partial_json() {
        let c: AnalysisConfig = serde_json::from_str(
            r#"{"resolution": 0.5, "integration": {"k_filter": null, "reference_condition": "STIM"},
                "de": {"test_method": "t", "adjust_method": "bh"}}"#,
        )
        .unwrap();
        assert_eq!(c.resolution, 0.5);
        assert_eq!(c.n_features, 2000);
        assert_eq!(c.integration.k_filter, None);
        assert_eq!(c.integration.reference_condition.as_deref(), Some("STIM"));
        assert_eq!(c.integration.k_anchor, 5);
        assert_eq!(c.de.test_method, TestMethod::TTest);
        assert_eq!(c.de.adjust_method, AdjustMethod::BenjaminiHochberg);
        c.validate().unwrap();

        let err = serde_json::from_str::<AnalysisConfig>(r#"{"de": {"test_method": "bimod"}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_method_names() {
        assert_eq!("CCA".parse::<IntegrationMethod>().unwrap(), IntegrationMethod::CcaAnchors);
        assert!(matches!("rpca".parse::<IntegrationMethod>(), Err(ScanError::Config(_))));
    }
}
