use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised by the analysis stages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScanError {
    /// Invalid parameter or unknown method name
    #[error("configuration error: {0}")]
    Config(String),

    /// Input that cannot be analyzed (id collisions, mismatched genes, empty or zero-library cells)
    #[error("data error: {0}")]
    Data(String),

    /// Decomposition failure or a numerically ill-posed unit (zero variance)
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Too few cells for a comparison, or an untestable gene
    #[error("statistical test error: {0}")]
    StatisticalTest(String),
}

/// Convenience alias used by every analysis crate.
pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// Short name of the error kind, used in diagnostic tables
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Config(_) => "ConfigError",
            ScanError::Data(_) => "DataError",
            ScanError::Numerical(_) => "NumericalError",
            ScanError::StatisticalTest(_) => "StatisticalTestError",
        }
    }
}

/// A unit (gene, cluster, group, component) left out of a stage's output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Exclusion {
    /// Stage that excluded the unit
    pub stage: String,
    /// Gene id, cluster id or other unit name
    pub unit: String,
    /// Error kind, see [`ScanError::kind`]
    pub kind: String,
    /// Human readable cause
    pub reason: String,
}

impl Exclusion {
    /// Record `err` as the cause for excluding `unit` from `stage`.
    pub fn new(stage: &str, unit: impl Into<String>, err: &ScanError) -> Exclusion {
        let reason = match err {
            ScanError::Config(m) | ScanError::Data(m) | ScanError::Numerical(m) | ScanError::StatisticalTest(m) => {
                m.clone()
            }
        };
        Exclusion {
            stage: stage.to_string(),
            unit: unit.into(),
            kind: err.kind().to_string(),
            reason,
        }
    }
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} excluded ({}): {}", self.stage, self.unit, self.kind, self.reason)
    }
}

/// Aggregated exclusions from every stage of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    /// All recorded exclusions
    pub exclusions: Vec<Exclusion>,
    /// Free-form warnings that did not exclude a unit (e.g. low-confidence integration)
    pub warnings: Vec<String>,
}

impl Diagnostics {
    /// Record a single exclusion
    pub fn exclude(&mut self, stage: &str, unit: impl Into<String>, err: &ScanError) {
        self.exclusions.push(Exclusion::new(stage, unit, err));
    }

    /// Append the exclusions collected by a sub-computation
    pub fn extend(&mut self, exclusions: impl IntoIterator<Item = Exclusion>) {
        self.exclusions.extend(exclusions);
    }

    /// Record a warning
    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Sort into canonical (stage, unit, kind, reason) order so that reports do not depend on
    /// the completion order of parallel work.
    pub fn finalize(&mut self) {
        self.exclusions.sort();
        self.exclusions.dedup();
    }

    /// Number of recorded exclusions
    pub fn len(&self) -> usize {
        self.exclusions.len()
    }

    /// True if nothing was excluded
    pub fn is_empty(&self) -> bool {
        self.exclusions.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_exclusion_display() {
        let e = Exclusion::new("scale", "GENE1", &ScanError::Numerical("zero variance".into()));
        assert_eq!(e.kind, "NumericalError");
        assert_eq!(e.to_string(), "[scale] GENE1 excluded (NumericalError): zero variance");
    }

    #[test]
    fn test_finalize_is_canonical() {
        let mut a = Diagnostics::default();
        let mut b = Diagnostics::default();
        let err = ScanError::StatisticalTest("fewer than 2 cells".into());

        a.exclude("markers", "3", &err);
        a.exclude("markers", "1", &err);
        b.exclude("markers", "1", &err);
        b.exclude("markers", "3", &err);
        b.exclude("markers", "3", &err);

        a.finalize();
        b.finalize();
        assert_eq!(a.exclusions, b.exclusions);
        assert_eq!(a.len(), 2);
    }
}
