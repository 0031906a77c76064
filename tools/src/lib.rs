//! Input and output around the comparative analysis: 10x matrix directories in, CSV and JSON out.

/// Output tables
pub mod export;

/// 10x matrix directories
pub mod tenx;
