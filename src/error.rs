//! Error types for the audit pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;

/// Audit pipeline errors
///
/// Only a missing LookML root is fatal to a run. Everything else is caught
/// at file or row granularity, logged, and counted in the run summary.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("LookML root not found: {0}")]
    MissingInput(PathBuf),

    #[error("Path is not a directory: {0}")]
    InvalidPath(PathBuf),

    #[error("Required column '{column}' missing from {path}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}
