//! Error types for the storelens pipeline.
//!
//! Uses `thiserror` for public API error types. Each pipeline stage has its own
//! error enum; [`EtlError`] wraps them so a caller can tell which stage failed
//! and why without re-running.

use crate::data::validate::ValidationReport;
use crate::pipeline::PipelineStage;
use std::path::PathBuf;

/// Convenience alias for results carrying an [`EtlError`].
pub type Result<T> = std::result::Result<T, EtlError>;

/// Top-level error type for a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Data quality check failed: {0}")]
    DataQuality(#[from] DataQualityError),

    #[error("Transformation failed: {0}")]
    Transform(#[from] TransformError),

    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineStage,
        to: PipelineStage,
    },
}

impl EtlError {
    /// The pipeline stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extract",
            Self::DataQuality(_) => "validate",
            Self::Transform(_) => "transform",
            Self::Load(_) => "load",
            Self::Config(_) => "config",
            Self::InvalidTransition { .. } => "pipeline",
        }
    }
}

/// Errors raised while reading source files.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Source file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed delimited file {path}: {source}")]
    MalformedDelimited {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    MalformedJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected structure in {path}: {message}")]
    UnexpectedShape { path: PathBuf, message: String },

    #[error("Required column '{column}' missing from {path}")]
    MissingColumn { path: PathBuf, column: String },
}

/// A blocking validation rule was violated.
///
/// Carries the complete report so advisory findings are not lost when the run
/// aborts.
#[derive(Debug, thiserror::Error)]
#[error("{summary}")]
pub struct DataQualityError {
    summary: String,
    report: Box<ValidationReport>,
}

impl DataQualityError {
    pub fn new(report: ValidationReport) -> Self {
        let parts: Vec<String> = report
            .blocking()
            .map(|f| {
                format!(
                    "{} on {} ({} row{})",
                    f.rule,
                    f.table,
                    f.violations,
                    if f.violations == 1 { "" } else { "s" }
                )
            })
            .collect();
        let summary = format!("blocking rule violations: {}", parts.join(", "));
        Self {
            summary,
            report: Box::new(report),
        }
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn into_report(self) -> ValidationReport {
        *self.report
    }
}

/// Errors raised while coercing validated tables into typed records.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Column '{column}' missing from {table} table")]
    MissingColumn { table: String, column: String },

    #[error("Cannot coerce {table}.{column} at row {row}: {reason}")]
    Coercion {
        table: String,
        column: String,
        row: usize,
        reason: String,
    },
}

/// Errors raised while writing to the relational store.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to open store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Store write failed on table '{table}': {source}")]
    Sqlite {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Value out of range for table '{table}': {message}")]
    Conversion { table: String, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to extract configuration: {0}")]
    Extract(#[from] Box<figment::Error>),
}
