//! # Storelens Core
//!
//! Batch ETL for e-commerce analytics. Raw customer, order and product
//! exports are extracted, checked against data-quality rules, enriched with
//! derived columns, and loaded into an indexed SQLite store in one atomic
//! replace.

pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod store;

// Re-export commonly used types at the crate root.
pub use config::{EtlConfig, SourceConfig, StoreConfig, ValidationConfig, load_config};
pub use data::{
    LoadStats, RawTables, Rule, RuleFinding, Severity, TransformedTables, Transformer,
    ValidationReport, Validator,
};
pub use error::{
    ConfigError, DataQualityError, EtlError, ExtractionError, LoadError, Result, TransformError,
};
pub use model::{Customer, Order, OrderStatus, Product, TableKind};
pub use pipeline::{
    FailureRecord, Pipeline, PipelineContext, PipelineOutcome, PipelineStage, PipelineSummary,
    StageTransition,
};
pub use store::Store;
