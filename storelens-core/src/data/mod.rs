//! Data pipeline stages: extraction, validation, transformation and load.

pub mod coerce;
pub mod load;
pub mod source;
pub mod transform;
pub mod validate;

pub use load::{LoadStats, load};
pub use source::{
    CsvSource, DataBatch, DataSourceInfo, JsonSource, RawTables, TableSource, extract,
};
pub use transform::{TransformedTables, Transformer};
pub use validate::{Rule, RowRef, RuleFinding, Severity, ValidationReport, Validator};
