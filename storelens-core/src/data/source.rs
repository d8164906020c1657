//! Source readers that load raw tables from delimited and JSON files.

use crate::config::SourceConfig;
use crate::error::ExtractionError;
use crate::model::TableKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Columns that must be present in each source header.
pub const REQUIRED_CUSTOMER_COLUMNS: &[&str] = &["customer_id", "signup_date"];
pub const REQUIRED_ORDER_COLUMNS: &[&str] = &[
    "order_id",
    "customer_id",
    "order_date",
    "total_amount",
    "status",
];
pub const REQUIRED_PRODUCT_COLUMNS: &[&str] = &["product_id", "price"];

/// A table of raw cells as read from a source.
///
/// Delimited sources produce strings (empty cells become `null`); JSON sources
/// keep their JSON types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl DataBatch {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` in column `col`, treating a short row as null.
    pub fn cell(&self, row: usize, col: usize) -> &serde_json::Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&serde_json::Value::Null)
    }
}

/// The three raw tables of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTables {
    pub customers: DataBatch,
    pub products: DataBatch,
    pub orders: DataBatch,
}

impl RawTables {
    pub fn get(&self, table: TableKind) -> &DataBatch {
        match table {
            TableKind::Customers => &self.customers,
            TableKind::Products => &self.products,
            TableKind::Orders => &self.orders,
        }
    }
}

/// Metadata about a loaded source, used for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceInfo {
    pub source_type: String,
    pub location: String,
    pub row_count: Option<usize>,
}

/// A readable table source.
pub trait TableSource {
    /// Read the whole source into memory.
    fn load(&self) -> Result<DataBatch, ExtractionError>;

    /// Describe this source.
    fn source_info(&self) -> DataSourceInfo;
}

// ---------------------------------------------------------------------------
// CsvSource
// ---------------------------------------------------------------------------

/// Delimited file source with a header row.
pub struct CsvSource {
    pub path: PathBuf,
    pub delimiter: char,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, delimiter: char) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }
}

impl TableSource for CsvSource {
    fn load(&self) -> Result<DataBatch, ExtractionError> {
        let content = read_source(&self.path)?;
        let delimiter = u8::try_from(self.delimiter).map_err(|_| {
            ExtractionError::UnexpectedShape {
                path: self.path.clone(),
                message: format!("delimiter '{}' is not a single byte", self.delimiter),
            }
        })?;

        let malformed = |source| ExtractionError::MalformedDelimited {
            path: self.path.clone(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let columns: Vec<String> = reader
            .headers()
            .map_err(malformed)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        if columns.iter().all(|c| c.is_empty()) {
            return Err(ExtractionError::UnexpectedShape {
                path: self.path.clone(),
                message: "missing header row".into(),
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(malformed)?;
            let row = record
                .iter()
                .map(|cell| {
                    if cell.is_empty() {
                        serde_json::Value::Null
                    } else {
                        serde_json::Value::String(cell.to_string())
                    }
                })
                .collect();
            rows.push(row);
        }

        Ok(DataBatch { columns, rows })
    }

    fn source_info(&self) -> DataSourceInfo {
        DataSourceInfo {
            source_type: "csv".to_string(),
            location: self.path.display().to_string(),
            row_count: None,
        }
    }
}

// ---------------------------------------------------------------------------
// JsonSource
// ---------------------------------------------------------------------------

/// JSON source holding an array of flat objects, one per record.
pub struct JsonSource {
    pub path: PathBuf,
}

impl JsonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TableSource for JsonSource {
    fn load(&self) -> Result<DataBatch, ExtractionError> {
        let content = read_source(&self.path)?;
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| ExtractionError::MalformedJson {
                path: self.path.clone(),
                source,
            })?;

        let items = value
            .as_array()
            .ok_or_else(|| ExtractionError::UnexpectedShape {
                path: self.path.clone(),
                message: "expected a top-level array of records".into(),
            })?;

        let mut objects = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let obj = item
                .as_object()
                .ok_or_else(|| ExtractionError::UnexpectedShape {
                    path: self.path.clone(),
                    message: format!("record {i} is not an object"),
                })?;
            objects.push(obj);
        }

        // Column order is the order keys are first seen.
        let mut columns: Vec<String> = Vec::new();
        for obj in &objects {
            for key in obj.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = objects
            .iter()
            .map(|obj| {
                columns
                    .iter()
                    .map(|c| obj.get(c).cloned().unwrap_or(serde_json::Value::Null))
                    .collect()
            })
            .collect();

        Ok(DataBatch { columns, rows })
    }

    fn source_info(&self) -> DataSourceInfo {
        DataSourceInfo {
            source_type: "json".to_string(),
            location: self.path.display().to_string(),
            row_count: None,
        }
    }
}

fn read_source(path: &Path) -> Result<String, ExtractionError> {
    if !path.exists() {
        return Err(ExtractionError::NotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn require_columns(
    batch: &DataBatch,
    path: &Path,
    required: &[&str],
) -> Result<(), ExtractionError> {
    for column in required {
        if batch.column_index(column).is_none() {
            return Err(ExtractionError::MissingColumn {
                path: path.to_path_buf(),
                column: (*column).to_string(),
            });
        }
    }
    Ok(())
}

fn load_table(
    source: &dyn TableSource,
    path: &Path,
    required: &[&str],
) -> Result<DataBatch, ExtractionError> {
    let batch = source.load()?;
    require_columns(&batch, path, required)?;
    let info = DataSourceInfo {
        row_count: Some(batch.row_count()),
        ..source.source_info()
    };
    tracing::info!(
        source_type = %info.source_type,
        location = %info.location,
        rows = batch.row_count(),
        columns = batch.column_count(),
        "Extracted source"
    );
    Ok(batch)
}

/// Read customers, orders and products from the configured sources.
pub fn extract(sources: &SourceConfig) -> Result<RawTables, ExtractionError> {
    let customers = load_table(
        &CsvSource::new(&sources.customers, sources.delimiter),
        &sources.customers,
        REQUIRED_CUSTOMER_COLUMNS,
    )?;
    let orders = load_table(
        &CsvSource::new(&sources.orders, sources.delimiter),
        &sources.orders,
        REQUIRED_ORDER_COLUMNS,
    )?;
    let products = load_table(
        &JsonSource::new(&sources.products),
        &sources.products,
        REQUIRED_PRODUCT_COLUMNS,
    )?;

    Ok(RawTables {
        customers,
        products,
        orders,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_csv_load() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "customers.csv",
            "customer_id,name,signup_date\n1,Ada,2023-01-01\n2,,2023-01-02\n",
        );
        let batch = CsvSource::new(&path, ',').load().unwrap();
        assert_eq!(batch.columns, vec!["customer_id", "name", "signup_date"]);
        assert_eq!(batch.row_count(), 2);
        assert_eq!(batch.rows[0][1], json!("Ada"));
        assert_eq!(batch.rows[1][1], Value::Null);
    }

    #[test]
    fn test_csv_quoted_fields_and_custom_delimiter() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "c.tsv", "id;name\n1;\"Smith; John\"\n");
        let batch = CsvSource::new(&path, ';').load().unwrap();
        assert_eq!(batch.rows[0][1], json!("Smith; John"));
    }

    #[test]
    fn test_csv_wrong_column_count() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "orders.csv", "a,b,c\n1,2,3\n4,5\n");
        let err = CsvSource::new(&path, ',').load().unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedDelimited { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = CsvSource::new("/nonexistent/customers.csv", ',')
            .load()
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NotFound { .. }));
    }

    #[test]
    fn test_json_load_unions_keys() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "products.json",
            r#"[{"product_id": 1, "price": 9.5}, {"product_id": 2, "category": "Books", "price": 3}]"#,
        );
        let batch = JsonSource::new(&path).load().unwrap();
        assert_eq!(batch.columns, vec!["product_id", "price", "category"]);
        assert_eq!(batch.rows[0][2], Value::Null);
        assert_eq!(batch.rows[1][2], json!("Books"));
        assert_eq!(batch.rows[0][1], json!(9.5));
    }

    #[test]
    fn test_json_malformed() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "products.json", r#"[{"product_id": 1,"#);
        let err = JsonSource::new(&path).load().unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedJson { .. }));
    }

    #[test]
    fn test_json_not_array() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "products.json", r#"{"product_id": 1}"#);
        let err = JsonSource::new(&path).load().unwrap_err();
        assert!(matches!(err, ExtractionError::UnexpectedShape { .. }));

        let path = write(&dir, "products2.json", r#"[1, 2]"#);
        let err = JsonSource::new(&path).load().unwrap_err();
        assert!(matches!(err, ExtractionError::UnexpectedShape { .. }));
    }

    #[test]
    fn test_extract_requires_columns() {
        let dir = TempDir::new().unwrap();
        let config = SourceConfig {
            customers: write(&dir, "customers.csv", "customer_id,signup_date\n1,2023-01-01\n"),
            orders: write(&dir, "orders.csv", "order_id,customer_id,order_date,status\n"),
            products: write(&dir, "products.json", "[]"),
            delimiter: ',',
        };
        let err = extract(&config).unwrap_err();
        match err {
            ExtractionError::MissingColumn { column, .. } => assert_eq!(column, "total_amount"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cell_out_of_range_is_null() {
        let batch = DataBatch {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![json!(1)]],
        };
        assert_eq!(batch.cell(0, 1), &Value::Null);
        assert_eq!(batch.cell(5, 0), &Value::Null);
        assert_eq!(DataBatch::empty().row_count(), 0);
    }
}
