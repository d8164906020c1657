//! Data quality validation.
//!
//! Rules run in a fixed order over the raw tables and each one is tagged with
//! a [`Severity`]. The complete [`ValidationReport`] is assembled first; only
//! then does the caller decide whether to abort (see
//! [`ValidationReport::into_result`]).

use crate::config::ValidationConfig;
use crate::data::coerce;
use crate::data::source::{DataBatch, RawTables};
use crate::error::{ConfigError, DataQualityError};
use crate::model::{OrderStatus, TableKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// Whether a violated rule halts the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Halts the pipeline before load.
    Blocking,
    /// Recorded in the report; the pipeline continues.
    Advisory,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => f.write_str("blocking"),
            Self::Advisory => f.write_str("advisory"),
        }
    }
}

/// Validation rules, in evaluation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    RequiredFields,
    UnparsableField,
    DuplicatePrimaryKey,
    NegativeAmount,
    MarginOutOfRange,
    OrphanOrder,
    UnknownOrderStatus,
    MissingOptionalValue,
}

impl Rule {
    pub const ALL: [Rule; 8] = [
        Self::RequiredFields,
        Self::UnparsableField,
        Self::DuplicatePrimaryKey,
        Self::NegativeAmount,
        Self::MarginOutOfRange,
        Self::OrphanOrder,
        Self::UnknownOrderStatus,
        Self::MissingOptionalValue,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::RequiredFields => "required_fields",
            Self::UnparsableField => "unparsable_field",
            Self::DuplicatePrimaryKey => "duplicate_primary_key",
            Self::NegativeAmount => "negative_amount",
            Self::MarginOutOfRange => "margin_out_of_range",
            Self::OrphanOrder => "orphan_order",
            Self::UnknownOrderStatus => "unknown_order_status",
            Self::MissingOptionalValue => "missing_optional_value",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.name() == name)
    }

    /// Structural rules are blocking and cannot be relaxed by configuration.
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::RequiredFields
            | Self::UnparsableField
            | Self::DuplicatePrimaryKey
            | Self::NegativeAmount => Severity::Blocking,
            Self::MarginOutOfRange
            | Self::OrphanOrder
            | Self::UnknownOrderStatus
            | Self::MissingOptionalValue => Severity::Advisory,
        }
    }

    /// Tables this rule is evaluated against.
    pub fn tables(&self) -> &'static [TableKind] {
        match self {
            Self::RequiredFields
            | Self::UnparsableField
            | Self::DuplicatePrimaryKey
            | Self::MissingOptionalValue => &TableKind::ALL,
            Self::NegativeAmount => &[TableKind::Products, TableKind::Orders],
            Self::MarginOutOfRange => &[TableKind::Products],
            Self::OrphanOrder | Self::UnknownOrderStatus => &[TableKind::Orders],
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A row flagged by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRef {
    /// 0-based position among the table's data rows.
    pub index: usize,
    /// Primary key as written in the source, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{key} (row {})", self.index),
            None => write!(f, "row {}", self.index),
        }
    }
}

/// The outcome of one rule on one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFinding {
    pub rule: Rule,
    pub table: TableKind,
    pub severity: Severity,
    /// Number of violating rows.
    pub violations: usize,
    pub rows: Vec<RowRef>,
    /// Columns involved in the violations.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub columns: BTreeSet<String>,
}

impl RuleFinding {
    pub fn is_violated(&self) -> bool {
        self.violations > 0
    }

    pub fn row_keys(&self) -> Vec<&str> {
        self.rows.iter().filter_map(|r| r.key.as_deref()).collect()
    }
}

/// Structured result of a validation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// One entry per (rule, table), in evaluation order.
    pub findings: Vec<RuleFinding>,
    pub row_counts: BTreeMap<TableKind, usize>,
}

impl ValidationReport {
    /// Violated findings with blocking severity.
    pub fn blocking(&self) -> impl Iterator<Item = &RuleFinding> {
        self.findings
            .iter()
            .filter(|f| f.is_violated() && f.severity == Severity::Blocking)
    }

    /// Violated findings with advisory severity.
    pub fn advisory(&self) -> impl Iterator<Item = &RuleFinding> {
        self.findings
            .iter()
            .filter(|f| f.is_violated() && f.severity == Severity::Advisory)
    }

    pub fn has_blocking(&self) -> bool {
        self.blocking().next().is_some()
    }

    pub fn finding(&self, rule: Rule, table: TableKind) -> Option<&RuleFinding> {
        self.findings
            .iter()
            .find(|f| f.rule == rule && f.table == table)
    }

    /// Total violating rows across advisory findings.
    pub fn advisory_violations(&self) -> usize {
        self.advisory().map(|f| f.violations).sum()
    }

    /// `Err` carrying the report when any blocking rule was violated.
    pub fn into_result(self) -> Result<Self, DataQualityError> {
        if self.has_blocking() {
            Err(DataQualityError::new(self))
        } else {
            Ok(self)
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24} {:<10} {:<9} {:>6}  rows", "rule", "table", "severity", "count")?;
        for finding in &self.findings {
            let sample: Vec<String> = finding.rows.iter().take(5).map(|r| r.to_string()).collect();
            let more = finding.rows.len().saturating_sub(sample.len());
            write!(
                f,
                "{:<24} {:<10} {:<9} {:>6}  {}",
                finding.rule.name(),
                finding.table.as_str(),
                finding.severity.to_string(),
                finding.violations,
                sample.join(", ")
            )?;
            if more > 0 {
                write!(f, " (+{more} more)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Table layouts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Decimal,
    Date,
    Text,
}

struct ColumnSpec {
    name: &'static str,
    kind: ColumnKind,
    required: bool,
}

const fn col(name: &'static str, kind: ColumnKind, required: bool) -> ColumnSpec {
    ColumnSpec {
        name,
        kind,
        required,
    }
}

const CUSTOMER_LAYOUT: &[ColumnSpec] = &[
    col("customer_id", ColumnKind::Integer, true),
    col("name", ColumnKind::Text, false),
    col("email", ColumnKind::Text, false),
    col("location", ColumnKind::Text, false),
    col("signup_date", ColumnKind::Date, true),
    col("customer_segment", ColumnKind::Text, false),
    col("age", ColumnKind::Integer, false),
];

const PRODUCT_LAYOUT: &[ColumnSpec] = &[
    col("product_id", ColumnKind::Integer, true),
    col("name", ColumnKind::Text, false),
    col("category", ColumnKind::Text, false),
    col("price", ColumnKind::Decimal, true),
    col("cost", ColumnKind::Decimal, false),
    col("profit_margin", ColumnKind::Decimal, false),
    col("stock_quantity", ColumnKind::Integer, false),
];

const ORDER_LAYOUT: &[ColumnSpec] = &[
    col("order_id", ColumnKind::Integer, true),
    col("customer_id", ColumnKind::Integer, true),
    col("order_date", ColumnKind::Date, true),
    col("total_amount", ColumnKind::Decimal, true),
    col("status", ColumnKind::Text, true),
];

fn layout(table: TableKind) -> &'static [ColumnSpec] {
    match table {
        TableKind::Customers => CUSTOMER_LAYOUT,
        TableKind::Products => PRODUCT_LAYOUT,
        TableKind::Orders => ORDER_LAYOUT,
    }
}

/// A batch paired with its layout and resolved column positions.
struct TableView<'a> {
    kind: TableKind,
    batch: &'a DataBatch,
    columns: Vec<(&'static ColumnSpec, Option<usize>)>,
    key_index: Option<usize>,
}

impl<'a> TableView<'a> {
    fn new(kind: TableKind, batch: &'a DataBatch) -> Self {
        let columns = layout(kind)
            .iter()
            .map(|spec| (spec, batch.column_index(spec.name)))
            .collect();
        Self {
            kind,
            batch,
            columns,
            key_index: batch.column_index(kind.key_column()),
        }
    }

    fn rows(&self) -> std::ops::Range<usize> {
        0..self.batch.row_count()
    }

    /// `None` when the column is absent from the header.
    fn cell(&self, row: usize, name: &str) -> Option<&'a serde_json::Value> {
        self.batch
            .column_index(name)
            .map(|col| self.batch.cell(row, col))
    }

    fn decimal(&self, row: usize, name: &str) -> Option<Decimal> {
        self.cell(row, name)
            .and_then(|v| coerce::parse_decimal(v).ok().flatten())
    }

    fn integer(&self, row: usize, name: &str) -> Option<i64> {
        self.cell(row, name)
            .and_then(|v| coerce::parse_integer(v).ok().flatten())
    }

    fn row_ref(&self, row: usize) -> RowRef {
        RowRef {
            index: row,
            key: self
                .key_index
                .and_then(|col| coerce::text(self.batch.cell(row, col))),
        }
    }
}

/// Accumulates violations for one (rule, table) pair.
struct FindingBuilder<'v, 'a> {
    view: &'v TableView<'a>,
    rows: Vec<RowRef>,
    columns: BTreeSet<String>,
}

impl<'v, 'a> FindingBuilder<'v, 'a> {
    fn new(view: &'v TableView<'a>) -> Self {
        Self {
            view,
            rows: Vec::new(),
            columns: BTreeSet::new(),
        }
    }

    fn flag(&mut self, row: usize, columns: impl IntoIterator<Item = &'static str>) {
        self.columns.extend(columns.into_iter().map(String::from));
        if self.rows.last().is_none_or(|r| r.index != row) {
            self.rows.push(self.view.row_ref(row));
        }
    }

    fn finish(self, rule: Rule, severity: Severity) -> RuleFinding {
        RuleFinding {
            rule,
            table: self.view.kind,
            severity,
            violations: self.rows.len(),
            rows: self.rows,
            columns: self.columns,
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Applies the ordered rule set to raw tables.
#[derive(Debug, Clone)]
pub struct Validator {
    severities: BTreeMap<Rule, Severity>,
    max_logged_rows: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            severities: Rule::ALL
                .into_iter()
                .map(|r| (r, r.default_severity()))
                .collect(),
            max_logged_rows: ValidationConfig::default().max_logged_rows,
        }
    }
}

impl Validator {
    /// Build a validator, applying configured severity overrides.
    ///
    /// Advisory rules may be escalated to blocking. Attempts to relax a
    /// blocking rule are ignored with a warning.
    pub fn new(config: &ValidationConfig) -> Result<Self, ConfigError> {
        let mut validator = Self {
            max_logged_rows: config.max_logged_rows,
            ..Self::default()
        };
        for (name, severity) in &config.severity_overrides {
            let rule = Rule::from_name(name).ok_or_else(|| ConfigError::Invalid {
                message: format!("unknown validation rule '{name}'"),
            })?;
            if rule.default_severity() == Severity::Blocking && *severity == Severity::Advisory {
                tracing::warn!(
                    rule = %rule,
                    "Ignoring override: blocking rules cannot be made advisory"
                );
                continue;
            }
            validator.severities.insert(rule, *severity);
        }
        Ok(validator)
    }

    pub fn severity(&self, rule: Rule) -> Severity {
        self.severities
            .get(&rule)
            .copied()
            .unwrap_or_else(|| rule.default_severity())
    }

    /// Run every rule against every table it applies to.
    pub fn validate(&self, tables: &RawTables) -> ValidationReport {
        let views: BTreeMap<TableKind, TableView<'_>> = TableKind::ALL
            .into_iter()
            .map(|kind| (kind, TableView::new(kind, tables.get(kind))))
            .collect();
        let customer_ids = known_customer_ids(&views[&TableKind::Customers]);

        let mut findings = Vec::new();
        for rule in Rule::ALL {
            for table in rule.tables() {
                let view = &views[table];
                let mut builder = FindingBuilder::new(view);
                match rule {
                    Rule::RequiredFields => check_required(view, &mut builder),
                    Rule::UnparsableField => check_parseable(view, &mut builder),
                    Rule::DuplicatePrimaryKey => check_duplicates(view, &mut builder),
                    Rule::NegativeAmount => check_non_negative(view, &mut builder),
                    Rule::MarginOutOfRange => check_margin(view, &mut builder),
                    Rule::OrphanOrder => check_orphans(view, &customer_ids, &mut builder),
                    Rule::UnknownOrderStatus => check_status(view, &mut builder),
                    Rule::MissingOptionalValue => check_optional(view, &mut builder),
                }
                let finding = builder.finish(rule, self.severity(rule));
                self.log_finding(&finding);
                findings.push(finding);
            }
        }

        let row_counts = TableKind::ALL
            .into_iter()
            .map(|kind| (kind, tables.get(kind).row_count()))
            .collect();
        let report = ValidationReport {
            findings,
            row_counts,
        };
        tracing::info!(
            blocking = report.blocking().count(),
            advisory = report.advisory().count(),
            "Data quality checks completed"
        );
        report
    }

    fn log_finding(&self, finding: &RuleFinding) {
        if !finding.is_violated() {
            return;
        }
        let sample: Vec<String> = finding
            .rows
            .iter()
            .take(self.max_logged_rows)
            .map(|r| r.to_string())
            .collect();
        let sample = sample.join(", ");
        match finding.severity {
            Severity::Blocking => tracing::error!(
                rule = %finding.rule,
                table = %finding.table,
                violations = finding.violations,
                rows = %sample,
                "Blocking data quality violation"
            ),
            Severity::Advisory => tracing::warn!(
                rule = %finding.rule,
                table = %finding.table,
                violations = finding.violations,
                rows = %sample,
                "Advisory data quality finding"
            ),
        }
    }
}

fn known_customer_ids(view: &TableView<'_>) -> HashSet<i64> {
    view.rows()
        .filter_map(|row| view.integer(row, "customer_id"))
        .collect()
}

fn check_required(view: &TableView<'_>, out: &mut FindingBuilder<'_, '_>) {
    for row in view.rows() {
        for (spec, index) in &view.columns {
            if !spec.required {
                continue;
            }
            let missing = match index {
                Some(col) => coerce::is_missing(view.batch.cell(row, *col)),
                None => true,
            };
            if missing {
                out.flag(row, [spec.name]);
            }
        }
        if view.kind == TableKind::Products {
            let absent = |name: &str| view.cell(row, name).is_none_or(coerce::is_missing);
            if absent("profit_margin") && absent("cost") {
                out.flag(row, ["profit_margin", "cost"]);
            }
        }
    }
}

fn check_parseable(view: &TableView<'_>, out: &mut FindingBuilder<'_, '_>) {
    for row in view.rows() {
        for (spec, index) in &view.columns {
            let Some(col) = index else { continue };
            let value = view.batch.cell(row, *col);
            let ok = match spec.kind {
                ColumnKind::Integer => coerce::parse_integer(value).is_ok(),
                ColumnKind::Decimal => coerce::parse_decimal(value).is_ok(),
                ColumnKind::Date => coerce::parse_date(value).is_ok(),
                ColumnKind::Text => true,
            };
            if !ok {
                out.flag(row, [spec.name]);
            }
        }
        if view.kind == TableKind::Products && margin(view, row).is_err() {
            out.flag(row, ["profit_margin"]);
        }
    }
}

fn check_duplicates(view: &TableView<'_>, out: &mut FindingBuilder<'_, '_>) {
    let key = view.kind.key_column();
    let mut seen = HashSet::new();
    for row in view.rows() {
        if let Some(id) = view.integer(row, key) {
            if !seen.insert(id) {
                out.flag(row, [key]);
            }
        }
    }
}

fn check_non_negative(view: &TableView<'_>, out: &mut FindingBuilder<'_, '_>) {
    let columns: &[&'static str] = match view.kind {
        TableKind::Orders => &["total_amount"],
        TableKind::Products => &["price", "cost"],
        TableKind::Customers => &[],
    };
    for row in view.rows() {
        for column in columns {
            if view.decimal(row, column).is_some_and(|v| v.is_sign_negative() && !v.is_zero()) {
                out.flag(row, [*column]);
            }
        }
    }
}

/// Effective margin of a product row; `Ok(None)` without a usable price.
fn margin(view: &TableView<'_>, row: usize) -> Result<Option<Decimal>, coerce::MarginOverflow> {
    let Some(price) = view.decimal(row, "price") else {
        return Ok(None);
    };
    coerce::effective_margin(
        price,
        view.decimal(row, "profit_margin"),
        view.decimal(row, "cost"),
    )
}

fn check_margin(view: &TableView<'_>, out: &mut FindingBuilder<'_, '_>) {
    for row in view.rows() {
        // Overflow is reported by `unparsable_field`.
        if let Ok(Some(m)) = margin(view, row) {
            if m < Decimal::ZERO || m > Decimal::ONE {
                out.flag(row, ["profit_margin"]);
            }
        }
    }
}

fn check_orphans(
    view: &TableView<'_>,
    customer_ids: &HashSet<i64>,
    out: &mut FindingBuilder<'_, '_>,
) {
    for row in view.rows() {
        if let Some(id) = view.integer(row, "customer_id") {
            if !customer_ids.contains(&id) {
                out.flag(row, ["customer_id"]);
            }
        }
    }
}

fn check_status(view: &TableView<'_>, out: &mut FindingBuilder<'_, '_>) {
    for row in view.rows() {
        let label = view.cell(row, "status").and_then(coerce::text);
        if let Some(label) = label {
            if !OrderStatus::parse(&label).is_known() {
                out.flag(row, ["status"]);
            }
        }
    }
}

fn check_optional(view: &TableView<'_>, out: &mut FindingBuilder<'_, '_>) {
    for row in view.rows() {
        for (spec, index) in &view.columns {
            if spec.required {
                continue;
            }
            if let Some(col) = index {
                if coerce::is_missing(view.batch.cell(row, *col)) {
                    out.flag(row, [spec.name]);
                }
            }
        }
    }
}
