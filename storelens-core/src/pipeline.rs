//! Pipeline orchestration.
//!
//! A run moves through `Idle → Extracting → Validating → Transforming →
//! Loading → Done`. Blocking validation findings divert it to `Blocked`, and
//! `Blocked` or any stage error ends in `Failed`. All run state lives in a
//! [`PipelineContext`] that the caller owns, so several pipelines can run side
//! by side (in tests, for example) without sharing anything.

use crate::config::EtlConfig;
use crate::data::load::{LoadStats, load};
use crate::data::source::{RawTables, extract};
use crate::data::transform::{TransformedTables, Transformer};
use crate::data::validate::{ValidationReport, Validator};
use crate::error::{DataQualityError, EtlError, Result, TransformError};
use crate::model::{Order, OrderStatus, TableKind};
use crate::store::Store;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Extracting,
    Validating,
    Blocked,
    Transforming,
    Loading,
    Done,
    Failed,
}

impl PipelineStage {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        matches!(
            (self, next),
            (Idle, Extracting)
                | (Extracting, Validating)
                | (Validating, Transforming)
                | (Validating, Blocked)
                | (Transforming, Loading)
                | (Loading, Done)
                | (Extracting | Validating | Blocked | Transforming | Loading, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Validating => "validating",
            Self::Blocked => "blocked",
            Self::Transforming => "transforming",
            Self::Loading => "loading",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded stage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: PipelineStage,
    pub to: PipelineStage,
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage the run was in when it failed.
    pub stage: PipelineStage,
    pub message: String,
}

/// Mutable state of a single pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    run_id: Uuid,
    as_of: NaiveDate,
    stage: PipelineStage,
    transitions: Vec<StageTransition>,
    report: Option<ValidationReport>,
    failure: Option<FailureRecord>,
}

impl PipelineContext {
    /// A fresh context. `as_of` is the reference date for tenure.
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            as_of,
            stage: PipelineStage::Idle,
            transitions: Vec::new(),
            report: None,
            failure: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }

    /// Validation report, once the validating stage has run.
    pub fn report(&self) -> Option<&ValidationReport> {
        self.report.as_ref()
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        self.failure.as_ref()
    }

    /// Move to `to`, rejecting illegal steps.
    pub fn advance(&mut self, to: PipelineStage) -> Result<()> {
        let from = self.stage;
        if !from.can_transition_to(to) {
            return Err(EtlError::InvalidTransition { from, to });
        }
        tracing::debug!(run_id = %self.run_id, %from, %to, "Pipeline stage change");
        self.transitions.push(StageTransition { from, to });
        self.stage = to;
        Ok(())
    }

    /// Record `err` and move to `Failed`. A terminal context is left alone.
    fn fail(&mut self, err: &EtlError) {
        if self.stage.is_terminal() {
            return;
        }
        let stage = self.stage;
        self.failure = Some(FailureRecord {
            stage,
            message: err.to_string(),
        });
        self.transitions.push(StageTransition {
            from: stage,
            to: PipelineStage::Failed,
        });
        self.stage = PipelineStage::Failed;
    }
}

/// End-of-run figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub customers: usize,
    pub products: usize,
    pub orders: usize,
    /// Sum of every order amount, whatever its status.
    pub total_revenue: Decimal,
    pub completed_revenue: Decimal,
    pub first_order: Option<NaiveDate>,
    pub last_order: Option<NaiveDate>,
    /// Rows flagged by advisory rules.
    pub advisory_findings: usize,
}

impl PipelineSummary {
    /// Fails when a revenue total does not fit in a `Decimal`.
    pub fn new(
        tables: &TransformedTables,
        report: &ValidationReport,
    ) -> std::result::Result<Self, TransformError> {
        let total_revenue = revenue(tables.orders.iter().enumerate(), "total revenue")?;
        let completed_revenue = revenue(
            tables
                .orders
                .iter()
                .enumerate()
                .filter(|(_, o)| o.status == OrderStatus::Completed),
            "completed revenue",
        )?;
        Ok(Self {
            customers: tables.customers.len(),
            products: tables.products.len(),
            orders: tables.orders.len(),
            total_revenue,
            completed_revenue,
            first_order: tables.orders.iter().map(|o| o.order_date).min(),
            last_order: tables.orders.iter().map(|o| o.order_date).max(),
            advisory_findings: report.advisory_violations(),
        })
    }
}

/// Checked sum of order amounts. `label` names the total in the error.
fn revenue<'a>(
    orders: impl Iterator<Item = (usize, &'a Order)>,
    label: &str,
) -> std::result::Result<Decimal, TransformError> {
    let mut total = Decimal::ZERO;
    for (row, order) in orders {
        total = total
            .checked_add(order.total_amount)
            .ok_or_else(|| TransformError::Coercion {
                table: TableKind::Orders.to_string(),
                column: "total_amount".into(),
                row,
                reason: format!("{label} is out of decimal range"),
            })?;
    }
    Ok(total)
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);
        writeln!(f, "{rule}")?;
        writeln!(f, "ETL PIPELINE SUMMARY")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "- Customers: {}", group_digits(&self.customers.to_string()))?;
        writeln!(f, "- Products: {}", group_digits(&self.products.to_string()))?;
        writeln!(f, "- Orders: {}", group_digits(&self.orders.to_string()))?;
        writeln!(
            f,
            "- Total Revenue: {}",
            group_digits(&self.total_revenue.round_dp(2).to_string())
        )?;
        writeln!(
            f,
            "- Completed Revenue: {}",
            group_digits(&self.completed_revenue.round_dp(2).to_string())
        )?;
        match (self.first_order, self.last_order) {
            (Some(first), Some(last)) => writeln!(f, "- Date Range: {first} to {last}")?,
            _ => writeln!(f, "- Date Range: n/a")?,
        }
        writeln!(f, "- Advisory findings: {}", self.advisory_findings)?;
        write!(f, "{rule}")
    }
}

/// Insert thousands separators into the integer part of a number.
fn group_digits(number: &str) -> String {
    let (sign, rest) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int, frac) = match rest.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rest, None),
    };
    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub report: ValidationReport,
    pub tables: TransformedTables,
    pub load: LoadStats,
    pub summary: PipelineSummary,
}

/// Runs the stages against one configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: EtlConfig,
    validator: Validator,
}

impl Pipeline {
    pub fn new(config: EtlConfig) -> Result<Self> {
        config.validate()?;
        let validator = Validator::new(&config.validation)?;
        Ok(Self { config, validator })
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// Run every stage. On failure the context ends in `Failed` and the
    /// store keeps its previous contents.
    pub fn run(&self, ctx: &mut PipelineContext) -> Result<PipelineOutcome> {
        let started = Instant::now();
        tracing::info!(run_id = %ctx.run_id(), as_of = %ctx.as_of(), "Starting ETL pipeline");

        let result = self.run_stages(ctx);
        match &result {
            Ok(outcome) => tracing::info!(
                run_id = %ctx.run_id(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                advisory = outcome.summary.advisory_findings,
                "ETL pipeline completed"
            ),
            Err(err) => {
                ctx.fail(err);
                tracing::error!(
                    run_id = %ctx.run_id(),
                    stage = err.stage(),
                    error = %err,
                    "ETL pipeline failed"
                );
            }
        }
        result
    }

    /// Extract and validate only. Nothing is written.
    pub fn check(&self, ctx: &mut PipelineContext) -> Result<ValidationReport> {
        let result = self.extract_and_validate(ctx).map(|(_, report)| report);
        if let Err(err) = &result {
            ctx.fail(err);
        }
        result
    }

    fn extract_and_validate(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<(RawTables, ValidationReport)> {
        ctx.advance(PipelineStage::Extracting)?;
        let raw = extract(&self.config.sources)?;

        ctx.advance(PipelineStage::Validating)?;
        let report = self.validator.validate(&raw);
        ctx.report = Some(report.clone());
        if report.has_blocking() {
            ctx.advance(PipelineStage::Blocked)?;
            return Err(DataQualityError::new(report).into());
        }
        Ok((raw, report))
    }

    fn run_stages(&self, ctx: &mut PipelineContext) -> Result<PipelineOutcome> {
        let (raw, report) = self.extract_and_validate(ctx)?;

        ctx.advance(PipelineStage::Transforming)?;
        let tables = Transformer::new(ctx.as_of()).transform(&raw)?;
        let summary = PipelineSummary::new(&tables, &report)?;

        ctx.advance(PipelineStage::Loading)?;
        let load = {
            let mut store = Store::open(&self.config.store.database_path)?;
            let stats = load(&tables, &mut store)?;
            store.close()?;
            stats
        };

        ctx.advance(PipelineStage::Done)?;
        Ok(PipelineOutcome {
            report,
            tables,
            load,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::validate::Rule;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_sources(dir: &TempDir, orders: &str) -> EtlConfig {
        let root = dir.path();
        std::fs::write(
            root.join("customers.csv"),
            "customer_id,name,signup_date\n1,Ada,2024-01-01\n2,Bo,2024-02-01\n",
        )
        .unwrap();
        std::fs::write(root.join("orders.csv"), orders).unwrap();
        std::fs::write(
            root.join("products.json"),
            r#"[{"product_id": 1, "name": "Lamp", "category": "Home", "price": 20.0, "cost": 12.0}]"#,
        )
        .unwrap();
        let mut config = EtlConfig::default();
        config.sources.customers = root.join("customers.csv");
        config.sources.orders = root.join("orders.csv");
        config.sources.products = root.join("products.json");
        config.store.database_path = root.join("shop.db");
        config
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    #[test]
    fn test_stage_transitions() {
        use PipelineStage::*;
        assert!(Idle.can_transition_to(Extracting));
        assert!(Validating.can_transition_to(Blocked));
        assert!(Blocked.can_transition_to(Failed));
        assert!(!Blocked.can_transition_to(Transforming));
        assert!(!Idle.can_transition_to(Loading));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Extracting));
    }

    #[test]
    fn test_successful_run_records_stages() {
        let dir = TempDir::new().unwrap();
        let config = write_sources(
            &dir,
            "order_id,customer_id,order_date,total_amount,status\n1,1,2024-03-15,250.00,Completed\n",
        );
        let pipeline = Pipeline::new(config).unwrap();
        let mut ctx = PipelineContext::new(as_of());
        let outcome = pipeline.run(&mut ctx).unwrap();

        assert_eq!(ctx.stage(), PipelineStage::Done);
        let path: Vec<PipelineStage> = ctx.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                PipelineStage::Extracting,
                PipelineStage::Validating,
                PipelineStage::Transforming,
                PipelineStage::Loading,
                PipelineStage::Done,
            ]
        );
        assert_eq!(outcome.load.orders, 1);
        assert_eq!(outcome.summary.total_revenue.to_string(), "250.00");
        assert!(ctx.report().is_some());
        assert!(ctx.failure().is_none());
    }

    #[test]
    fn test_blocked_run_ends_failed() {
        let dir = TempDir::new().unwrap();
        let config = write_sources(
            &dir,
            "order_id,customer_id,order_date,total_amount,status\n1,1,2024-03-15,-5.00,Completed\n",
        );
        let db = config.store.database_path.clone();
        let pipeline = Pipeline::new(config).unwrap();
        let mut ctx = PipelineContext::new(as_of());
        let err = pipeline.run(&mut ctx).unwrap_err();

        assert!(matches!(err, EtlError::DataQuality(_)));
        assert_eq!(ctx.stage(), PipelineStage::Failed);
        let failure = ctx.failure().unwrap();
        assert_eq!(failure.stage, PipelineStage::Blocked);
        assert!(failure.message.contains("negative_amount"));
        assert!(
            ctx.report()
                .unwrap()
                .finding(Rule::NegativeAmount, TableKind::Orders)
                .unwrap()
                .is_violated()
        );
        // The store is never opened when validation blocks.
        assert!(!db.exists());
    }

    #[test]
    fn test_extraction_failure_ends_failed() {
        let dir = TempDir::new().unwrap();
        let mut config = write_sources(
            &dir,
            "order_id,customer_id,order_date,total_amount,status\n",
        );
        config.sources.products = dir.path().join("missing.json");
        let pipeline = Pipeline::new(config).unwrap();
        let mut ctx = PipelineContext::new(as_of());
        let err = pipeline.run(&mut ctx).unwrap_err();
        assert_eq!(err.stage(), "extract");
        assert_eq!(ctx.failure().unwrap().stage, PipelineStage::Extracting);
        assert!(ctx.report().is_none());
    }

    #[test]
    fn test_context_cannot_be_reused() {
        let dir = TempDir::new().unwrap();
        let config = write_sources(
            &dir,
            "order_id,customer_id,order_date,total_amount,status\n1,1,2024-03-15,1.00,Completed\n",
        );
        let pipeline = Pipeline::new(config).unwrap();
        let mut ctx = PipelineContext::new(as_of());
        pipeline.run(&mut ctx).unwrap();
        let err = pipeline.run(&mut ctx).unwrap_err();
        assert!(matches!(err, EtlError::InvalidTransition { .. }));
        assert_eq!(ctx.stage(), PipelineStage::Done);
    }

    #[test]
    fn test_check_does_not_write() {
        let dir = TempDir::new().unwrap();
        let config = write_sources(
            &dir,
            "order_id,customer_id,order_date,total_amount,status\n1,7,2024-03-15,1.00,Completed\n",
        );
        let db = config.store.database_path.clone();
        let pipeline = Pipeline::new(config).unwrap();
        let mut ctx = PipelineContext::new(as_of());
        let report = pipeline.check(&mut ctx).unwrap();
        assert_eq!(report.advisory_violations(), 1);
        assert_eq!(ctx.stage(), PipelineStage::Validating);
        assert!(!db.exists());
    }

    #[test]
    fn test_lifetime_overflow_fails_in_transform() {
        let dir = TempDir::new().unwrap();
        let config = write_sources(
            &dir,
            "order_id,customer_id,order_date,total_amount,status\n\
             1,1,2024-03-15,50000000000000000000000000000,Completed\n\
             2,1,2024-03-16,50000000000000000000000000000,Completed\n",
        );
        let db = config.store.database_path.clone();
        let pipeline = Pipeline::new(config).unwrap();
        let mut ctx = PipelineContext::new(as_of());
        let err = pipeline.run(&mut ctx).unwrap_err();

        assert_eq!(err.stage(), "transform");
        match err {
            EtlError::Transform(TransformError::Coercion { table, row, .. }) => {
                assert_eq!(table, "orders");
                assert_eq!(row, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ctx.failure().unwrap().stage, PipelineStage::Transforming);
        assert!(!db.exists());
    }

    #[test]
    fn test_revenue_overflow_fails_before_load() {
        let dir = TempDir::new().unwrap();
        // Pending orders stay out of lifetime value but count towards revenue.
        let config = write_sources(
            &dir,
            "order_id,customer_id,order_date,total_amount,status\n\
             1,1,2024-03-15,50000000000000000000000000000,Pending\n\
             2,2,2024-03-16,50000000000000000000000000000,Pending\n",
        );
        let db = config.store.database_path.clone();
        let pipeline = Pipeline::new(config).unwrap();
        let mut ctx = PipelineContext::new(as_of());
        let err = pipeline.run(&mut ctx).unwrap_err();

        assert_eq!(err.stage(), "transform");
        assert!(err.to_string().contains("total revenue"));
        assert!(!db.exists());
    }

    #[test]
    fn test_summary_display() {
        let summary = PipelineSummary {
            customers: 1000,
            products: 100,
            orders: 5000,
            total_revenue: Decimal::new(123456789, 2),
            completed_revenue: Decimal::new(100, 2),
            first_order: NaiveDate::from_ymd_opt(2023, 1, 1),
            last_order: NaiveDate::from_ymd_opt(2023, 12, 31),
            advisory_findings: 2,
        };
        let text = summary.to_string();
        assert!(text.contains("- Customers: 1,000"));
        assert!(text.contains("- Total Revenue: 1,234,567.89"));
        assert!(text.contains("- Date Range: 2023-01-01 to 2023-12-31"));
    }

    #[test]
    fn test_group_digits() {
        assert_eq!(group_digits("0"), "0");
        assert_eq!(group_digits("999"), "999");
        assert_eq!(group_digits("1000"), "1,000");
        assert_eq!(group_digits("-1234567.5"), "-1,234,567.5");
    }
}
