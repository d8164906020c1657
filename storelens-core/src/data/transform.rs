//! Type coercion and derived columns.
//!
//! The transformer never reads the clock: tenure is measured against the
//! `as_of` date it was built with, so the same tables always produce the same
//! output.

use crate::data::coerce::{self, CoerceError};
use crate::data::source::{DataBatch, RawTables};
use crate::error::TransformError;
use crate::model::{Customer, Order, OrderStatus, Product, TableKind};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Typed output tables, ready to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedTables {
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
    pub orders: Vec<Order>,
}

impl TransformedTables {
    /// SHA-256 of the canonical JSON encoding of all three tables.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }
}

/// Coerces validated raw tables into typed records.
#[derive(Debug, Clone, Copy)]
pub struct Transformer {
    as_of: NaiveDate,
}

impl Transformer {
    pub fn new(as_of: NaiveDate) -> Self {
        Self { as_of }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn transform(&self, tables: &RawTables) -> Result<TransformedTables, TransformError> {
        let orders = transform_orders(&tables.orders)?;
        let products = transform_products(&tables.products)?;
        let customers = self.transform_customers(&tables.customers, &orders)?;

        tracing::info!(
            customers = customers.len(),
            products = products.len(),
            orders = orders.len(),
            as_of = %self.as_of,
            "Data transformation completed"
        );

        Ok(TransformedTables {
            customers,
            products,
            orders,
        })
    }

    fn transform_customers(
        &self,
        batch: &DataBatch,
        orders: &[Order],
    ) -> Result<Vec<Customer>, TransformError> {
        let lifetime = lifetime_values(orders)?;
        let cols = Columns::new(TableKind::Customers, batch);
        let id = cols.require("customer_id")?;
        let signup = cols.require("signup_date")?;

        (0..batch.row_count())
            .map(|row| {
                let customer_id = cols.required(row, id, coerce::parse_integer)?;
                let signup_date = cols.required(row, signup, coerce::parse_date)?;
                Ok(Customer {
                    customer_id,
                    name: cols.text(row, "name"),
                    email: cols.text(row, "email"),
                    location: cols.text(row, "location"),
                    signup_date,
                    customer_segment: cols.text(row, "customer_segment"),
                    age: cols.optional(row, "age", coerce::parse_integer)?,
                    tenure_days: (self.as_of - signup_date).num_days().max(0),
                    lifetime_value: coerce::to_money(
                        lifetime.get(&customer_id).copied().unwrap_or(Decimal::ZERO),
                    ),
                })
            })
            .collect()
    }
}

/// Sum of completed order amounts per customer.
fn lifetime_values(orders: &[Order]) -> Result<HashMap<i64, Decimal>, TransformError> {
    let mut totals: HashMap<i64, Decimal> = HashMap::new();
    for (row, order) in orders.iter().enumerate() {
        if order.status != OrderStatus::Completed {
            continue;
        }
        let total = totals.entry(order.customer_id).or_default();
        *total = total
            .checked_add(order.total_amount)
            .ok_or_else(|| TransformError::Coercion {
                table: TableKind::Orders.to_string(),
                column: "total_amount".into(),
                row,
                reason: format!(
                    "lifetime value of customer {} is out of decimal range",
                    order.customer_id
                ),
            })?;
    }
    Ok(totals)
}

/// First day of the date's calendar month.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn transform_orders(batch: &DataBatch) -> Result<Vec<Order>, TransformError> {
    let cols = Columns::new(TableKind::Orders, batch);
    let id = cols.require("order_id")?;
    let customer = cols.require("customer_id")?;
    let date = cols.require("order_date")?;
    let amount = cols.require("total_amount")?;
    let status = cols.require("status")?;

    (0..batch.row_count())
        .map(|row| {
            let order_date = cols.required(row, date, coerce::parse_date)?;
            let label = coerce::text(batch.cell(row, status)).ok_or_else(|| {
                cols.error(row, "status", "missing value".into())
            })?;
            Ok(Order {
                order_id: cols.required(row, id, coerce::parse_integer)?,
                customer_id: cols.required(row, customer, coerce::parse_integer)?,
                order_date,
                total_amount: coerce::to_money(cols.required(
                    row,
                    amount,
                    coerce::parse_decimal,
                )?),
                status: OrderStatus::parse(&label),
                order_month: month_start(order_date),
                order_year: order_date.year(),
            })
        })
        .collect()
}

fn transform_products(batch: &DataBatch) -> Result<Vec<Product>, TransformError> {
    let cols = Columns::new(TableKind::Products, batch);
    let id = cols.require("product_id")?;
    let price_col = cols.require("price")?;

    (0..batch.row_count())
        .map(|row| {
            let price = coerce::to_money(cols.required(row, price_col, coerce::parse_decimal)?);
            let cost = cols
                .optional(row, "cost", coerce::parse_decimal)?
                .map(coerce::to_money);
            let declared = cols.optional(row, "profit_margin", coerce::parse_decimal)?;
            let profit_margin = coerce::effective_margin(price, declared, cost)
                .map_err(|e| cols.error(row, "profit_margin", e.to_string()))?
                .ok_or_else(|| {
                    cols.error(
                        row,
                        "profit_margin",
                        "no margin or cost to derive it from".into(),
                    )
                })?;
            Ok(Product {
                product_id: cols.required(row, id, coerce::parse_integer)?,
                name: cols.text(row, "name"),
                category: cols.text(row, "category"),
                price,
                cost,
                profit_margin,
                stock_quantity: cols.optional(row, "stock_quantity", coerce::parse_integer)?,
            })
        })
        .collect()
}

/// Column lookup with error context for one table.
struct Columns<'a> {
    table: TableKind,
    batch: &'a DataBatch,
}

impl<'a> Columns<'a> {
    fn new(table: TableKind, batch: &'a DataBatch) -> Self {
        Self { table, batch }
    }

    fn require(&self, name: &str) -> Result<usize, TransformError> {
        self.batch
            .column_index(name)
            .ok_or_else(|| TransformError::MissingColumn {
                table: self.table.to_string(),
                column: name.to_string(),
            })
    }

    fn error(&self, row: usize, column: &str, reason: String) -> TransformError {
        TransformError::Coercion {
            table: self.table.to_string(),
            column: column.to_string(),
            row,
            reason,
        }
    }

    fn required<T>(
        &self,
        row: usize,
        col: usize,
        parse: fn(&serde_json::Value) -> Result<Option<T>, CoerceError>,
    ) -> Result<T, TransformError> {
        let name = &self.batch.columns[col];
        match parse(self.batch.cell(row, col)) {
            Ok(Some(v)) => Ok(v),
            Ok(None) => Err(self.error(row, name, "missing value".into())),
            Err(e) => Err(self.error(row, name, e.to_string())),
        }
    }

    fn optional<T>(
        &self,
        row: usize,
        name: &str,
        parse: fn(&serde_json::Value) -> Result<Option<T>, CoerceError>,
    ) -> Result<Option<T>, TransformError> {
        match self.batch.column_index(name) {
            Some(col) => parse(self.batch.cell(row, col))
                .map_err(|e| self.error(row, name, e.to_string())),
            None => Ok(None),
        }
    }

    fn text(&self, row: usize, name: &str) -> Option<String> {
        self.batch
            .column_index(name)
            .and_then(|col| coerce::text(self.batch.cell(row, col)))
    }
}
