//! Typed entities produced by the transformer and written by the loader.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three source tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Customers,
    Products,
    Orders,
}

impl TableKind {
    pub const ALL: [TableKind; 3] = [Self::Customers, Self::Products, Self::Orders];

    /// Table name in the relational store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Products => "products",
            Self::Orders => "orders",
        }
    }

    /// Primary key column.
    pub fn key_column(&self) -> &'static str {
        match self {
            Self::Customers => "customer_id",
            Self::Products => "product_id",
            Self::Orders => "order_id",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle status.
///
/// Unrecognised labels are kept verbatim so nothing is lost on the way to the
/// store; the validator reports them as advisory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Completed,
    Pending,
    Cancelled,
    Shipped,
    Returned,
    Other(String),
}

impl OrderStatus {
    /// Parse a status label, case-insensitively.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "completed" => Self::Completed,
            "pending" => Self::Pending,
            "cancelled" | "canceled" => Self::Cancelled,
            "shipped" => Self::Shipped,
            "returned" => Self::Returned,
            _ => Self::Other(label.trim().to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Completed => "Completed",
            Self::Pending => "Pending",
            Self::Cancelled => "Cancelled",
            Self::Shipped => "Shipped",
            Self::Returned => "Returned",
            Self::Other(label) => label,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer row after transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub location: Option<String>,
    pub signup_date: NaiveDate,
    pub customer_segment: Option<String>,
    pub age: Option<i64>,
    /// Days from signup to the run's as-of date, never negative.
    pub tenure_days: i64,
    /// Sum of the customer's completed order amounts.
    pub lifetime_value: Decimal,
}

/// A product row after transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: i64,
    pub name: Option<String>,
    pub category: Option<String>,
    pub price: Decimal,
    pub cost: Option<Decimal>,
    /// Fraction of price kept as profit.
    pub profit_margin: Decimal,
    pub stock_quantity: Option<i64>,
}

/// An order row after transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: i64,
    pub customer_id: i64,
    pub order_date: NaiveDate,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    /// First day of the order's calendar month.
    pub order_month: NaiveDate,
    pub order_year: i32,
}
