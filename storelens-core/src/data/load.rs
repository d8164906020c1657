//! Bulk load of transformed tables into the relational store.
//!
//! All three tables are dropped, recreated, filled and indexed inside a single
//! transaction. If any statement fails the transaction is rolled back and every
//! table keeps the contents it had before the load started.

use crate::data::transform::TransformedTables;
use crate::error::LoadError;
use crate::model::{Customer, Order, Product, TableKind};
use crate::store::{Store, sqlite_error};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rusqlite::{Transaction, params};
use serde::{Deserialize, Serialize};

const CUSTOMERS_DDL: &str = "CREATE TABLE customers (
    customer_id INTEGER PRIMARY KEY,
    name TEXT,
    email TEXT,
    location TEXT,
    signup_date TEXT NOT NULL,
    customer_segment TEXT,
    age INTEGER,
    tenure_days INTEGER NOT NULL,
    lifetime_value REAL NOT NULL
)";

const PRODUCTS_DDL: &str = "CREATE TABLE products (
    product_id INTEGER PRIMARY KEY,
    name TEXT,
    category TEXT,
    price REAL NOT NULL,
    cost REAL,
    profit_margin REAL NOT NULL,
    stock_quantity INTEGER
)";

const ORDERS_DDL: &str = "CREATE TABLE orders (
    order_id INTEGER PRIMARY KEY,
    customer_id INTEGER NOT NULL,
    order_date TEXT NOT NULL,
    total_amount REAL NOT NULL,
    status TEXT NOT NULL,
    order_month TEXT NOT NULL,
    order_year INTEGER NOT NULL
)";

/// `(index name, table, column)` created after every load.
pub const INDEXES: &[(&str, TableKind, &str)] = &[
    ("idx_customers_customer_id", TableKind::Customers, "customer_id"),
    ("idx_orders_customer_id", TableKind::Orders, "customer_id"),
    ("idx_orders_order_month", TableKind::Orders, "order_month"),
    ("idx_orders_order_date", TableKind::Orders, "order_date"),
    ("idx_products_category", TableKind::Products, "category"),
    ("idx_products_product_id", TableKind::Products, "product_id"),
];

/// Rows written per table by one load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub customers: usize,
    pub products: usize,
    pub orders: usize,
    pub indexes: usize,
}

/// Replace the store's tables with `tables` atomically.
pub fn load(tables: &TransformedTables, store: &mut Store) -> Result<LoadStats, LoadError> {
    let tx = store
        .connection_mut()
        .transaction()
        .map_err(|e| sqlite_error("*", e))?;

    let stats = LoadStats {
        customers: replace_customers(&tx, &tables.customers)?,
        products: replace_products(&tx, &tables.products)?,
        orders: replace_orders(&tx, &tables.orders)?,
        indexes: create_indexes(&tx)?,
    };

    tx.commit().map_err(|e| sqlite_error("*", e))?;
    tracing::info!(
        customers = stats.customers,
        products = stats.products,
        orders = stats.orders,
        indexes = stats.indexes,
        "Data loaded into store"
    );
    Ok(stats)
}

fn recreate(tx: &Transaction<'_>, table: TableKind, ddl: &str) -> Result<(), LoadError> {
    let sql = format!("DROP TABLE IF EXISTS {}; {ddl};", table.as_str());
    tx.execute_batch(&sql)
        .map_err(|e| sqlite_error(table.as_str(), e))
}

fn replace_customers(tx: &Transaction<'_>, rows: &[Customer]) -> Result<usize, LoadError> {
    let table = TableKind::Customers;
    recreate(tx, table, CUSTOMERS_DDL)?;
    let mut stmt = tx
        .prepare(
            "INSERT INTO customers (customer_id, name, email, location, signup_date, \
             customer_segment, age, tenure_days, lifetime_value) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .map_err(|e| sqlite_error(table.as_str(), e))?;
    for c in rows {
        stmt.execute(params![
            c.customer_id,
            c.name,
            c.email,
            c.location,
            c.signup_date.to_string(),
            c.customer_segment,
            c.age,
            c.tenure_days,
            to_real(table, c.lifetime_value)?,
        ])
        .map_err(|e| sqlite_error(table.as_str(), e))?;
    }
    Ok(rows.len())
}

fn replace_products(tx: &Transaction<'_>, rows: &[Product]) -> Result<usize, LoadError> {
    let table = TableKind::Products;
    recreate(tx, table, PRODUCTS_DDL)?;
    let mut stmt = tx
        .prepare(
            "INSERT INTO products (product_id, name, category, price, cost, \
             profit_margin, stock_quantity) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(|e| sqlite_error(table.as_str(), e))?;
    for p in rows {
        let cost = p.cost.map(|c| to_real(table, c)).transpose()?;
        stmt.execute(params![
            p.product_id,
            p.name,
            p.category,
            to_real(table, p.price)?,
            cost,
            to_real(table, p.profit_margin)?,
            p.stock_quantity,
        ])
        .map_err(|e| sqlite_error(table.as_str(), e))?;
    }
    Ok(rows.len())
}

fn replace_orders(tx: &Transaction<'_>, rows: &[Order]) -> Result<usize, LoadError> {
    let table = TableKind::Orders;
    recreate(tx, table, ORDERS_DDL)?;
    let mut stmt = tx
        .prepare(
            "INSERT INTO orders (order_id, customer_id, order_date, total_amount, \
             status, order_month, order_year) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(|e| sqlite_error(table.as_str(), e))?;
    for o in rows {
        stmt.execute(params![
            o.order_id,
            o.customer_id,
            o.order_date.to_string(),
            to_real(table, o.total_amount)?,
            o.status.as_str(),
            o.order_month.to_string(),
            o.order_year,
        ])
        .map_err(|e| sqlite_error(table.as_str(), e))?;
    }
    Ok(rows.len())
}

fn create_indexes(tx: &Transaction<'_>) -> Result<usize, LoadError> {
    for (name, table, column) in INDEXES {
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {name} ON {}({column})",
            table.as_str()
        );
        tx.execute(&sql, [])
            .map_err(|e| sqlite_error(table.as_str(), e))?;
    }
    Ok(INDEXES.len())
}

fn to_real(table: TableKind, value: Decimal) -> Result<f64, LoadError> {
    value.to_f64().ok_or_else(|| LoadError::Conversion {
        table: table.to_string(),
        message: format!("{value} cannot be stored as REAL"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrderStatus;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn order(id: i64, customer_id: i64, cents: i64) -> Order {
        Order {
            order_id: id,
            customer_id,
            order_date: date(2024, 3, 15),
            total_amount: Decimal::new(cents, 2),
            status: OrderStatus::Completed,
            order_month: date(2024, 3, 1),
            order_year: 2024,
        }
    }

    fn tables(orders: Vec<Order>) -> TransformedTables {
        TransformedTables {
            customers: vec![Customer {
                customer_id: 1,
                name: Some("Ada".into()),
                email: None,
                location: Some("London".into()),
                signup_date: date(2023, 1, 1),
                customer_segment: Some("Premium".into()),
                age: Some(36),
                tenure_days: 10,
                lifetime_value: Decimal::new(25000, 2),
            }],
            products: vec![Product {
                product_id: 7,
                name: Some("Lamp".into()),
                category: Some("Home".into()),
                price: Decimal::new(2000, 2),
                cost: None,
                profit_margin: Decimal::new(4000, 4),
                stock_quantity: Some(3),
            }],
            orders,
        }
    }

    #[test]
    fn test_load_writes_rows_and_indexes() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(&dir.path().join("shop.db")).unwrap();
        let stats = load(&tables(vec![order(1, 1, 25000), order(2, 99, 100)]), &mut store).unwrap();
        assert_eq!(
            stats,
            LoadStats {
                customers: 1,
                products: 1,
                orders: 2,
                indexes: INDEXES.len(),
            }
        );

        assert_eq!(store.row_count(TableKind::Orders).unwrap(), Some(2));
        assert_eq!(
            store.index_names(TableKind::Orders).unwrap(),
            vec![
                "idx_orders_customer_id",
                "idx_orders_order_date",
                "idx_orders_order_month"
            ]
        );
        assert_eq!(
            store.index_names(TableKind::Products).unwrap(),
            vec!["idx_products_category", "idx_products_product_id"]
        );
        assert_eq!(
            store.index_names(TableKind::Customers).unwrap(),
            vec!["idx_customers_customer_id"]
        );

        let (amount, month): (f64, String) = store
            .connection()
            .query_row(
                "SELECT total_amount, order_month FROM orders WHERE order_id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(amount, 250.0);
        assert_eq!(month, "2024-03-01");
    }

    #[test]
    fn test_reload_replaces_contents() {
        let mut store = Store::open_in_memory().unwrap();
        load(&tables(vec![order(1, 1, 100), order(2, 1, 200)]), &mut store).unwrap();
        load(&tables(vec![order(3, 1, 300)]), &mut store).unwrap();
        assert_eq!(store.row_count(TableKind::Orders).unwrap(), Some(1));
    }

    #[test]
    fn test_failed_load_keeps_previous_contents() {
        let mut store = Store::open_in_memory().unwrap();
        load(&tables(vec![order(1, 1, 100), order(2, 1, 200)]), &mut store).unwrap();

        let mut next = tables(vec![order(5, 1, 100), order(5, 1, 100)]);
        next.customers[0].customer_id = 42;
        let err = load(&next, &mut store).unwrap_err();
        match &err {
            LoadError::Sqlite { table, .. } => assert_eq!(table, "orders"),
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(store.row_count(TableKind::Orders).unwrap(), Some(2));
        let id: i64 = store
            .connection()
            .query_row("SELECT customer_id FROM customers", [], |row| row.get(0))
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(store.index_names(TableKind::Orders).unwrap().len(), 3);
    }
}
