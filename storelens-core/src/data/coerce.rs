//! Cell parsers shared by the validator and the transformer.
//!
//! Every parser maps `null` (or an empty string) to `Ok(None)` so that
//! presence and parseability are checked by separate rules.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;

/// Scale used for money columns.
pub const MONEY_SCALE: u32 = 2;
/// Scale used for profit margins.
pub const MARGIN_SCALE: u32 = 4;

const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

/// A cell that could not be read as the expected type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, found '{found}'")]
pub struct CoerceError {
    pub expected: &'static str,
    pub found: String,
}

impl CoerceError {
    fn new(expected: &'static str, value: &Value) -> Self {
        let found = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self { expected, found }
    }
}

/// True when the cell is null or blank.
pub fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Cell rendered as text, `None` when missing.
pub fn text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Parse an integral value. `"3"`, `3` and `3.0` all read as 3.
pub fn parse_integer(value: &Value) -> Result<Option<i64>, CoerceError> {
    let err = || CoerceError::new("integer", value);
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i))
            } else {
                n.as_f64().and_then(integral_f64).map(Some).ok_or_else(err)
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Some(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(integral_f64)
                .map(Some)
                .ok_or_else(err)
        }
        _ => Err(err()),
    }
}

fn integral_f64(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_F64_INT).then_some(f as i64)
}

/// Parse a decimal number from a string or JSON number.
pub fn parse_decimal(value: &Value) -> Result<Option<Decimal>, CoerceError> {
    let raw = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.to_string()
        }
        _ => return Err(CoerceError::new("decimal", value)),
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map(Some)
        .map_err(|_| CoerceError::new("decimal", value))
}

/// Parse a calendar date.
///
/// Accepts `YYYY-MM-DD`, the same followed by a time of day, and RFC 3339
/// timestamps. The time part is discarded.
pub fn parse_date(value: &Value) -> Result<Option<NaiveDate>, CoerceError> {
    let s = match value {
        Value::Null => return Ok(None),
        Value::String(s) => s.trim(),
        _ => return Err(CoerceError::new("date", value)),
    };
    if s.is_empty() {
        return Ok(None);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Some(d));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Some(dt.date()));
        }
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| Some(dt.date_naive()))
        .map_err(|_| CoerceError::new("date", value))
}

/// Round to two places, half away from zero, and pin the scale.
pub fn to_money(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Round a margin fraction to four places and pin the scale.
pub fn to_margin(margin: Decimal) -> Decimal {
    let mut rounded =
        margin.round_dp_with_strategy(MARGIN_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MARGIN_SCALE);
    rounded
}

/// A margin derived from price and cost that does not fit in a `Decimal`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("margin of price {price} and cost {cost} is out of decimal range")]
pub struct MarginOverflow {
    pub price: Decimal,
    pub cost: Decimal,
}

/// Profit margin as a fraction of price. A zero price yields a zero margin.
pub fn derive_margin(price: Decimal, cost: Decimal) -> Result<Decimal, MarginOverflow> {
    if price.is_zero() {
        return Ok(to_margin(Decimal::ZERO));
    }
    price
        .checked_sub(cost)
        .and_then(|gross| gross.checked_div(price))
        .map(to_margin)
        .ok_or(MarginOverflow { price, cost })
}

/// The margin a product row ends up with: the declared one if present,
/// otherwise one derived from cost.
///
/// Price and cost are rounded to money before deriving, so the validator and
/// the transformer always agree on the value.
pub fn effective_margin(
    price: Decimal,
    margin: Option<Decimal>,
    cost: Option<Decimal>,
) -> Result<Option<Decimal>, MarginOverflow> {
    match (margin, cost) {
        (Some(m), _) => Ok(Some(to_margin(m))),
        (None, Some(c)) => derive_margin(to_money(price), to_money(c)).map(Some),
        (None, None) => Ok(None),
    }
}
