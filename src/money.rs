//! Fixed-point money arithmetic.
//!
//! Every operation rounds to the business precision (half away from zero).
//! Amounts never pass through `f64`.

use std::collections::BTreeMap;

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PRECISION: u32 = 2;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub amount: Decimal,
    pub currency: String,
}

impl Price {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }
}

/// One currency bucket of an order total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyAmount {
    pub currency: String,
    pub amount: Decimal,
}

pub fn round(value: Decimal, precision: u32) -> Decimal {
    value.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
}

pub fn add(a: Decimal, b: Decimal, precision: u32) -> Decimal {
    round(a + b, precision)
}

pub fn sub(a: Decimal, b: Decimal, precision: u32) -> Decimal {
    round(a - b, precision)
}

pub fn mul(a: Decimal, b: Decimal, precision: u32) -> Decimal {
    round(a * b, precision)
}

/// `None` on division by zero.
pub fn div(a: Decimal, b: Decimal, precision: u32) -> Option<Decimal> {
    a.checked_div(b).map(|q| round(q, precision))
}

/// `percent`% of `amount`.
pub fn percent_of(amount: Decimal, percent: Decimal, precision: u32) -> Decimal {
    round(amount * percent / HUNDRED, precision)
}

/// Accumulates amounts per currency. Iteration order is the currency code,
/// so two accumulations over the same inputs render identically.
#[derive(Debug, Default, Clone)]
pub struct Buckets {
    precision: u32,
    amounts: BTreeMap<String, Decimal>,
}

impl Buckets {
    pub fn new(precision: u32) -> Self {
        Self {
            precision,
            amounts: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, currency: &str, amount: Decimal) {
        let slot = self.amounts.entry(currency.to_string()).or_insert(Decimal::ZERO);
        *slot = add(*slot, amount, self.precision);
    }

    pub fn get(&self, currency: &str) -> Decimal {
        self.amounts.get(currency).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn currencies(&self) -> impl Iterator<Item = &str> {
        self.amounts.keys().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<CurrencyAmount> {
        self.amounts
            .into_iter()
            .map(|(currency, amount)| CurrencyAmount { currency, amount })
            .collect()
    }
}
