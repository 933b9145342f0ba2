use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::limits::DRAFT_TTL_MS;
use crate::model::*;
use crate::money::{self, Buckets, Price};

use super::EngineError;

struct CachedDraft {
    order: OrderReceipt,
    expires_at: Instant,
}

/// Drafts of orders being assembled inside a transaction, keyed by
/// `(business, transaction id)`. Entries expire after a fixed TTL so a
/// transaction that never finishes can't pin memory.
pub struct DraftCache {
    entries: DashMap<(BusinessId, Ulid), CachedDraft>,
    ttl: Duration,
}

impl Default for DraftCache {
    fn default() -> Self {
        Self::new(Duration::from_millis(DRAFT_TTL_MS))
    }
}

impl DraftCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn put(&self, business_id: BusinessId, txn_id: Ulid, order: OrderReceipt) {
        self.entries.insert(
            (business_id, txn_id),
            CachedDraft {
                order,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get(&self, business_id: BusinessId, txn_id: Ulid) -> Result<OrderReceipt, EngineError> {
        let key = (business_id, txn_id);
        if let Some(entry) = self.entries.get(&key)
            && entry.expires_at > Instant::now()
        {
            return Ok(entry.order.clone());
        }
        self.entries.remove(&key);
        Err(EngineError::DraftNotFound { txn_id })
    }

    pub fn evict(&self, business_id: BusinessId, txn_id: Ulid) {
        self.entries.remove(&(business_id, txn_id));
    }

    /// Drop expired drafts. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, draft| draft.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `unit × quantity`, rounded.
pub(super) fn line_total(unit: &Price, quantity: u32, precision: u32) -> Price {
    Price::new(
        money::mul(unit.amount, Decimal::from(quantity), precision),
        unit.currency.clone(),
    )
}

/// Rebuild the order totals from its lines. Pure function of the lines,
/// percentages, shipping and house-costed flag, so calling it twice is a no-op.
pub fn recompute_totals(order: &mut OrderReceipt, precision: u32) {
    let mut subtotal = Buckets::new(precision);
    for line in &order.lines {
        subtotal.add(&line.total_price.currency, line.total_price.amount);
        for addon in &line.addons {
            let amount = money::mul(addon.price.amount, Decimal::from(addon.quantity), precision);
            subtotal.add(&addon.price.currency, amount);
        }
    }

    let mut discount = Buckets::new(precision);
    let mut commission = Buckets::new(precision);
    let mut shipping = Buckets::new(precision);
    let mut total_to_pay = Buckets::new(precision);

    for currency in subtotal.currencies() {
        let base = subtotal.get(currency);
        let off = money::percent_of(base, order.discount, precision);
        let fee = money::percent_of(base, order.commission, precision);
        if !off.is_zero() {
            discount.add(currency, off);
        }
        if !fee.is_zero() {
            commission.add(currency, fee);
        }
        total_to_pay.add(currency, money::sub(money::add(base, fee, precision), off, precision));
    }

    if let Some(ship) = &order.shipping {
        shipping.add(&ship.currency, ship.amount);
        total_to_pay.add(&ship.currency, ship.amount);
    }

    order.totals = OrderTotals {
        subtotal: subtotal.into_vec(),
        discount: discount.into_vec(),
        commission: commission.into_vec(),
        shipping: shipping.into_vec(),
        total_to_pay: if order.house_costed {
            Vec::new()
        } else {
            total_to_pay.into_vec()
        },
    };
}
