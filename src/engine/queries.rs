use ulid::Ulid;

use crate::clock::day_start;
use crate::limits::*;
use crate::model::*;

use super::conflict::validate_instant;
use super::orders::is_awaiting_payment;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_order(&self, order_id: Ulid) -> Result<OrderReceipt, EngineError> {
        let store = self.read().await;
        store.order(order_id).cloned()
    }

    /// Reservation orders with at least one line starting inside
    /// `[from, to]`, both ends taken as whole local days.
    pub async fn list_reservation_orders(
        &self,
        from: Option<Ms>,
        to: Option<Ms>,
    ) -> Result<Vec<OrderReceipt>, EngineError> {
        for date in from.iter().chain(to.iter()) {
            validate_instant(*date)?;
        }
        let store = self.read().await;
        let offset = store.config.utc_offset_minutes;
        let lower = from.map(|f| day_start(f, offset)).unwrap_or(Ms::MIN);
        let upper = to.map(|t| day_start(t, offset) + DAY_MS).unwrap_or(Ms::MAX);
        if lower >= upper {
            return Err(EngineError::bad_request(
                "La fecha de inicio debe ser anterior a la fecha de fin",
            ));
        }

        let mut orders: Vec<OrderReceipt> = store
            .orders
            .values()
            .filter(|o| o.is_reservation)
            .filter(|o| {
                o.reservation_lines()
                    .any(|(_, slot)| slot.start_at >= lower && slot.start_at < upper)
            })
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        Ok(orders)
    }

    /// Audit trail of an order, oldest first.
    pub async fn list_records(&self, order_id: Ulid) -> Result<Vec<ReservationRecord>, EngineError> {
        let store = self.read().await;
        store.order(order_id)?;
        Ok(store.records.get(&order_id).cloned().unwrap_or_default())
    }

    /// Unpaid online orders older than the business threshold, oldest first.
    /// Empty when the business has no threshold configured.
    pub async fn collect_overdue_online_orders(&self, now: Ms, limit: usize) -> Vec<Ulid> {
        let store = self.read().await;
        let Some(hours) = store.config.online_shop_cancel_order_after_hours else {
            return Vec::new();
        };
        let cutoff = now - hours as Ms * HOUR_MS;
        let mut overdue: Vec<(Ms, Ulid)> = store
            .orders
            .values()
            .filter(|o| is_awaiting_payment(o) && o.created_at <= cutoff)
            .map(|o| (o.created_at, o.id))
            .collect();
        overdue.sort_unstable();
        overdue.into_iter().take(limit).map(|(_, id)| id).collect()
    }

    pub async fn business_config(&self) -> BusinessConfig {
        self.read().await.config.clone()
    }
}
