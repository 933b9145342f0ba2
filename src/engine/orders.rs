use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::jobs::NotificationKind;
use crate::limits::*;
use crate::model::*;
use crate::money::Price;

use super::draft::{line_total, recompute_totals};
use super::reservations::{AddonRequest, build_addons, validate_text};
use super::stock::{self, Removal};
use super::txn::Txn;
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct OnlineOrderItem {
    pub product_id: Ulid,
    pub quantity: u32,
    pub addons: Vec<AddonRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct PlaceOnlineOrder {
    pub client_id: Ulid,
    pub items: Vec<OnlineOrderItem>,
    /// In the business default currency.
    pub shipping: Option<Decimal>,
    pub observations: Option<String>,
}

/// Reason written to the audit trail when the sweep cancels an unpaid order.
pub const OVERDUE_REASON: &str = "Pago no recibido en el plazo establecido";

/// Stage everything a cancellation writes: status, stock, audit record.
fn stage_cancellation(txn: &mut Txn<'_>, mut order: OrderReceipt, reason: &str) -> OrderReceipt {
    for line in &order.lines {
        stock::restore_line(txn, line, Removal::Full);
    }
    order.status = OrderStatus::Cancelled;
    order.closed_at = Some(txn.now);
    order.updated_at = txn.now;
    txn.stage(Event::OrderSaved { order: order.clone() });
    txn.record(&order, None, RecordAction::OrderCancelled, "Orden cancelada", reason.to_string());
    order
}

impl Engine {
    /// Mark an order cancelled and give back every unit of stock it consumed.
    /// Its reservations stop holding their slots.
    pub async fn cancel_order(
        &self,
        actor: Option<&str>,
        order_id: Ulid,
        reason: Option<&str>,
    ) -> Result<OrderReceipt, EngineError> {
        let mut txn = self.begin(actor).await?;
        let order = txn.store().order(order_id)?.clone();
        if !order.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(EngineError::not_allowed(format!(
                "La orden no puede cancelarse en estado {}",
                order.status.as_str()
            )));
        }
        let notify = txn.store().config.notify_reservations && order.is_reservation;
        let order = stage_cancellation(&mut txn, order, reason.unwrap_or("Cancelada por el usuario"));
        self.commit(txn).await?;

        metrics::counter!(crate::observability::ORDERS_CANCELLED_TOTAL, "source" => "manual").increment(1);
        info!(business = %self.business_id, order = %order_id, "order cancelled");
        self.notify(notify, order_id, NotificationKind::OrderCancelled);
        Ok(order)
    }

    /// Cancellation run by the background sweep. Re-checks under the lock
    /// that the order is still an unpaid online order past the deadline as
    /// of `as_of`; returns `false` without writing anything when it is not.
    pub async fn cancel_overdue_order(&self, order_id: Ulid, as_of: Ms) -> Result<bool, EngineError> {
        let mut txn = self.begin(Some("system")).await?;
        let order = {
            let store = txn.store();
            let Some(hours) = store.config.online_shop_cancel_order_after_hours else {
                return Ok(false);
            };
            let order = store.order(order_id)?;
            let cutoff = as_of - hours as Ms * HOUR_MS;
            if !is_awaiting_payment(order) || order.created_at > cutoff {
                return Ok(false);
            }
            order.clone()
        };
        stage_cancellation(&mut txn, order, OVERDUE_REASON);
        self.commit(txn).await?;

        metrics::counter!(crate::observability::ORDERS_CANCELLED_TOTAL, "source" => "sweep").increment(1);
        info!(business = %self.business_id, order = %order_id, "overdue online order cancelled");
        Ok(true)
    }

    /// Move an order along the status machine. Cancelling goes through `cancel_order`.
    pub async fn transition_order_status(
        &self,
        actor: Option<&str>,
        order_id: Ulid,
        to: OrderStatus,
    ) -> Result<OrderReceipt, EngineError> {
        if to == OrderStatus::Cancelled {
            return self.cancel_order(actor, order_id, None).await;
        }

        let mut txn = self.begin(actor).await?;
        let mut order = txn.store().order(order_id)?.clone();
        let from = order.status;
        if !from.can_transition_to(to) {
            return Err(EngineError::not_allowed(format!(
                "No se puede pasar de {} a {}",
                from.as_str(),
                to.as_str()
            )));
        }
        order.status = to;
        order.updated_at = txn.now;
        if to.is_terminal() {
            order.closed_at = Some(txn.now);
        }
        txn.stage(Event::OrderSaved { order: order.clone() });
        txn.record(
            &order,
            None,
            RecordAction::OrderStatusChanged,
            "Estado actualizado",
            format!("{} a {}", from.as_str(), to.as_str()),
        );
        self.commit(txn).await?;

        info!(business = %self.business_id, order = %order_id, from = from.as_str(), to = to.as_str(), "order status changed");
        Ok(order)
    }

    /// Create an unpaid order from the online shop. Tracked stock is taken
    /// immediately and given back if the order is cancelled.
    pub async fn place_online_order(
        &self,
        actor: Option<&str>,
        req: PlaceOnlineOrder,
    ) -> Result<OrderReceipt, EngineError> {
        if req.items.is_empty() {
            return Err(EngineError::bad_request("La orden debe tener al menos un producto"));
        }
        if req.items.len() > MAX_ITEMS_PER_ORDER {
            return Err(EngineError::LimitExceeded("too many items in order"));
        }
        if req.items.iter().any(|i| i.quantity == 0) {
            return Err(EngineError::bad_request("La cantidad debe ser mayor que cero"));
        }
        if req.shipping.is_some_and(|s| s < Decimal::ZERO) {
            return Err(EngineError::bad_request("El costo de envío no puede ser negativo"));
        }
        validate_text(req.observations.as_deref(), "observations too long")?;

        let mut txn = self.begin(actor).await?;
        let now = txn.now;

        let mut order = {
            let store = txn.store();
            store.client(req.client_id)?;
            let precision = store.config.precision;
            let mut lines = Vec::with_capacity(req.items.len());
            for item in &req.items {
                let product = store.product(item.product_id)?;
                if product.kind == ProductKind::Addon {
                    return Err(EngineError::not_allowed(format!(
                        "El complemento {} no puede venderse por separado",
                        product.name
                    )));
                }
                let addons = build_addons(store, &item.addons)?;
                lines.push(SelledProduct {
                    id: Ulid::new(),
                    product_id: product.id,
                    name: product.name.clone(),
                    kind: product.kind,
                    quantity: item.quantity,
                    unit_price: product.price.clone(),
                    total_price: line_total(&product.price, item.quantity, precision),
                    addons,
                    observations: None,
                    reservation: None,
                });
            }

            let mut order = OrderReceipt {
                id: Ulid::new(),
                client_id: Some(req.client_id),
                area_sales_id: None,
                economic_cycle_id: store.open_cycle().map(|c| c.id),
                origin: OrderOrigin::Online,
                status: OrderStatus::Created,
                is_reservation: false,
                is_pre_receipt: false,
                operation_number: None,
                pre_operation_number: None,
                reservation_number: None,
                discount: Decimal::ZERO,
                commission: Decimal::ZERO,
                shipping: req
                    .shipping
                    .map(|amount| Price::new(amount, store.config.default_currency.clone())),
                house_costed: false,
                observations: req.observations.clone(),
                payment_deadline_at: None,
                created_at: now,
                updated_at: now,
                closed_at: None,
                lines,
                totals: OrderTotals::default(),
            };
            recompute_totals(&mut order, precision);
            order
        };

        for line in &order.lines {
            stock::consume_line(&mut txn, line)?;
        }
        order.operation_number = Some(txn.next_operation_number());
        txn.stage(Event::OrderSaved { order: order.clone() });
        self.commit(txn).await?;

        info!(business = %self.business_id, order = %order.id, lines = order.lines.len(), "online order placed");
        Ok(order)
    }

    /// Remove a line, or `quantity` units of it. A partial removal gives back
    /// only those units of the line product; removing the whole line also
    /// gives back its addons.
    pub async fn remove_order_line(
        &self,
        actor: Option<&str>,
        order_id: Ulid,
        line_id: Ulid,
        quantity: Option<u32>,
    ) -> Result<OrderReceipt, EngineError> {
        if quantity == Some(0) {
            return Err(EngineError::bad_request("La cantidad debe ser mayor que cero"));
        }

        let mut txn = self.begin(actor).await?;
        let precision = txn.store().config.precision;
        let mut order = txn.store().order(order_id)?.clone();
        if order.status.is_terminal() {
            return Err(EngineError::not_allowed(format!(
                "La orden no puede modificarse en estado {}",
                order.status.as_str()
            )));
        }
        let index = order
            .lines
            .iter()
            .position(|l| l.id == line_id)
            .ok_or_else(|| EngineError::not_found(line_id, "La línea no fue encontrada"))?;

        let removed = quantity.filter(|q| *q < order.lines[index].quantity);
        let details = match removed {
            Some(units) => {
                let line = &mut order.lines[index];
                stock::restore_line(&mut txn, line, Removal::Partial(units));
                line.quantity -= units;
                line.total_price = line_total(&line.unit_price, line.quantity, precision);
                format!("{}: {units} unidades retiradas", line.name)
            }
            None => {
                let line = order.lines.remove(index);
                stock::restore_line(&mut txn, &line, Removal::Full);
                if line.is_reservation() {
                    txn.stage(Event::RecordsPurged { order_id, line_id });
                }
                format!("{}: línea eliminada", line.name)
            }
        };
        recompute_totals(&mut order, precision);
        order.updated_at = txn.now;

        txn.stage(Event::OrderSaved { order: order.clone() });
        let record_line = removed.map(|_| line_id);
        txn.record(&order, record_line, RecordAction::LineRemoved, "Línea retirada", details);
        self.commit(txn).await?;

        info!(business = %self.business_id, order = %order_id, line = %line_id, partial = removed.is_some(), "order line removed");
        Ok(order)
    }
}

pub(super) fn is_awaiting_payment(order: &OrderReceipt) -> bool {
    order.origin == OrderOrigin::Online
        && matches!(order.status, OrderStatus::Created | OrderStatus::PaymentPending)
}
