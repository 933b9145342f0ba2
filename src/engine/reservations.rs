use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::clock::{day_count, day_start, format_instant};
use crate::jobs::NotificationKind;
use crate::limits::*;
use crate::model::*;

use super::conflict::{PendingSlot, ensure_slot_available, pending_slots, validate_span};
use super::draft::{line_total, recompute_totals};
use super::stock::{self, Removal};
use super::store::Store;
use super::{Engine, EngineError};

// ── Requests ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonRequest {
    pub product_id: Ulid,
    pub quantity: u32,
}

/// One requested reservation line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationItem {
    pub product_id: Ulid,
    pub resource_id: Option<Ulid>,
    pub start_at: Option<Ms>,
    pub end_at: Option<Ms>,
    pub number_adults: u32,
    pub number_kids: u32,
    /// Defaults to the number of days covered by the interval.
    pub quantity: Option<u32>,
    pub addons: Vec<AddonRequest>,
    pub observations: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateReservation {
    pub client_id: Ulid,
    pub area_sales_id: Ulid,
    pub items: Vec<ReservationItem>,
    pub discount: Decimal,
    pub commission: Decimal,
    pub observations: Option<String>,
    pub house_costed: bool,
    pub is_pre_receipt: bool,
}

/// Patch of one reservation line. Absent fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct SlotChange {
    pub line_id: Ulid,
    pub resource_id: Option<Ulid>,
    pub start_at: Option<Ms>,
    pub end_at: Option<Ms>,
    pub number_adults: Option<u32>,
    pub number_kids: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateReservation {
    pub line: Option<SlotChange>,
    pub client_id: Option<Ulid>,
    pub observations: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfirmReservation {
    pub payment_deadline_at: Option<Ms>,
}

#[derive(Debug, Clone, Default)]
pub struct AvailabilityQuery {
    pub start_at: Option<Ms>,
    pub end_at: Option<Ms>,
    pub product_id: Option<Ulid>,
    pub resource_id: Option<Ulid>,
    /// Line being rescheduled; its own slot never conflicts.
    pub ignore_line: Option<Ulid>,
}

struct SlotRequest {
    product_id: Ulid,
    resource_id: Option<Ulid>,
    start_at: Option<Ms>,
    end_at: Option<Ms>,
    number_adults: u32,
    number_kids: u32,
}

impl From<&ReservationItem> for SlotRequest {
    fn from(item: &ReservationItem) -> Self {
        Self {
            product_id: item.product_id,
            resource_id: item.resource_id,
            start_at: item.start_at,
            end_at: item.end_at,
            number_adults: item.number_adults,
            number_kids: item.number_kids,
        }
    }
}

impl SlotRequest {
    fn for_line(line: &SelledProduct, slot: &ReservationSlot) -> Self {
        Self {
            product_id: line.product_id,
            resource_id: slot.resource_id,
            start_at: Some(slot.start_at),
            end_at: Some(slot.end_at),
            number_adults: slot.number_adults,
            number_kids: slot.number_kids,
        }
    }
}

// ── Validation ────────────────────────────────────────────────────

pub(super) fn no_open_cycle() -> EngineError {
    EngineError::not_allowed("No hay un ciclo económico abierto")
}

pub(super) fn validate_percent(value: Decimal, what: &str) -> Result<(), EngineError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(EngineError::bad_request(format!("El {what} debe estar entre 0 y 100")));
    }
    Ok(())
}

pub(super) fn validate_text(value: Option<&str>, what: &'static str) -> Result<(), EngineError> {
    if value.is_some_and(|v| v.len() > MAX_TEXT_LEN) {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_product_window(product: &Product, start: Ms, end: Ms, utc_offset_minutes: i32) -> Result<(), EngineError> {
    if product.always_available_for_reservation {
        return Ok(());
    }
    let (Some(from), Some(to)) = (product.reservation_available_from, product.reservation_available_to) else {
        return Err(EngineError::not_allowed(format!(
            "El producto {} no tiene un período de reservas configurado",
            product.name
        )));
    };
    // The window covers whole days, its last day included.
    let window_start = day_start(from, utc_offset_minutes);
    let window_end = day_start(to, utc_offset_minutes) + DAY_MS;
    if start < window_start || end > window_end {
        return Err(EngineError::not_allowed(format!(
            "El producto {} solo puede reservarse entre {} y {}",
            product.name,
            format_instant(from),
            format_instant(to)
        )));
    }
    Ok(())
}

fn check_policies(store: &Store, product: &Product, slot: &ReservationSlot, now: Ms) -> Result<(), EngineError> {
    let span = slot.span();
    for policy_id in &product.policy_ids {
        let Some(policy) = store.policies.get(policy_id) else {
            tracing::debug!(product = %product.id, policy = %policy_id, "skipping unknown policy");
            continue;
        };
        if !policy.active {
            continue;
        }
        let violation = match policy.rule {
            PolicyRule::MinDuration { ms } => (span.duration_ms() < ms)
                .then(|| format!("la reserva debe durar al menos {} minutos", ms / 60_000)),
            PolicyRule::MaxDuration { ms } => (span.duration_ms() > ms)
                .then(|| format!("la reserva no puede durar más de {} minutos", ms / 60_000)),
            PolicyRule::MinAdvanceNotice { ms } => (span.start - now < ms)
                .then(|| format!("la reserva debe hacerse con {} minutos de antelación", ms / 60_000)),
            PolicyRule::MaxGuests { guests } => (slot.guests() > guests)
                .then(|| format!("la reserva admite como máximo {guests} personas")),
        };
        if let Some(violation) = violation {
            return Err(EngineError::not_allowed(format!("{}: {violation}", policy.name)));
        }
    }
    Ok(())
}

/// Product, resource, interval, policy and conflict checks for one slot,
/// in that order.
fn validate_slot<'s>(
    store: &'s Store,
    req: &SlotRequest,
    now: Ms,
    ignore: &[Ulid],
    pending: &[PendingSlot],
) -> Result<(&'s Product, ReservationSlot), EngineError> {
    let product = store.product(req.product_id)?;
    if !product.is_reservable() {
        return Err(EngineError::not_allowed(format!(
            "El producto {} no está disponible para reservar",
            product.name
        )));
    }
    if let (Some(start), Some(end)) = (req.start_at, req.end_at) {
        check_product_window(product, start, end, store.config.utc_offset_minutes)?;
    }

    if let Some(resource_id) = req.resource_id {
        let resource = store.resource(resource_id)?;
        if !product.resource_ids.contains(&resource_id) {
            return Err(EngineError::not_allowed(format!(
                "El recurso {} no está asociado al producto {}",
                resource.code, product.name
            )));
        }
        if !resource.is_reservable {
            return Err(EngineError::not_allowed(format!(
                "El recurso {} no está disponible para reservar",
                resource.code
            )));
        }
        if req.number_adults > resource.number_adults {
            return Err(EngineError::not_allowed(format!(
                "El recurso {} admite como máximo {} adultos",
                resource.code, resource.number_adults
            )));
        }
        if req.number_kids > resource.number_kids {
            return Err(EngineError::not_allowed(format!(
                "El recurso {} admite como máximo {} niños",
                resource.code, resource.number_kids
            )));
        }
    }

    let (Some(start_at), Some(end_at)) = (req.start_at, req.end_at) else {
        return Err(EngineError::bad_request(
            "Las fechas de inicio y fin de la reserva son obligatorias",
        ));
    };
    validate_span(&Span { start: start_at, end: end_at })?;

    let slot = ReservationSlot {
        resource_id: req.resource_id,
        start_at,
        end_at,
        number_adults: req.number_adults,
        number_kids: req.number_kids,
    };
    check_policies(store, product, &slot, now)?;
    ensure_slot_available(store, &slot.span(), slot.resource_id, ignore, pending)?;
    Ok((product, slot))
}

pub(super) fn build_addons(store: &Store, requests: &[AddonRequest]) -> Result<Vec<LineAddon>, EngineError> {
    if requests.len() > MAX_ADDONS_PER_LINE {
        return Err(EngineError::LimitExceeded("too many addons on line"));
    }
    requests
        .iter()
        .map(|req| {
            let product = store.product(req.product_id)?;
            if product.kind != ProductKind::Addon {
                return Err(EngineError::not_allowed(format!(
                    "El producto {} no es un complemento",
                    product.name
                )));
            }
            if req.quantity == 0 {
                return Err(EngineError::bad_request("La cantidad del complemento debe ser mayor que cero"));
            }
            Ok(LineAddon {
                product_id: product.id,
                name: product.name.clone(),
                quantity: req.quantity,
                price: product.price.clone(),
            })
        })
        .collect()
}

fn build_line(
    store: &Store,
    item: &ReservationItem,
    now: Ms,
    pending: &[PendingSlot],
    precision: u32,
) -> Result<SelledProduct, EngineError> {
    validate_text(item.observations.as_deref(), "observations too long")?;
    let (product, slot) = validate_slot(store, &SlotRequest::from(item), now, &[], pending)?;
    let quantity = item
        .quantity
        .filter(|q| *q > 0)
        .unwrap_or_else(|| day_count(&slot.span()));
    let addons = build_addons(store, &item.addons)?;
    Ok(SelledProduct {
        id: Ulid::new(),
        product_id: product.id,
        name: product.name.clone(),
        kind: product.kind,
        quantity,
        unit_price: product.price.clone(),
        total_price: line_total(&product.price, quantity, precision),
        addons,
        observations: item.observations.clone(),
        reservation: Some(slot),
    })
}

/// Human-readable slot for audit records.
fn describe_slot(store: &Store, slot: &ReservationSlot) -> String {
    let resource = slot
        .resource_id
        .map(|id| match store.resources.get(&id) {
            Some(r) => format!("recurso {}", r.code),
            None => format!("recurso {id}"),
        })
        .unwrap_or_else(|| "sin recurso".to_string());
    format!(
        "{} a {}, {resource}, {} adultos, {} niños",
        format_instant(slot.start_at),
        format_instant(slot.end_at),
        slot.number_adults,
        slot.number_kids
    )
}

fn line_descriptions(store: &Store, order: &OrderReceipt) -> Vec<(Ulid, String)> {
    order
        .reservation_lines()
        .map(|(line, slot)| (line.id, format!("{}: {}", line.name, describe_slot(store, slot))))
        .collect()
}

// ── Lifecycle ─────────────────────────────────────────────────────

impl Engine {
    /// Book one or more slots as a new reservation order.
    pub async fn create_reservation(
        &self,
        actor: Option<&str>,
        req: CreateReservation,
    ) -> Result<OrderReceipt, EngineError> {
        if req.items.is_empty() {
            return Err(EngineError::bad_request("Debe indicar al menos un producto a reservar"));
        }
        if req.items.len() > MAX_ITEMS_PER_ORDER {
            return Err(EngineError::LimitExceeded("too many items in order"));
        }
        validate_percent(req.discount, "descuento")?;
        validate_percent(req.commission, "porcentaje de comisión")?;
        validate_text(req.observations.as_deref(), "observations too long")?;

        let mut txn = self.begin(actor).await?;
        let now = txn.now;

        let precision = {
            let store = txn.store();
            store.client(req.client_id)?;
            let area = store.area(req.area_sales_id)?;
            if !area.is_active || area.kind != AreaKind::Sales {
                return Err(EngineError::not_allowed(format!(
                    "El área {} no es un punto de venta activo",
                    area.name
                )));
            }
            let cycle = store.open_cycle().ok_or_else(no_open_cycle)?;
            let precision = store.config.precision;

            txn.put_draft(OrderReceipt {
                id: Ulid::new(),
                client_id: Some(req.client_id),
                area_sales_id: Some(req.area_sales_id),
                economic_cycle_id: Some(cycle.id),
                origin: OrderOrigin::Admin,
                status: OrderStatus::PaymentPending,
                is_reservation: true,
                is_pre_receipt: req.is_pre_receipt,
                operation_number: None,
                pre_operation_number: None,
                reservation_number: None,
                discount: req.discount,
                commission: req.commission,
                shipping: None,
                house_costed: req.house_costed,
                observations: req.observations.clone(),
                payment_deadline_at: None,
                created_at: now,
                updated_at: now,
                closed_at: None,
                lines: Vec::new(),
                totals: OrderTotals::default(),
            });
            precision
        };

        for item in &req.items {
            let mut draft = txn.draft()?;
            let pending = pending_slots(&draft);
            let line = build_line(txn.store(), item, now, &pending, precision)?;
            draft.lines.push(line);
            recompute_totals(&mut draft, precision);
            txn.put_draft(draft);
        }

        let mut order = txn.draft()?;
        for line in &order.lines {
            stock::consume_line(&mut txn, line)?;
        }
        order.reservation_number = Some(txn.next_sequence(Sequence::Reservation));
        if order.is_pre_receipt {
            order.pre_operation_number = Some(txn.next_sequence(Sequence::PreOperation));
        } else {
            order.operation_number = Some(txn.next_operation_number());
        }

        let descriptions = line_descriptions(txn.store(), &order);
        let notify = txn.store().config.notify_reservations && !order.is_pre_receipt;
        txn.stage(Event::OrderSaved { order: order.clone() });
        for (line_id, details) in descriptions {
            txn.record(&order, Some(line_id), RecordAction::ReservationCreated, "Reserva creada", details);
        }
        self.commit(txn).await?;

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(order.lines.len() as u64);
        info!(
            business = %self.business_id,
            order = %order.id,
            reservation_number = ?order.reservation_number,
            lines = order.lines.len(),
            "reservation created"
        );
        self.notify(notify, order.id, NotificationKind::ReservationConfirmation);
        Ok(order)
    }

    /// Reschedule a reservation line and/or edit the order's client and observations.
    pub async fn update_reservation(
        &self,
        actor: Option<&str>,
        order_id: Ulid,
        req: UpdateReservation,
    ) -> Result<OrderReceipt, EngineError> {
        validate_text(req.observations.as_deref(), "observations too long")?;

        let mut txn = self.begin(actor).await?;
        let now = txn.now;

        let (order, rescheduled) = {
            let store = txn.store();
            let precision = store.config.precision;
            let mut order = store.order(order_id)?.clone();
            if !order.is_reservation {
                return Err(EngineError::not_allowed("La orden no es una reserva"));
            }
            if order.status.is_terminal() {
                return Err(EngineError::not_allowed(format!(
                    "La reserva no puede modificarse en estado {}",
                    order.status.as_str()
                )));
            }
            if let Some(client_id) = req.client_id {
                store.client(client_id)?;
                order.client_id = Some(client_id);
            }
            if let Some(observations) = &req.observations {
                order.observations = Some(observations.clone());
            }

            let mut rescheduled = None;
            if let Some(change) = &req.line {
                let pending = pending_slots(&order);
                let line = order
                    .lines
                    .iter_mut()
                    .find(|l| l.id == change.line_id)
                    .ok_or_else(|| EngineError::not_found(change.line_id, "La reserva no fue encontrada"))?;
                let current = line
                    .reservation
                    .clone()
                    .ok_or_else(|| EngineError::not_allowed("La línea indicada no es una reserva"))?;
                let next = ReservationSlot {
                    resource_id: change.resource_id.or(current.resource_id),
                    start_at: change.start_at.unwrap_or(current.start_at),
                    end_at: change.end_at.unwrap_or(current.end_at),
                    number_adults: change.number_adults.unwrap_or(current.number_adults),
                    number_kids: change.number_kids.unwrap_or(current.number_kids),
                };
                if next != current {
                    let request = SlotRequest::for_line(line, &next);
                    validate_slot(store, &request, now, &[line.id], &pending)?;
                    let previous_quantity = line.quantity;
                    // An explicit quantity survives moves that keep the day count.
                    let days = day_count(&next.span());
                    if days != day_count(&current.span()) {
                        line.quantity = days;
                    }
                    line.total_price = line_total(&line.unit_price, line.quantity, precision);
                    line.reservation = Some(next.clone());
                    let details = format!(
                        "{}: {} pasa a {}",
                        line.name,
                        describe_slot(store, &current),
                        describe_slot(store, &next)
                    );
                    rescheduled = Some((line.id, line.product_id, previous_quantity, line.quantity, details));
                }
            }

            recompute_totals(&mut order, precision);
            order.updated_at = now;
            (order, rescheduled)
        };

        let (line_id, action, title, details) = match &rescheduled {
            Some((line_id, product_id, before, after, details)) => {
                if after > before {
                    stock::consume(&mut txn, *product_id, after - before)?;
                } else {
                    stock::release(&mut txn, *product_id, before - after);
                }
                (Some(*line_id), RecordAction::ReservationRescheduled, "Reserva modificada", details.clone())
            }
            None => (
                None,
                RecordAction::ReservationDetailsUpdated,
                "Datos actualizados",
                "Datos de la reserva actualizados".to_string(),
            ),
        };

        let notify = txn.store().config.notify_reservations && rescheduled.is_some();
        txn.stage(Event::OrderSaved { order: order.clone() });
        txn.record(&order, line_id, action, title, details);
        self.commit(txn).await?;

        info!(business = %self.business_id, order = %order.id, rescheduled = rescheduled.is_some(), "reservation updated");
        self.notify(notify, order.id, NotificationKind::ReservationRescheduled);
        Ok(order)
    }

    /// Remove one reservation line. The order stays in its current status;
    /// cancelling the whole order is `cancel_order`.
    pub async fn cancel_reservation_line(
        &self,
        actor: Option<&str>,
        order_id: Ulid,
        line_id: Ulid,
    ) -> Result<OrderReceipt, EngineError> {
        let mut txn = self.begin(actor).await?;
        let now = txn.now;

        let (mut order, line, details) = {
            let store = txn.store();
            let mut order = store.order(order_id)?.clone();
            if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Refunded) {
                return Err(EngineError::not_allowed("La orden ya fue cancelada o reembolsada"));
            }
            let index = order
                .lines
                .iter()
                .position(|l| l.id == line_id)
                .ok_or_else(|| EngineError::not_found(line_id, "La reserva no fue encontrada"))?;
            let Some(slot) = order.lines[index].reservation.clone() else {
                return Err(EngineError::not_allowed("La línea indicada no es una reserva"));
            };
            let line = order.lines.remove(index);
            let details = format!("{}: {}", line.name, describe_slot(store, &slot));
            recompute_totals(&mut order, store.config.precision);
            (order, line, details)
        };
        order.updated_at = now;

        stock::restore_line(&mut txn, &line, Removal::Full);
        txn.stage(Event::RecordsPurged { order_id, line_id });
        txn.stage(Event::OrderSaved { order: order.clone() });
        txn.record(&order, None, RecordAction::ReservationCancelled, "Reserva cancelada", details);
        let notify = txn.store().config.notify_reservations;
        self.commit(txn).await?;

        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!(business = %self.business_id, order = %order_id, line = %line_id, "reservation line removed");
        self.notify(notify, order_id, NotificationKind::ReservationCancelled);
        Ok(order)
    }

    /// Turn a pre-receipt into a binding order after re-checking every slot.
    pub async fn confirm_reservation(
        &self,
        actor: Option<&str>,
        order_id: Ulid,
        req: ConfirmReservation,
    ) -> Result<OrderReceipt, EngineError> {
        let mut txn = self.begin(actor).await?;
        let now = txn.now;

        let mut order = {
            let store = txn.store();
            let mut order = store.order(order_id)?.clone();
            if !order.is_pre_receipt {
                return Err(EngineError::not_allowed("La orden ya fue confirmada"));
            }
            if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Refunded) {
                return Err(EngineError::not_allowed("La orden ya fue cancelada o reembolsada"));
            }
            let cycle = store.open_cycle().ok_or_else(no_open_cycle)?;
            if let Some(deadline) = req.payment_deadline_at
                && deadline < now
            {
                return Err(EngineError::bad_request(
                    "La fecha límite de pago no puede estar en el pasado",
                ));
            }

            // The other lines of this order go live together with each one.
            let pending = pending_slots(&order);
            for (line, slot) in order.reservation_lines() {
                validate_slot(store, &SlotRequest::for_line(line, slot), now, &[line.id], &pending)?;
            }
            order.economic_cycle_id = Some(cycle.id);
            order
        };

        order.is_pre_receipt = false;
        order.operation_number = Some(txn.next_operation_number());
        order.payment_deadline_at = req.payment_deadline_at;
        order.updated_at = now;

        let descriptions = line_descriptions(txn.store(), &order);
        let notify = txn.store().config.notify_reservations;
        txn.stage(Event::OrderSaved { order: order.clone() });
        let summary = format!("Número de operación {}", order.operation_number.unwrap_or_default());
        txn.record(&order, None, RecordAction::TransformedToInvoice, "Transformada en factura", summary);
        for (line_id, details) in descriptions {
            txn.record(&order, Some(line_id), RecordAction::ReservationConfirmed, "Reserva confirmada", details);
        }
        self.commit(txn).await?;

        info!(business = %self.business_id, order = %order.id, operation_number = ?order.operation_number, "reservation confirmed");
        self.notify(notify, order.id, NotificationKind::ReservationConfirmation);
        Ok(order)
    }

    /// Answer whether a slot could be booked right now. `Ok` means free.
    pub async fn check_availability(&self, query: AvailabilityQuery) -> Result<(), EngineError> {
        let (Some(start), Some(end)) = (query.start_at, query.end_at) else {
            return Err(EngineError::bad_request("Las fechas de inicio y fin son obligatorias"));
        };
        let span = Span { start, end };
        validate_span(&span)?;

        let store = self.read().await;
        if let Some(product_id) = query.product_id {
            let product = store.product(product_id)?;
            if let Some(resource_id) = query.resource_id
                && !product.resource_ids.contains(&resource_id)
            {
                let code = store.resource(resource_id)?.code.clone();
                return Err(EngineError::not_allowed(format!(
                    "El recurso {code} no está asociado al producto {}",
                    product.name
                )));
            }
        }
        if let Some(resource_id) = query.resource_id {
            store.resource(resource_id)?;
        }
        let ignore: Vec<Ulid> = query.ignore_line.into_iter().collect();
        ensure_slot_available(&store, &span, query.resource_id, &ignore, &[])
    }

    /// Bookable sub-intervals of `window` for one resource.
    pub async fn free_windows(&self, resource_id: Ulid, window: Span) -> Result<Vec<Span>, EngineError> {
        validate_span(&window)?;
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let store = self.read().await;
        store.resource(resource_id)?;
        Ok(super::availability::free_windows(&store, resource_id, &window))
    }
}
