use ulid::Ulid;

use crate::model::*;

use super::availability::{check_event_availability, check_reservation_availability};
use super::store::Store;
use super::{ConflictKind, EngineError};

/// A slot staged in the current draft but not committed yet.
#[derive(Debug, Clone, Copy)]
pub(super) struct PendingSlot {
    pub line_id: Ulid,
    pub resource_id: Option<Ulid>,
    pub span: Span,
}

/// Slots held by the lines of a draft order.
pub(super) fn pending_slots(order: &OrderReceipt) -> Vec<PendingSlot> {
    order
        .reservation_lines()
        .map(|(line, slot)| PendingSlot {
            line_id: line.id,
            resource_id: slot.resource_id,
            span: slot.span(),
        })
        .collect()
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::bad_request(
            "La fecha de inicio debe ser anterior a la fecha de fin",
        ));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Dates used as query filters must fall in the supported calendar range.
pub(crate) fn validate_instant(ms: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&ms) {
        return Err(EngineError::bad_request("Fecha fuera del rango admitido"));
    }
    Ok(())
}

/// Time blocks first, then reservations on the same resource, both committed
/// and staged in the draft. The first conflict found wins.
pub(super) fn ensure_slot_available(
    store: &Store,
    span: &Span,
    resource_id: Option<Ulid>,
    ignore: &[Ulid],
    pending: &[PendingSlot],
) -> Result<(), EngineError> {
    if check_event_availability(store, span, &[]) {
        return Err(conflict(ConflictKind::TimeBlock));
    }
    let Some(resource_id) = resource_id else {
        return Ok(());
    };
    let staged_overlap = pending.iter().any(|p| {
        p.resource_id == Some(resource_id) && !ignore.contains(&p.line_id) && p.span.overlaps(span)
    });
    if staged_overlap || check_reservation_availability(store, span, resource_id, ignore) {
        return Err(conflict(ConflictKind::Reservation));
    }
    Ok(())
}

pub(super) fn conflict(kind: ConflictKind) -> EngineError {
    metrics::counter!(crate::observability::CONFLICTS_TOTAL, "kind" => kind.label()).increment(1);
    EngineError::Conflict(kind)
}
