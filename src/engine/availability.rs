use ulid::Ulid;

use crate::clock::{day_start, widen_to_days};
use crate::limits::DAY_MS;
use crate::model::*;

use super::store::Store;

// ── Conflict probes ───────────────────────────────────────────────
//
// Each probe answers "is there a conflict?" and never errors.

/// Whether a time block collides with `span`. The span is widened to whole
/// local days first, so any block touching those days counts.
pub fn check_event_availability(store: &Store, span: &Span, ignore: &[Ulid]) -> bool {
    let window = widen_to_days(span, store.config.utc_offset_minutes);
    store
        .blocks()
        .overlapping(&window)
        .any(|b| !ignore.contains(&b.id))
}

/// Whether a live reservation on `resource_id` overlaps `span` (half-open).
pub fn check_reservation_availability(store: &Store, span: &Span, resource_id: Ulid, ignore: &[Ulid]) -> bool {
    store
        .resource_slots(Some(resource_id))
        .is_some_and(|index| index.overlapping(span).any(|e| !ignore.contains(&e.id)))
}

/// Whether any live reservation, on any resource, falls in the whole-day
/// window around `span`.
pub fn check_reservations_in_window(store: &Store, span: &Span, ignore: &[Ulid]) -> bool {
    let window = widen_to_days(span, store.config.utc_offset_minutes);
    store
        .all_slots()
        .any(|index| index.overlapping(&window).any(|e| !ignore.contains(&e.id)))
}

// ── Free windows ──────────────────────────────────────────────────

/// Sub-intervals of `window` where `resource_id` could be booked: days
/// touched by a time block and live reservations on the resource are removed.
pub fn free_windows(store: &Store, resource_id: Ulid, window: &Span) -> Vec<Span> {
    let offset = store.config.utc_offset_minutes;
    let mut taken: Vec<Span> = store
        .blocks()
        .iter()
        .map(|b| blocked_days(&b.span, offset))
        .filter(|days| days.overlaps(window))
        .collect();
    if let Some(index) = store.resource_slots(Some(resource_id)) {
        taken.extend(index.overlapping(window).map(|e| e.span));
    }
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);
    subtract_intervals(&[*window], &taken)
}

/// Local days a block touches. A block ending exactly at midnight does not
/// claim the following day.
fn blocked_days(span: &Span, utc_offset_minutes: i32) -> Span {
    let last_instant = (span.end - 1).max(span.start);
    Span::new(
        day_start(span.start, utc_offset_minutes),
        day_start(last_instant, utc_offset_minutes).saturating_add(DAY_MS),
    )
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
