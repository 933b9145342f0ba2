use tracing::info;
use ulid::Ulid;

use crate::clock::widen_to_days;
use crate::limits::{MAX_NAME_LEN, MAX_QUERY_WINDOW_MS};
use crate::model::*;

use super::availability::{check_event_availability, check_reservations_in_window};
use super::conflict::{conflict, validate_instant, validate_span};
use super::reservations::validate_text;
use super::store::Store;
use super::{ConflictKind, Engine, EngineError};

#[derive(Debug, Clone)]
pub struct TimeBlockInput {
    pub title: String,
    pub notes: Option<String>,
    pub start_at: Ms,
    pub end_at: Ms,
}

#[derive(Debug, Clone, Default)]
pub struct TimeBlockPatch {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub start_at: Option<Ms>,
    pub end_at: Option<Ms>,
}

fn validate_block(title: &str, notes: Option<&str>, span: &Span) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::bad_request("El título del bloqueo es obligatorio"));
    }
    if title.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("block title too long"));
    }
    validate_text(notes, "block notes too long")?;
    validate_span(span)
}

/// A block may not share a day with another block nor with any live reservation.
fn ensure_block_free(store: &Store, span: &Span, ignore: &[Ulid]) -> Result<(), EngineError> {
    if check_event_availability(store, span, ignore) {
        return Err(conflict(ConflictKind::TimeBlock));
    }
    if check_reservations_in_window(store, span, &[]) {
        return Err(conflict(ConflictKind::Reservation));
    }
    Ok(())
}

impl Engine {
    /// Blocks sorted by start. With a range, only blocks touching its days.
    pub async fn list_time_blocks(&self, range: Option<Span>) -> Result<Vec<TimeBlock>, EngineError> {
        if let Some(range) = &range {
            validate_instant(range.start)?;
            validate_instant(range.end)?;
        }
        let store = self.read().await;
        let mut blocks: Vec<TimeBlock> = match range {
            Some(range) => {
                if range.start > range.end {
                    return Err(EngineError::bad_request(
                        "La fecha de inicio debe ser anterior a la fecha de fin",
                    ));
                }
                if range.duration_ms() > MAX_QUERY_WINDOW_MS {
                    return Err(EngineError::LimitExceeded("query window too wide"));
                }
                let window = widen_to_days(&range, store.config.utc_offset_minutes);
                store
                    .blocks()
                    .overlapping(&window)
                    .filter_map(|e| store.time_blocks.get(&e.id).cloned())
                    .collect()
            }
            None => store.time_blocks.values().cloned().collect(),
        };
        blocks.sort_by_key(|b| (b.span.start, b.id));
        Ok(blocks)
    }

    pub async fn create_time_block(&self, actor: Option<&str>, input: TimeBlockInput) -> Result<TimeBlock, EngineError> {
        let span = Span {
            start: input.start_at,
            end: input.end_at,
        };
        validate_block(&input.title, input.notes.as_deref(), &span)?;

        let mut txn = self.begin(actor).await?;
        ensure_block_free(txn.store(), &span, &[])?;
        let block = TimeBlock {
            id: Ulid::new(),
            title: input.title,
            notes: input.notes,
            span,
        };
        txn.stage(Event::TimeBlockSaved { block: block.clone() });
        self.commit(txn).await?;

        info!(business = %self.business_id, block = %block.id, "time block created");
        Ok(block)
    }

    pub async fn update_time_block(
        &self,
        actor: Option<&str>,
        id: Ulid,
        patch: TimeBlockPatch,
    ) -> Result<TimeBlock, EngineError> {
        let mut txn = self.begin(actor).await?;
        let mut block = txn.store().time_block(id)?.clone();
        if let Some(title) = patch.title {
            block.title = title;
        }
        if patch.notes.is_some() {
            block.notes = patch.notes;
        }
        block.span = Span {
            start: patch.start_at.unwrap_or(block.span.start),
            end: patch.end_at.unwrap_or(block.span.end),
        };
        validate_block(&block.title, block.notes.as_deref(), &block.span)?;
        ensure_block_free(txn.store(), &block.span, &[id])?;

        txn.stage(Event::TimeBlockSaved { block: block.clone() });
        self.commit(txn).await?;

        info!(business = %self.business_id, block = %id, "time block updated");
        Ok(block)
    }

    pub async fn delete_time_block(&self, actor: Option<&str>, id: Ulid) -> Result<(), EngineError> {
        let mut txn = self.begin(actor).await?;
        txn.store().time_block(id)?;
        txn.stage(Event::TimeBlockDeleted { id });
        self.commit(txn).await?;

        info!(business = %self.business_id, block = %id, "time block deleted");
        Ok(())
    }
}
