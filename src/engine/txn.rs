use tokio::sync::RwLockWriteGuard;
use ulid::Ulid;

use crate::clock::{now_ms, year_of};
use crate::model::*;

use super::draft::DraftCache;
use super::store::Store;
use super::EngineError;

/// A serialized unit of work on one business.
///
/// Holds the business write lock from `Engine::begin` until commit or drop.
/// Mutations are staged as events; nothing reaches the store or the WAL
/// until `Engine::commit`. Dropping an uncommitted transaction discards the
/// staged events and evicts its draft.
pub struct Txn<'a> {
    pub id: Ulid,
    pub now: Ms,
    pub actor: Option<String>,
    store: RwLockWriteGuard<'a, Store>,
    drafts: &'a DraftCache,
    staged: Vec<Event>,
}

impl<'a> Txn<'a> {
    pub(super) fn new(store: RwLockWriteGuard<'a, Store>, drafts: &'a DraftCache, actor: Option<&str>) -> Self {
        Self {
            id: Ulid::new(),
            now: now_ms(),
            actor: actor.map(str::to_string),
            store,
            drafts,
            staged: Vec::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(super) fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn stage(&mut self, event: Event) {
        self.staged.push(event);
    }

    pub fn staged(&self) -> &[Event] {
        &self.staged
    }

    pub(super) fn take_staged(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.staged)
    }

    // ── Draft ────────────────────────────────────────────────

    pub fn put_draft(&self, order: OrderReceipt) {
        self.drafts.put(self.store.business_id, self.id, order);
    }

    pub fn draft(&self) -> Result<OrderReceipt, EngineError> {
        self.drafts.get(self.store.business_id, self.id)
    }

    // ── Numbering ────────────────────────────────────────────

    /// Next value of a sequence, counting values already staged in this transaction.
    pub fn next_sequence(&mut self, sequence: Sequence) -> u64 {
        let staged_max = self
            .staged
            .iter()
            .filter_map(|e| match e {
                Event::SequenceAdvanced { sequence: s, value } if *s == sequence => Some(*value),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let value = self.store.sequence(sequence).max(staged_max) + 1;
        self.stage(Event::SequenceAdvanced { sequence, value });
        value
    }

    /// Binding operation number, restarted each calendar year when the business asks for it.
    pub fn next_operation_number(&mut self) -> u64 {
        let config = &self.store.config;
        let year = config
            .consecutive_operation_number_per_year
            .then(|| year_of(self.now, config.utc_offset_minutes));
        self.next_sequence(Sequence::Operation { year })
    }

    // ── Audit ────────────────────────────────────────────────

    pub fn record(
        &mut self,
        order: &OrderReceipt,
        line_id: Option<Ulid>,
        action: RecordAction,
        title: &str,
        details: String,
    ) {
        let record = ReservationRecord {
            id: Ulid::new(),
            order_id: order.id,
            line_id,
            action,
            title: title.to_string(),
            details,
            actor: self.actor.clone(),
            status: order.status,
            at: self.now,
        };
        self.stage(Event::RecordAppended { record });
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            tracing::debug!(txn = %self.id, staged = self.staged.len(), "transaction rolled back");
        }
        self.drafts.evict(self.store.business_id, self.id);
    }
}
