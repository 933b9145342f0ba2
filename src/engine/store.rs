use std::collections::HashMap;

use std::sync::Arc;

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Which business owns each top-level entity id, across every loaded tenant.
/// Lets a lookup that misses locally tell "does not exist" from "not yours".
#[derive(Default)]
pub struct Directory {
    owners: DashMap<Ulid, BusinessId>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Ulid, business_id: BusinessId) {
        self.owners.insert(id, business_id);
    }

    pub fn unregister(&self, id: &Ulid) {
        self.owners.remove(id);
    }

    pub fn owner(&self, id: &Ulid) -> Option<BusinessId> {
        self.owners.get(id).map(|e| *e.value())
    }
}

/// An indexed interval: `id` is the line (or block), `owner` the order holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedSpan {
    pub id: Ulid,
    pub owner: Ulid,
    pub span: Span,
}

/// Intervals sorted by `span.start`.
#[derive(Debug, Default, Clone)]
pub struct IntervalIndex {
    entries: Vec<IndexedSpan>,
}

impl IntervalIndex {
    pub fn insert(&mut self, entry: IndexedSpan) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<IndexedSpan> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedSpan> {
        self.entries.iter()
    }

    /// Entries whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &IndexedSpan> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }
}

/// In-memory projection of one business's committed state.
pub struct Store {
    pub business_id: BusinessId,
    pub config: BusinessConfig,
    pub cycles: Vec<EconomicCycle>,
    pub resources: HashMap<Ulid, Resource>,
    pub products: HashMap<Ulid, Product>,
    pub policies: HashMap<Ulid, ReservationPolicy>,
    pub clients: HashMap<Ulid, Client>,
    pub areas: HashMap<Ulid, SalesArea>,
    pub orders: HashMap<Ulid, OrderReceipt>,
    /// Audit trail per order, in append order.
    pub records: HashMap<Ulid, Vec<ReservationRecord>>,
    pub time_blocks: HashMap<Ulid, TimeBlock>,
    pub sequences: HashMap<Sequence, u64>,
    /// Live reservation slots per resource; `None` collects unassigned reservations.
    slots: HashMap<Option<Ulid>, IntervalIndex>,
    blocks: IntervalIndex,
    directory: Arc<Directory>,
}

impl Store {
    pub fn new(business_id: BusinessId, directory: Arc<Directory>) -> Self {
        Self {
            business_id,
            config: BusinessConfig::default(),
            cycles: Vec::new(),
            resources: HashMap::new(),
            products: HashMap::new(),
            policies: HashMap::new(),
            clients: HashMap::new(),
            areas: HashMap::new(),
            orders: HashMap::new(),
            records: HashMap::new(),
            time_blocks: HashMap::new(),
            sequences: HashMap::new(),
            slots: HashMap::new(),
            blocks: IntervalIndex::default(),
            directory,
        }
    }

    // ── Lookups ──────────────────────────────────────────────

    fn missing(&self, id: Ulid, entity: &'static str, message: &str) -> EngineError {
        match self.directory.owner(&id) {
            Some(owner) if owner != self.business_id => EngineError::CrossTenant { id, entity },
            _ => EngineError::not_found(id, message),
        }
    }

    /// Fails when `id` is already taken by another business.
    pub fn ensure_not_foreign(&self, id: Ulid, entity: &'static str) -> Result<(), EngineError> {
        match self.directory.owner(&id) {
            Some(owner) if owner != self.business_id => Err(EngineError::CrossTenant { id, entity }),
            _ => Ok(()),
        }
    }

    pub fn order(&self, id: Ulid) -> Result<&OrderReceipt, EngineError> {
        self.orders
            .get(&id)
            .ok_or_else(|| self.missing(id, "order", "La orden no fue encontrada"))
    }

    pub fn client(&self, id: Ulid) -> Result<&Client, EngineError> {
        self.clients
            .get(&id)
            .ok_or_else(|| self.missing(id, "client", "El cliente no fue encontrado"))
    }

    pub fn area(&self, id: Ulid) -> Result<&SalesArea, EngineError> {
        self.areas
            .get(&id)
            .ok_or_else(|| self.missing(id, "area", "El área no fue encontrada"))
    }

    pub fn product(&self, id: Ulid) -> Result<&Product, EngineError> {
        self.products
            .get(&id)
            .ok_or_else(|| self.missing(id, "product", "El producto no fue encontrado"))
    }

    pub fn resource(&self, id: Ulid) -> Result<&Resource, EngineError> {
        self.resources
            .get(&id)
            .ok_or_else(|| self.missing(id, "resource", "El recurso no fue encontrado"))
    }

    pub fn time_block(&self, id: Ulid) -> Result<&TimeBlock, EngineError> {
        self.time_blocks
            .get(&id)
            .ok_or_else(|| self.missing(id, "time_block", "El bloqueo no fue encontrado"))
    }

    pub fn policy(&self, id: Ulid) -> Result<&ReservationPolicy, EngineError> {
        self.policies
            .get(&id)
            .ok_or_else(|| self.missing(id, "policy", "La política de reserva no fue encontrada"))
    }

    pub fn open_cycle(&self) -> Option<&EconomicCycle> {
        self.cycles.iter().rev().find(|c| c.closed_at.is_none())
    }

    pub fn sequence(&self, sequence: Sequence) -> u64 {
        self.sequences.get(&sequence).copied().unwrap_or(0)
    }

    pub fn resource_slots(&self, resource_id: Option<Ulid>) -> Option<&IntervalIndex> {
        self.slots.get(&resource_id)
    }

    /// Slot indexes for every resource, unassigned reservations included.
    pub fn all_slots(&self) -> impl Iterator<Item = &IntervalIndex> {
        self.slots.values()
    }

    pub fn blocks(&self) -> &IntervalIndex {
        &self.blocks
    }

    // ── Event application ────────────────────────────────────

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::BusinessConfigured { config } => {
                self.config = config.clone();
            }
            Event::CycleOpened { cycle } => {
                self.cycles.push(cycle.clone());
            }
            Event::CycleClosed { id, closed_at } => {
                if let Some(cycle) = self.cycles.iter_mut().find(|c| c.id == *id) {
                    cycle.closed_at = Some(*closed_at);
                }
            }
            Event::ResourceSaved { resource } => {
                self.directory.register(resource.id, self.business_id);
                self.resources.insert(resource.id, resource.clone());
            }
            Event::ResourceDeleted { id } => {
                self.directory.unregister(id);
                self.resources.remove(id);
            }
            Event::ProductSaved { product } => {
                self.directory.register(product.id, self.business_id);
                self.products.insert(product.id, product.clone());
            }
            Event::StockAdjusted { product_id, delta } => {
                if let Some(product) = self.products.get_mut(product_id)
                    && let Some(stock) = product.stock
                {
                    let next = (stock as i64 + delta).clamp(0, u32::MAX as i64);
                    product.stock = Some(next as u32);
                }
            }
            Event::PolicySaved { policy } => {
                self.directory.register(policy.id, self.business_id);
                self.policies.insert(policy.id, policy.clone());
            }
            Event::ClientSaved { client } => {
                self.directory.register(client.id, self.business_id);
                self.clients.insert(client.id, client.clone());
            }
            Event::SalesAreaSaved { area } => {
                self.directory.register(area.id, self.business_id);
                self.areas.insert(area.id, area.clone());
            }
            Event::SequenceAdvanced { sequence, value } => {
                let current = self.sequences.entry(*sequence).or_insert(0);
                *current = (*current).max(*value);
            }
            Event::OrderSaved { order } => {
                if let Some(previous) = self.orders.get(&order.id) {
                    let stale: Vec<(Option<Ulid>, Ulid)> = previous
                        .reservation_lines()
                        .map(|(line, slot)| (slot.resource_id, line.id))
                        .collect();
                    for (resource_id, line_id) in stale {
                        if let Some(index) = self.slots.get_mut(&resource_id) {
                            index.remove(line_id);
                        }
                    }
                }
                if order.holds_slots() {
                    for (line, slot) in order.reservation_lines() {
                        self.slots.entry(slot.resource_id).or_default().insert(IndexedSpan {
                            id: line.id,
                            owner: order.id,
                            span: slot.span(),
                        });
                    }
                }
                self.directory.register(order.id, self.business_id);
                self.orders.insert(order.id, order.clone());
            }
            Event::RecordAppended { record } => {
                self.records
                    .entry(record.order_id)
                    .or_default()
                    .push(record.clone());
            }
            Event::RecordsPurged { order_id, line_id } => {
                if let Some(records) = self.records.get_mut(order_id) {
                    records.retain(|r| r.line_id != Some(*line_id));
                }
            }
            Event::TimeBlockSaved { block } => {
                self.blocks.remove(block.id);
                self.blocks.insert(IndexedSpan {
                    id: block.id,
                    owner: block.id,
                    span: block.span,
                });
                self.directory.register(block.id, self.business_id);
                self.time_blocks.insert(block.id, block.clone());
            }
            Event::TimeBlockDeleted { id } => {
                self.blocks.remove(*id);
                self.directory.unregister(id);
                self.time_blocks.remove(id);
            }
        }
    }

    /// Events that rebuild the current state from scratch. Used by compaction.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = vec![Event::BusinessConfigured {
            config: self.config.clone(),
        }];
        events.extend(self.cycles.iter().map(|c| Event::CycleOpened { cycle: c.clone() }));
        events.extend(self.areas.values().map(|a| Event::SalesAreaSaved { area: a.clone() }));
        events.extend(
            self.resources
                .values()
                .map(|r| Event::ResourceSaved { resource: r.clone() }),
        );
        events.extend(
            self.policies
                .values()
                .map(|p| Event::PolicySaved { policy: p.clone() }),
        );
        events.extend(
            self.products
                .values()
                .map(|p| Event::ProductSaved { product: p.clone() }),
        );
        events.extend(self.clients.values().map(|c| Event::ClientSaved { client: c.clone() }));
        events.extend(
            self.sequences
                .iter()
                .map(|(sequence, value)| Event::SequenceAdvanced {
                    sequence: *sequence,
                    value: *value,
                }),
        );
        events.extend(self.orders.values().map(|o| Event::OrderSaved { order: o.clone() }));
        for records in self.records.values() {
            events.extend(records.iter().map(|r| Event::RecordAppended { record: r.clone() }));
        }
        events.extend(
            self.time_blocks
                .values()
                .map(|b| Event::TimeBlockSaved { block: b.clone() }),
        );
        events
    }
}
