use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::{serde_ms, serde_ms_option};
use crate::money::{CurrencyAmount, DEFAULT_PRECISION, Price};

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Tenant identifier. Every engine belongs to exactly one business.
pub type BusinessId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    #[serde(with = "serde_ms")]
    pub start: Ms,
    #[serde(with = "serde_ms")]
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Business ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessConfig {
    pub name: String,
    /// Decimal places for every money operation.
    pub precision: u32,
    pub default_currency: String,
    /// Restart the operation number sequence every calendar year.
    pub consecutive_operation_number_per_year: bool,
    /// Online orders still unpaid after this many hours are cancelled.
    pub online_shop_cancel_order_after_hours: Option<u32>,
    pub notify_reservations: bool,
    /// Offset used for day boundaries and calendar years.
    pub utc_offset_minutes: i32,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            precision: DEFAULT_PRECISION,
            default_currency: "USD".into(),
            consecutive_operation_number_per_year: false,
            online_shop_cancel_order_after_hours: None,
            notify_reservations: false,
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomicCycle {
    pub id: Ulid,
    #[serde(with = "serde_ms")]
    pub opened_at: Ms,
    #[serde(with = "serde_ms_option")]
    pub closed_at: Option<Ms>,
}

// ── Catalog ──────────────────────────────────────────────────────

/// A bookable physical unit (a table, a room).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: Ulid,
    pub code: String,
    pub description: Option<String>,
    pub number_adults: u32,
    pub number_kids: u32,
    pub is_reservable: bool,
    pub area_id: Option<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductKind {
    Service,
    Stock,
    Menu,
    Combo,
    Addon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Ulid,
    pub name: String,
    pub kind: ProductKind,
    pub price: Price,
    /// `None` means stock is not tracked for this product.
    pub stock: Option<u32>,
    pub available_for_reservation: bool,
    pub always_available_for_reservation: bool,
    #[serde(with = "serde_ms_option")]
    pub reservation_available_from: Option<Ms>,
    #[serde(with = "serde_ms_option")]
    pub reservation_available_to: Option<Ms>,
    pub resource_ids: Vec<Ulid>,
    pub policy_ids: Vec<Ulid>,
}

impl Product {
    pub fn is_reservable(&self) -> bool {
        self.kind == ProductKind::Service && self.available_for_reservation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyRule {
    MinDuration { ms: Ms },
    MaxDuration { ms: Ms },
    /// Bookings must be made at least this long before they start.
    MinAdvanceNotice { ms: Ms },
    MaxGuests { guests: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPolicy {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
    pub rule: PolicyRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AreaKind {
    Sales,
    Stock,
    Manufacturer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesArea {
    pub id: Ulid,
    pub name: String,
    pub kind: AreaKind,
    pub is_active: bool,
}

// ── Orders ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    PaymentPending,
    Billed,
    Overdue,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Statuses whose reservations hold their slot.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            OrderStatus::Billed | OrderStatus::Created | OrderStatus::PaymentPending | OrderStatus::Overdue
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Billed | OrderStatus::Refunded)
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Created, PaymentPending | Billed) => true,
            (PaymentPending, Billed | Overdue) => true,
            (Overdue, Billed) => true,
            (from, Cancelled | Refunded) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::PaymentPending => "PAYMENT_PENDING",
            OrderStatus::Billed => "BILLED",
            OrderStatus::Overdue => "OVERDUE",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderOrigin {
    Admin,
    Pos,
    Online,
}

/// The booked part of a reservation line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSlot {
    pub resource_id: Option<Ulid>,
    #[serde(with = "serde_ms", rename = "startDateAt")]
    pub start_at: Ms,
    #[serde(with = "serde_ms", rename = "endDateAt")]
    pub end_at: Ms,
    pub number_adults: u32,
    pub number_kids: u32,
}

impl ReservationSlot {
    pub fn span(&self) -> Span {
        Span::new(self.start_at, self.end_at)
    }

    pub fn guests(&self) -> u32 {
        self.number_adults.saturating_add(self.number_kids)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineAddon {
    pub product_id: Ulid,
    pub name: String,
    pub quantity: u32,
    pub price: Price,
}

/// An order line. Lines carrying a slot are reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelledProduct {
    pub id: Ulid,
    pub product_id: Ulid,
    pub name: String,
    pub kind: ProductKind,
    pub quantity: u32,
    pub unit_price: Price,
    pub total_price: Price,
    pub addons: Vec<LineAddon>,
    pub observations: Option<String>,
    pub reservation: Option<ReservationSlot>,
}

impl SelledProduct {
    pub fn is_reservation(&self) -> bool {
        self.reservation.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: Vec<CurrencyAmount>,
    pub discount: Vec<CurrencyAmount>,
    pub commission: Vec<CurrencyAmount>,
    pub shipping: Vec<CurrencyAmount>,
    pub total_to_pay: Vec<CurrencyAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub id: Ulid,
    pub client_id: Option<Ulid>,
    pub area_sales_id: Option<Ulid>,
    pub economic_cycle_id: Option<Ulid>,
    pub origin: OrderOrigin,
    pub status: OrderStatus,
    pub is_reservation: bool,
    pub is_pre_receipt: bool,
    pub operation_number: Option<u64>,
    pub pre_operation_number: Option<u64>,
    pub reservation_number: Option<u64>,
    /// Percentages applied to the subtotal.
    pub discount: Decimal,
    pub commission: Decimal,
    pub shipping: Option<Price>,
    pub house_costed: bool,
    pub observations: Option<String>,
    #[serde(with = "serde_ms_option")]
    pub payment_deadline_at: Option<Ms>,
    #[serde(with = "serde_ms")]
    pub created_at: Ms,
    #[serde(with = "serde_ms")]
    pub updated_at: Ms,
    #[serde(with = "serde_ms_option")]
    pub closed_at: Option<Ms>,
    #[serde(rename = "selledProducts")]
    pub lines: Vec<SelledProduct>,
    pub totals: OrderTotals,
}

impl OrderReceipt {
    /// Whether this order's reservations block their slots for others.
    pub fn holds_slots(&self) -> bool {
        self.status.is_live() && !self.is_pre_receipt
    }

    pub fn line(&self, id: Ulid) -> Option<&SelledProduct> {
        self.lines.iter().find(|l| l.id == id)
    }

    pub fn reservation_lines(&self) -> impl Iterator<Item = (&SelledProduct, &ReservationSlot)> {
        self.lines
            .iter()
            .filter_map(|l| l.reservation.as_ref().map(|slot| (l, slot)))
    }
}

// ── Audit trail ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordAction {
    ReservationCreated,
    ReservationRescheduled,
    ReservationCancelled,
    ReservationConfirmed,
    TransformedToInvoice,
    OrderCancelled,
    OrderStatusChanged,
    LineRemoved,
    ReservationDetailsUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRecord {
    pub id: Ulid,
    pub order_id: Ulid,
    /// Absent for order-level entries.
    pub line_id: Option<Ulid>,
    pub action: RecordAction,
    pub title: String,
    pub details: String,
    pub actor: Option<String>,
    pub status: OrderStatus,
    #[serde(with = "serde_ms")]
    pub at: Ms,
}

// ── Time blocks ──────────────────────────────────────────────────

/// Business-wide blackout interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBlock {
    pub id: Ulid,
    pub title: String,
    pub notes: Option<String>,
    pub span: Span,
}

// ── WAL records ──────────────────────────────────────────────────

/// Numbered sequences allocated per business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sequence {
    /// Binding operation numbers; `year` is set when numbering restarts yearly.
    Operation { year: Option<i32> },
    PreOperation,
    Reservation,
}

/// The event types. Flat, no nesting. A committed transaction is a batch of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessConfigured { config: BusinessConfig },
    CycleOpened { cycle: EconomicCycle },
    CycleClosed { id: Ulid, closed_at: Ms },
    ResourceSaved { resource: Resource },
    ResourceDeleted { id: Ulid },
    ProductSaved { product: Product },
    StockAdjusted { product_id: Ulid, delta: i64 },
    PolicySaved { policy: ReservationPolicy },
    ClientSaved { client: Client },
    SalesAreaSaved { area: SalesArea },
    SequenceAdvanced { sequence: Sequence, value: u64 },
    OrderSaved { order: OrderReceipt },
    RecordAppended { record: ReservationRecord },
    /// Cascade delete of a line's audit trail.
    RecordsPurged { order_id: Ulid, line_id: Ulid },
    TimeBlockSaved { block: TimeBlock },
    TimeBlockDeleted { id: Ulid },
}
