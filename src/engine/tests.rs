use std::path::PathBuf;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use ulid::Ulid;

use super::*;
use crate::jobs::{Job, JobQueue, NotificationJob, NotificationKind};
use crate::limits::*;
use crate::model::*;

const H: Ms = HOUR_MS;
/// 2024-06-01T00:00:00Z
const JUNE_1: Ms = 1_717_200_000_000;
/// 2024-07-01T00:00:00Z
const JULY_1: Ms = 1_719_792_000_000;
/// 2025-01-01T00:00:00Z
const JAN_1_2025: Ms = 1_735_689_600_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("reservd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn shared(directory: Arc<Directory>) -> (EngineShared, mpsc::Receiver<Job>) {
    let (jobs, rx) = JobQueue::new(256);
    let shared = EngineShared {
        directory,
        drafts: Arc::new(DraftCache::default()),
        jobs,
    };
    (shared, rx)
}

/// A configured business with an open cycle, one client, one sales area,
/// two tables (T1, T2: 4 adults, 2 kids) and a bookable service on both.
struct Fixture {
    engine: Arc<Engine>,
    jobs: mpsc::Receiver<Job>,
    path: PathBuf,
    client: Ulid,
    area: Ulid,
    product: Ulid,
    t1: Ulid,
    t2: Ulid,
}

async fn fixture(name: &str) -> Fixture {
    fixture_in(name, Arc::new(Directory::new())).await
}

async fn fixture_in(name: &str, directory: Arc<Directory>) -> Fixture {
    let path = test_wal_path(name);
    let (shared, jobs) = shared(directory);
    let engine = Arc::new(Engine::new(Ulid::new(), path.clone(), shared).unwrap());

    engine
        .configure_business(
            Some("admin"),
            BusinessConfig {
                name: "Hostal La Ceiba".into(),
                notify_reservations: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine.open_economic_cycle(Some("admin")).await.unwrap();

    let client = engine
        .upsert_client(
            None,
            ClientInput {
                id: None,
                name: "Ana".into(),
                email: Some("ana@example.com".into()),
            },
        )
        .await
        .unwrap()
        .id;
    let area = engine
        .upsert_sales_area(
            None,
            SalesAreaInput {
                id: None,
                name: "Recepción".into(),
                kind: AreaKind::Sales,
                is_active: true,
            },
        )
        .await
        .unwrap()
        .id;
    let t1 = engine.upsert_resource(None, table("T1")).await.unwrap().id;
    let t2 = engine.upsert_resource(None, table("T2")).await.unwrap().id;
    let product = engine
        .upsert_product(None, service("Mesa", vec![t1, t2]))
        .await
        .unwrap()
        .id;

    Fixture {
        engine,
        jobs,
        path,
        client,
        area,
        product,
        t1,
        t2,
    }
}

fn table(code: &str) -> ResourceInput {
    ResourceInput {
        id: None,
        code: code.into(),
        description: None,
        number_adults: 4,
        number_kids: 2,
        is_reservable: true,
        area_id: None,
    }
}

fn service(name: &str, resource_ids: Vec<Ulid>) -> ProductInput {
    ProductInput {
        id: None,
        name: name.into(),
        kind: ProductKind::Service,
        price: Decimal::new(2500, 2),
        currency: None,
        stock: None,
        available_for_reservation: true,
        always_available_for_reservation: true,
        reservation_available_from: None,
        reservation_available_to: None,
        resource_ids,
        policy_ids: Vec::new(),
    }
}

fn addon(name: &str, stock: u32) -> ProductInput {
    ProductInput {
        kind: ProductKind::Addon,
        price: Decimal::new(300, 2),
        stock: Some(stock),
        available_for_reservation: false,
        always_available_for_reservation: false,
        ..service(name, Vec::new())
    }
}

impl Fixture {
    fn item(&self, resource: Ulid, start: Ms, end: Ms, adults: u32) -> ReservationItem {
        ReservationItem {
            product_id: self.product,
            resource_id: Some(resource),
            start_at: Some(start),
            end_at: Some(end),
            number_adults: adults,
            ..Default::default()
        }
    }

    fn request(&self, items: Vec<ReservationItem>) -> CreateReservation {
        CreateReservation {
            client_id: self.client,
            area_sales_id: self.area,
            items,
            ..Default::default()
        }
    }

    async fn book(&self, resource: Ulid, start: Ms, end: Ms) -> Result<OrderReceipt, EngineError> {
        self.engine
            .create_reservation(Some("ana"), self.request(vec![self.item(resource, start, end, 2)]))
            .await
    }

    async fn pre_receipt(&self, resource: Ulid, start: Ms, end: Ms) -> Result<OrderReceipt, EngineError> {
        let mut req = self.request(vec![self.item(resource, start, end, 2)]);
        req.is_pre_receipt = true;
        self.engine.create_reservation(Some("ana"), req).await
    }

    async fn is_free(&self, resource: Ulid, start: Ms, end: Ms) -> bool {
        self.engine
            .check_availability(AvailabilityQuery {
                start_at: Some(start),
                end_at: Some(end),
                resource_id: Some(resource),
                ..Default::default()
            })
            .await
            .is_ok()
    }

    fn drain_jobs(&mut self) -> Vec<Job> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.jobs.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}

fn only_line(order: &OrderReceipt) -> &SelledProduct {
    assert_eq!(order.lines.len(), 1, "expected a single line");
    &order.lines[0]
}

fn is_conflict(result: &Result<OrderReceipt, EngineError>, kind: ConflictKind) -> bool {
    matches!(result, Err(EngineError::Conflict(k)) if *k == kind)
}

// ── End-to-end booking ───────────────────────────────────

#[tokio::test]
async fn booking_two_tables_on_overlapping_hours() {
    let fx = fixture("e2e_two_tables.wal").await;

    let first = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    assert_eq!(first.reservation_number, Some(1));
    assert_eq!(first.status, OrderStatus::PaymentPending);
    assert_eq!(first.origin, OrderOrigin::Admin);
    assert!(first.is_reservation);
    assert!(first.operation_number.is_some());
    let slot = only_line(&first).reservation.clone().unwrap();
    assert_eq!(slot.resource_id, Some(fx.t1));
    assert_eq!(slot.number_adults, 2);

    let clash = fx.book(fx.t1, JUNE_1 + 11 * H, JUNE_1 + 13 * H).await;
    assert!(is_conflict(&clash, ConflictKind::Reservation));
    assert_eq!(clash.unwrap_err().to_string(), "Ya existe una reserva en este rango");

    let second = fx.book(fx.t2, JUNE_1 + 11 * H, JUNE_1 + 13 * H).await.unwrap();
    assert_eq!(second.reservation_number, Some(2));
}

#[tokio::test]
async fn back_to_back_slots_do_not_conflict() {
    let fx = fixture("back_to_back.wal").await;
    fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    fx.book(fx.t1, JUNE_1 + 12 * H, JUNE_1 + 14 * H).await.unwrap();
    fx.book(fx.t1, JUNE_1 + 8 * H, JUNE_1 + 10 * H).await.unwrap();
    assert!(fx.book(fx.t1, JUNE_1 + 9 * H, JUNE_1 + 11 * H).await.is_err());
}

#[tokio::test]
async fn quantity_defaults_to_days_and_prices_the_line() {
    let fx = fixture("quantity_days.wal").await;
    let order = fx.book(fx.t1, JUNE_1, JUNE_1 + 3 * DAY_MS).await.unwrap();
    let line = only_line(&order);
    assert_eq!(line.quantity, 3);
    assert_eq!(line.total_price.amount, Decimal::new(7500, 2));
    assert_eq!(order.totals.total_to_pay.len(), 1);
    assert_eq!(order.totals.total_to_pay[0].amount, Decimal::new(7500, 2));

    let mut req = fx.request(vec![fx.item(fx.t2, JUNE_1, JUNE_1 + 2 * H, 2)]);
    req.items[0].quantity = Some(4);
    let explicit = fx.engine.create_reservation(None, req).await.unwrap();
    assert_eq!(only_line(&explicit).quantity, 4);
}

#[tokio::test]
async fn recomputing_stored_totals_changes_nothing() {
    let fx = fixture("totals_idempotent.wal").await;
    let mut req = fx.request(vec![
        fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2),
        fx.item(fx.t2, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 3),
    ]);
    req.discount = Decimal::new(10, 0);
    req.commission = Decimal::new(5, 0);
    let order = fx.engine.create_reservation(None, req).await.unwrap();

    let mut again = order.clone();
    recompute_totals(&mut again, 2);
    assert_eq!(again.totals, order.totals);
    recompute_totals(&mut again, 2);
    assert_eq!(again.totals, order.totals);
}

// ── Validation ───────────────────────────────────────────

#[tokio::test]
async fn capacity_is_enforced_without_persisting_anything() {
    let fx = fixture("capacity.wal").await;
    let req = fx.request(vec![fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 5)]);
    let err = fx.engine.create_reservation(None, req).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)), "got {err:?}");

    let mut kids = fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 1);
    kids.number_kids = 3;
    let err = fx.engine.create_reservation(None, fx.request(vec![kids])).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)));

    let store = fx.engine.read().await;
    assert!(store.orders.is_empty());
    assert!(store.records.is_empty());
    assert_eq!(store.sequence(Sequence::Reservation), 0);
    drop(store);
    assert!(fx.engine.drafts().is_empty());
}

#[tokio::test]
async fn product_window_limits_bookable_dates() {
    let fx = fixture("product_window.wal").await;
    let seasonal = fx
        .engine
        .upsert_product(
            None,
            ProductInput {
                always_available_for_reservation: false,
                reservation_available_from: Some(JAN_1_2025 + 9 * DAY_MS),
                reservation_available_to: Some(JAN_1_2025 + 19 * DAY_MS),
                ..service("Cabaña", vec![fx.t1])
            },
        )
        .await
        .unwrap();

    let mut item = fx.item(fx.t1, JAN_1_2025 + 4 * DAY_MS, JAN_1_2025 + 7 * DAY_MS, 2);
    item.product_id = seasonal.id;
    let err = fx.engine.create_reservation(None, fx.request(vec![item.clone()])).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)), "got {err:?}");

    item.start_at = Some(JAN_1_2025 + 11 * DAY_MS);
    item.end_at = Some(JAN_1_2025 + 14 * DAY_MS);
    let order = fx.engine.create_reservation(None, fx.request(vec![item.clone()])).await.unwrap();
    assert_eq!(only_line(&order).quantity, 3);

    // The last day of the window is bookable in full.
    item.start_at = Some(JAN_1_2025 + 19 * DAY_MS + 10 * H);
    item.end_at = Some(JAN_1_2025 + 20 * DAY_MS);
    fx.engine.create_reservation(None, fx.request(vec![item])).await.unwrap();
}

#[tokio::test]
async fn product_without_window_must_be_always_available() {
    let fx = fixture("no_window.wal").await;
    let unscheduled = fx
        .engine
        .upsert_product(
            None,
            ProductInput {
                always_available_for_reservation: false,
                ..service("Salón", vec![fx.t1])
            },
        )
        .await
        .unwrap();
    let mut item = fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2);
    item.product_id = unscheduled.id;
    let err = fx.engine.create_reservation(None, fx.request(vec![item])).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)));
}

#[tokio::test]
async fn validation_errors_are_classified() {
    let fx = fixture("validation.wal").await;

    let mut missing_dates = fx.item(fx.t1, 0, 0, 2);
    missing_dates.start_at = None;
    missing_dates.end_at = None;
    let err = fx.engine.create_reservation(None, fx.request(vec![missing_dates])).await.unwrap_err();
    assert!(matches!(err, EngineError::BadRequest(_)), "got {err:?}");

    let reversed = fx.book(fx.t1, JUNE_1 + 12 * H, JUNE_1 + 10 * H).await.unwrap_err();
    assert!(matches!(reversed, EngineError::BadRequest(_)));

    let empty = fx.engine.create_reservation(None, fx.request(Vec::new())).await.unwrap_err();
    assert!(matches!(empty, EngineError::BadRequest(_)));

    let mut unknown_product = fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2);
    unknown_product.product_id = Ulid::new();
    let err = fx.engine.create_reservation(None, fx.request(vec![unknown_product])).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));

    let unknown_resource = fx.book(Ulid::new(), JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap_err();
    assert!(matches!(unknown_resource, EngineError::NotFound { .. }));

    let mut req = fx.request(vec![fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2)]);
    req.discount = Decimal::new(150, 0);
    let err = fx.engine.create_reservation(None, req).await.unwrap_err();
    assert!(matches!(err, EngineError::BadRequest(_)));
}

#[tokio::test]
async fn resource_must_belong_to_product() {
    let fx = fixture("resource_association.wal").await;
    let t3 = fx.engine.upsert_resource(None, table("T3")).await.unwrap().id;
    let err = fx.book(t3, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)));

    let mut closed = table("T1");
    closed.id = Some(fx.t1);
    closed.is_reservable = false;
    fx.engine.upsert_resource(None, closed).await.unwrap();
    let err = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)));
}

#[tokio::test]
async fn booking_needs_open_cycle_and_active_sales_area() {
    let fx = fixture("cycle_and_area.wal").await;

    let mut area = SalesAreaInput {
        id: Some(fx.area),
        name: "Recepción".into(),
        kind: AreaKind::Sales,
        is_active: false,
    };
    fx.engine.upsert_sales_area(None, area.clone()).await.unwrap();
    let err = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)));

    area.is_active = true;
    fx.engine.upsert_sales_area(None, area).await.unwrap();
    fx.engine.close_economic_cycle(None).await.unwrap();
    let err = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)));
}

#[tokio::test]
async fn policies_reject_slots_that_break_them() {
    let fx = fixture("policies.wal").await;
    let guests = fx
        .engine
        .upsert_policy(
            None,
            PolicyInput {
                id: None,
                name: "Grupos pequeños".into(),
                active: true,
                rule: PolicyRule::MaxGuests { guests: 3 },
            },
        )
        .await
        .unwrap();
    let duration = fx
        .engine
        .upsert_policy(
            None,
            PolicyInput {
                id: None,
                name: "Mínimo una hora".into(),
                active: true,
                rule: PolicyRule::MinDuration { ms: H },
            },
        )
        .await
        .unwrap();
    let mut product = service("Mesa", vec![fx.t1, fx.t2]);
    product.id = Some(fx.product);
    product.policy_ids = vec![guests.id, duration.id];
    fx.engine.upsert_product(None, product).await.unwrap();

    let req = fx.request(vec![fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 4)]);
    let err = fx.engine.create_reservation(None, req).await.unwrap_err();
    assert!(err.to_string().starts_with("Grupos pequeños"), "got {err}");

    let short = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 10 * H + 30 * 60_000).await.unwrap_err();
    assert!(matches!(short, EngineError::NotAllowed(_)));

    fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 11 * H).await.unwrap();
}

// ── No double booking ────────────────────────────────────

#[tokio::test]
async fn lines_of_one_request_conflict_with_each_other() {
    let fx = fixture("same_draft_conflict.wal").await;
    let req = fx.request(vec![
        fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2),
        fx.item(fx.t1, JUNE_1 + 11 * H, JUNE_1 + 13 * H, 2),
    ]);
    let result = fx.engine.create_reservation(None, req).await;
    assert!(is_conflict(&result, ConflictKind::Reservation));
    assert!(fx.engine.read().await.orders.is_empty());
    assert!(fx.engine.drafts().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_bookings_admit_one() {
    let fx = fixture("concurrent_same_slot.wal").await;
    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = fx.engine.clone();
        let req = fx.request(vec![fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2)]);
        handles.push(tokio::spawn(async move { engine.create_reservation(None, req).await }));
    }
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| is_conflict(r, ConflictKind::Reservation))
    );
    assert_eq!(fx.engine.read().await.orders.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn committed_slots_never_overlap_under_contention() {
    let fx = fixture("concurrent_random.wal").await;

    // Deterministic pseudo-random half-hour aligned intervals within one day.
    let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };
    let half_hour = H / 2;
    let mut handles = Vec::new();
    for _ in 0..48 {
        let start = JUNE_1 + (next() % 40) as Ms * half_hour;
        let end = start + (1 + next() % 6) as Ms * half_hour;
        let engine = fx.engine.clone();
        let req = fx.request(vec![fx.item(fx.t1, start, end, 1)]);
        handles.push(tokio::spawn(async move { engine.create_reservation(None, req).await }));
    }
    let results = futures::future::join_all(handles).await;
    for result in &results {
        match result.as_ref().unwrap() {
            Ok(_) | Err(EngineError::Conflict(ConflictKind::Reservation)) => {}
            Err(e) => panic!("unexpected error {e:?}"),
        }
    }

    let store = fx.engine.read().await;
    let spans: Vec<Span> = store
        .orders
        .values()
        .flat_map(|o| o.reservation_lines().map(|(_, slot)| slot.span()))
        .collect();
    let accepted = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    assert_eq!(spans.len(), accepted);
    assert!(accepted >= 1);
    for (i, a) in spans.iter().enumerate() {
        for b in &spans[i + 1..] {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }
    }
}

#[tokio::test]
async fn availability_is_symmetric() {
    let cases = [
        ((10, 12), (11, 13)),
        ((10, 12), (12, 14)),
        ((10, 14), (11, 12)),
        ((10, 11), (15, 16)),
        ((9, 17), (9, 17)),
        ((8, 10), (7, 9)),
    ];
    for (n, ((a0, a1), (b0, b1))) in cases.into_iter().enumerate() {
        let fx = fixture(&format!("symmetry_{n}.wal")).await;
        fx.book(fx.t1, JUNE_1 + a0 * H, JUNE_1 + a1 * H).await.unwrap();
        fx.book(fx.t2, JUNE_1 + b0 * H, JUNE_1 + b1 * H).await.unwrap();

        let b_on_a = fx.is_free(fx.t1, JUNE_1 + b0 * H, JUNE_1 + b1 * H).await;
        let a_on_b = fx.is_free(fx.t2, JUNE_1 + a0 * H, JUNE_1 + a1 * H).await;
        assert_eq!(b_on_a, a_on_b, "case {n}");
        let overlaps = Span::new(a0, a1).overlaps(&Span::new(b0, b1));
        assert_eq!(!b_on_a, overlaps, "case {n}");
    }
}

// ── Time blocks ──────────────────────────────────────────

#[tokio::test]
async fn time_block_takes_precedence_over_bookings() {
    let fx = fixture("block_precedence.wal").await;
    let before = fx.book(fx.t1, JULY_1 - DAY_MS + 10 * H, JULY_1 - DAY_MS + 12 * H).await.unwrap();

    fx.engine
        .create_time_block(
            Some("admin"),
            TimeBlockInput {
                title: "Inventario".into(),
                notes: None,
                start_at: JULY_1,
                end_at: JULY_1 + 23 * H + 59 * 60_000,
            },
        )
        .await
        .unwrap();

    for resource in [fx.t1, fx.t2] {
        let result = fx.book(resource, JULY_1 + 10 * H, JULY_1 + 12 * H).await;
        assert!(is_conflict(&result, ConflictKind::TimeBlock));
        assert_eq!(result.unwrap_err().to_string(), "Ya existe un bloqueo en ese horario");
    }

    let line_id = only_line(&before).id;
    let moved = fx
        .engine
        .update_reservation(
            None,
            before.id,
            UpdateReservation {
                line: Some(SlotChange {
                    line_id,
                    start_at: Some(JULY_1 + 10 * H),
                    end_at: Some(JULY_1 + 12 * H),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await;
    assert!(is_conflict(&moved, ConflictKind::TimeBlock));

    // The next day is untouched.
    fx.book(fx.t1, JULY_1 + DAY_MS + 10 * H, JULY_1 + DAY_MS + 12 * H).await.unwrap();
}

#[tokio::test]
async fn time_blocks_cannot_cover_bookings_or_share_a_day() {
    let fx = fixture("block_conflicts.wal").await;
    fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();

    let over_booking = fx
        .engine
        .create_time_block(
            None,
            TimeBlockInput {
                title: "Fumigación".into(),
                notes: None,
                start_at: JUNE_1 + 18 * H,
                end_at: JUNE_1 + 20 * H,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(over_booking, EngineError::Conflict(ConflictKind::Reservation)));

    let block = fx
        .engine
        .create_time_block(
            None,
            TimeBlockInput {
                title: "Fumigación".into(),
                notes: Some("Todo el local".into()),
                start_at: JULY_1 + 8 * H,
                end_at: JULY_1 + 10 * H,
            },
        )
        .await
        .unwrap();
    let same_day = fx
        .engine
        .create_time_block(
            None,
            TimeBlockInput {
                title: "Limpieza".into(),
                notes: None,
                start_at: JULY_1 + 20 * H,
                end_at: JULY_1 + 22 * H,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(same_day, EngineError::Conflict(ConflictKind::TimeBlock)));

    // Moving a block within its own day does not collide with itself.
    let moved = fx
        .engine
        .update_time_block(
            None,
            block.id,
            TimeBlockPatch {
                start_at: Some(JULY_1 + 12 * H),
                end_at: Some(JULY_1 + 14 * H),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.span, Span::new(JULY_1 + 12 * H, JULY_1 + 14 * H));
    assert_eq!(moved.notes.as_deref(), Some("Todo el local"));

    let listed = fx
        .engine
        .list_time_blocks(Some(Span::new(JULY_1 + 23 * H, JULY_1 + 23 * H)))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(fx.engine.list_time_blocks(Some(Span::new(JUNE_1, JUNE_1))).await.unwrap().is_empty());

    fx.engine.delete_time_block(None, block.id).await.unwrap();
    fx.book(fx.t1, JULY_1 + 10 * H, JULY_1 + 12 * H).await.unwrap();
    let gone = fx.engine.delete_time_block(None, block.id).await.unwrap_err();
    assert!(matches!(gone, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn free_windows_skip_bookings_and_blocked_days() {
    let fx = fixture("free_windows.wal").await;
    fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    fx.engine
        .create_time_block(
            None,
            TimeBlockInput {
                title: "Cerrado".into(),
                notes: None,
                start_at: JUNE_1 + DAY_MS + 9 * H,
                end_at: JUNE_1 + DAY_MS + 11 * H,
            },
        )
        .await
        .unwrap();

    let free = fx
        .engine
        .free_windows(fx.t1, Span::new(JUNE_1 + 8 * H, JUNE_1 + 2 * DAY_MS + 8 * H))
        .await
        .unwrap();
    assert_eq!(
        free,
        vec![
            Span::new(JUNE_1 + 8 * H, JUNE_1 + 10 * H),
            Span::new(JUNE_1 + 12 * H, JUNE_1 + DAY_MS),
            Span::new(JUNE_1 + 2 * DAY_MS, JUNE_1 + 2 * DAY_MS + 8 * H),
        ]
    );

    let other = fx
        .engine
        .free_windows(fx.t2, Span::new(JUNE_1 + 8 * H, JUNE_1 + 18 * H))
        .await
        .unwrap();
    assert_eq!(other, vec![Span::new(JUNE_1 + 8 * H, JUNE_1 + 18 * H)]);
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn removing_a_line_frees_its_slot() {
    let mut fx = fixture("cancel_then_rebook.wal").await;
    let order = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    let line_id = only_line(&order).id;

    let after = fx
        .engine
        .cancel_reservation_line(Some("ana"), order.id, line_id)
        .await
        .unwrap();
    assert!(after.lines.is_empty());
    assert_eq!(after.status, OrderStatus::PaymentPending);
    assert!(after.totals.total_to_pay.is_empty());

    let records = fx.engine.list_records(order.id).await.unwrap();
    assert!(records.iter().all(|r| r.line_id != Some(line_id)));
    let cancelled = records
        .iter()
        .find(|r| r.action == RecordAction::ReservationCancelled)
        .unwrap();
    assert_eq!(cancelled.actor.as_deref(), Some("ana"));

    let kinds: Vec<NotificationKind> = fx
        .drain_jobs()
        .into_iter()
        .filter_map(|job| match job {
            Job::Notify(NotificationJob { kind, .. }) => Some(kind),
            Job::CancelOrder(_) => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![NotificationKind::ReservationConfirmation, NotificationKind::ReservationCancelled]
    );

    fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();

    let missing = fx
        .engine
        .cancel_reservation_line(None, order.id, line_id)
        .await
        .unwrap_err();
    assert!(matches!(missing, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn cancelling_the_order_releases_every_slot() {
    let fx = fixture("cancel_order.wal").await;
    let req = fx.request(vec![
        fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2),
        fx.item(fx.t2, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2),
    ]);
    let order = fx.engine.create_reservation(None, req).await.unwrap();

    let cancelled = fx
        .engine
        .cancel_order(Some("admin"), order.id, Some("Cliente no asistirá"))
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert!(cancelled.closed_at.is_some());
    assert_eq!(cancelled.lines.len(), 2);

    assert!(fx.is_free(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await);
    fx.book(fx.t2, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();

    let again = fx.engine.cancel_order(None, order.id, None).await.unwrap_err();
    assert!(matches!(again, EngineError::NotAllowed(_)));
    let update = fx
        .engine
        .update_reservation(None, order.id, UpdateReservation::default())
        .await
        .unwrap_err();
    assert!(matches!(update, EngineError::NotAllowed(_)));
}

#[tokio::test]
async fn rescheduling_revalidates_against_other_bookings() {
    let mut fx = fixture("reschedule.wal").await;
    let a = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    let b = fx.book(fx.t1, JUNE_1 + 14 * H, JUNE_1 + 16 * H).await.unwrap();
    fx.drain_jobs();

    let change = |order: &OrderReceipt, start: Ms, end: Ms| UpdateReservation {
        line: Some(SlotChange {
            line_id: only_line(order).id,
            start_at: Some(start),
            end_at: Some(end),
            ..Default::default()
        }),
        ..Default::default()
    };

    let clash = fx
        .engine
        .update_reservation(None, b.id, change(&b, JUNE_1 + 11 * H, JUNE_1 + 13 * H))
        .await;
    assert!(is_conflict(&clash, ConflictKind::Reservation));

    let moved = fx
        .engine
        .update_reservation(Some("ana"), b.id, change(&b, JUNE_1 + 12 * H, JUNE_1 + 14 * H))
        .await
        .unwrap();
    let slot = only_line(&moved).reservation.clone().unwrap();
    assert_eq!(slot.span(), Span::new(JUNE_1 + 12 * H, JUNE_1 + 14 * H));
    assert!(fx.is_free(fx.t1, JUNE_1 + 14 * H, JUNE_1 + 16 * H).await);

    // Shrinking a slot only overlaps its own previous self.
    fx.engine
        .update_reservation(None, a.id, change(&a, JUNE_1 + 10 * H, JUNE_1 + 11 * H))
        .await
        .unwrap();

    let to_t2 = fx
        .engine
        .update_reservation(
            None,
            a.id,
            UpdateReservation {
                line: Some(SlotChange {
                    line_id: only_line(&a).id,
                    resource_id: Some(fx.t2),
                    number_adults: Some(5),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(to_t2, EngineError::NotAllowed(_)));

    let records = fx.engine.list_records(b.id).await.unwrap();
    assert_eq!(records.last().unwrap().action, RecordAction::ReservationRescheduled);
    let jobs = fx.drain_jobs();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| matches!(
        j,
        Job::Notify(NotificationJob {
            kind: NotificationKind::ReservationRescheduled,
            ..
        })
    )));
}

#[tokio::test]
async fn editing_client_and_notes_keeps_the_slot() {
    let mut fx = fixture("edit_details.wal").await;
    let order = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    fx.drain_jobs();
    let other = fx
        .engine
        .upsert_client(
            None,
            ClientInput {
                id: None,
                name: "Luis".into(),
                email: None,
            },
        )
        .await
        .unwrap();

    let updated = fx
        .engine
        .update_reservation(
            None,
            order.id,
            UpdateReservation {
                client_id: Some(other.id),
                observations: Some("Mesa junto a la ventana".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.client_id, Some(other.id));
    assert_eq!(updated.lines, order.lines);
    assert!(fx.drain_jobs().is_empty());

    let records = fx.engine.list_records(order.id).await.unwrap();
    let last = records.last().unwrap();
    assert_eq!(last.action, RecordAction::ReservationDetailsUpdated);
    assert_eq!(last.line_id, None);
    assert!(!records.iter().any(|r| r.action == RecordAction::ReservationRescheduled));
}

#[tokio::test]
async fn rescheduling_keeps_explicit_quantity_within_the_same_day_count() {
    let fx = fixture("reschedule_quantity.wal").await;
    let mut req = fx.request(vec![fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2)]);
    req.items[0].quantity = Some(4);
    let order = fx.engine.create_reservation(None, req).await.unwrap();
    let line_id = only_line(&order).id;
    let move_to = |start: Ms, end: Ms| UpdateReservation {
        line: Some(SlotChange {
            line_id,
            start_at: Some(start),
            end_at: Some(end),
            ..Default::default()
        }),
        ..Default::default()
    };

    let later = fx
        .engine
        .update_reservation(None, order.id, move_to(JUNE_1 + 14 * H, JUNE_1 + 17 * H))
        .await
        .unwrap();
    assert_eq!(only_line(&later).quantity, 4);
    assert_eq!(only_line(&later).total_price.amount, Decimal::new(10000, 2));

    let longer = fx
        .engine
        .update_reservation(None, order.id, move_to(JUNE_1, JUNE_1 + 2 * DAY_MS))
        .await
        .unwrap();
    assert_eq!(only_line(&longer).quantity, 2);
    assert_eq!(only_line(&longer).total_price.amount, Decimal::new(5000, 2));
}

#[tokio::test]
async fn confirming_a_pre_receipt_rechecks_its_slots() {
    let mut fx = fixture("confirm_pre_receipt.wal").await;
    let stale = fx.pre_receipt(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    assert!(stale.is_pre_receipt);
    assert_eq!(stale.pre_operation_number, Some(1));
    assert_eq!(stale.operation_number, None);
    assert!(fx.drain_jobs().is_empty());

    // A quote does not hold its slot.
    let binding = fx.book(fx.t1, JUNE_1 + 11 * H, JUNE_1 + 13 * H).await.unwrap();
    assert_eq!(binding.operation_number, Some(1));

    let rejected = fx
        .engine
        .confirm_reservation(None, stale.id, ConfirmReservation::default())
        .await;
    assert!(is_conflict(&rejected, ConflictKind::Reservation));
    assert!(fx.engine.get_order(stale.id).await.unwrap().is_pre_receipt);

    let quote = fx.pre_receipt(fx.t2, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    assert_eq!(quote.pre_operation_number, Some(2));
    fx.drain_jobs();
    let confirmed = fx
        .engine
        .confirm_reservation(Some("admin"), quote.id, ConfirmReservation::default())
        .await
        .unwrap();
    assert!(!confirmed.is_pre_receipt);
    assert_eq!(confirmed.operation_number, Some(2));
    assert_eq!(confirmed.pre_operation_number, Some(2));
    assert!(!fx.is_free(fx.t2, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await);

    let records = fx.engine.list_records(quote.id).await.unwrap();
    assert!(records.iter().any(|r| r.action == RecordAction::TransformedToInvoice));
    assert!(records.iter().any(|r| r.action == RecordAction::ReservationConfirmed));
    assert_eq!(fx.drain_jobs().len(), 1);

    let twice = fx
        .engine
        .confirm_reservation(None, quote.id, ConfirmReservation::default())
        .await
        .unwrap_err();
    assert!(matches!(twice, EngineError::NotAllowed(_)));
}

#[tokio::test]
async fn confirm_rejects_past_payment_deadline() {
    let fx = fixture("confirm_deadline.wal").await;
    let quote = fx.pre_receipt(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    let err = fx
        .engine
        .confirm_reservation(
            None,
            quote.id,
            ConfirmReservation {
                payment_deadline_at: Some(JUNE_1),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BadRequest(_)));

    let deadline = crate::clock::now_ms() + DAY_MS;
    let confirmed = fx
        .engine
        .confirm_reservation(
            None,
            quote.id,
            ConfirmReservation {
                payment_deadline_at: Some(deadline),
            },
        )
        .await
        .unwrap();
    assert_eq!(confirmed.payment_deadline_at, Some(deadline));
}

#[tokio::test]
async fn notifications_follow_the_business_setting() {
    let mut fx = fixture("notify_setting.wal").await;
    let order = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    let jobs = fx.drain_jobs();
    assert_eq!(
        jobs,
        vec![Job::Notify(NotificationJob {
            business_id: fx.engine.business_id,
            order_id: order.id,
            kind: NotificationKind::ReservationConfirmation,
        })]
    );

    let mut config = fx.engine.business_config().await;
    config.notify_reservations = false;
    fx.engine.configure_business(None, config).await.unwrap();
    fx.book(fx.t2, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    assert!(fx.drain_jobs().is_empty());
}

#[tokio::test]
async fn addons_consume_and_return_stock() {
    let fx = fixture("addon_stock.wal").await;
    let flowers = fx.engine.upsert_product(None, addon("Flores", 5)).await.unwrap();

    let mut item = fx.item(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2);
    item.addons = vec![AddonRequest {
        product_id: flowers.id,
        quantity: 2,
    }];
    let order = fx.engine.create_reservation(None, fx.request(vec![item.clone()])).await.unwrap();
    assert_eq!(fx.engine.read().await.products[&flowers.id].stock, Some(3));
    let line = only_line(&order);
    assert_eq!(line.addons.len(), 1);
    // 25.00 for the table plus 2 x 3.00 of flowers.
    assert_eq!(order.totals.subtotal[0].amount, Decimal::new(3100, 2));

    item.resource_id = Some(fx.t2);
    item.addons[0].quantity = 4;
    let short = fx.engine.create_reservation(None, fx.request(vec![item])).await.unwrap_err();
    assert!(matches!(short, EngineError::NotAllowed(_)));
    assert_eq!(fx.engine.read().await.products[&flowers.id].stock, Some(3));

    fx.engine.cancel_reservation_line(None, order.id, line.id).await.unwrap();
    assert_eq!(fx.engine.read().await.products[&flowers.id].stock, Some(5));
}

#[tokio::test]
async fn online_orders_only_take_real_addons() {
    let fx = fixture("online_addons.wal").await;
    let wine = fx
        .engine
        .upsert_product(
            None,
            ProductInput {
                kind: ProductKind::Stock,
                stock: Some(10),
                available_for_reservation: false,
                always_available_for_reservation: false,
                ..service("Vino", Vec::new())
            },
        )
        .await
        .unwrap();
    let glass = fx.engine.upsert_product(None, addon("Copa", 10)).await.unwrap();
    let order_with = |addon_id: Ulid, quantity: u32| PlaceOnlineOrder {
        client_id: fx.client,
        items: vec![OnlineOrderItem {
            product_id: wine.id,
            quantity: 1,
            addons: vec![AddonRequest {
                product_id: addon_id,
                quantity,
            }],
        }],
        shipping: None,
        observations: None,
    };

    let err = fx.engine.place_online_order(None, order_with(wine.id, 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)), "got {err:?}");
    let err = fx.engine.place_online_order(None, order_with(fx.product, 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)), "got {err:?}");
    let err = fx.engine.place_online_order(None, order_with(glass.id, 0)).await.unwrap_err();
    assert!(matches!(err, EngineError::BadRequest(_)), "got {err:?}");

    let store = fx.engine.read().await;
    assert!(store.orders.is_empty());
    assert_eq!(store.products[&wine.id].stock, Some(10));
    assert_eq!(store.products[&glass.id].stock, Some(10));
    drop(store);

    let mut too_many = order_with(glass.id, 1);
    too_many.items[0].addons = vec![
        AddonRequest {
            product_id: glass.id,
            quantity: 1,
        };
        MAX_ADDONS_PER_LINE + 1
    ];
    let err = fx.engine.place_online_order(None, too_many).await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let ok = fx.engine.place_online_order(None, order_with(glass.id, 2)).await.unwrap();
    assert_eq!(only_line(&ok).addons.len(), 1);
}

#[tokio::test]
async fn partial_line_removal_returns_only_product_units() {
    let fx = fixture("partial_removal.wal").await;
    let wine = fx
        .engine
        .upsert_product(
            None,
            ProductInput {
                kind: ProductKind::Stock,
                stock: Some(10),
                available_for_reservation: false,
                always_available_for_reservation: false,
                ..service("Vino", Vec::new())
            },
        )
        .await
        .unwrap();
    let glass = fx.engine.upsert_product(None, addon("Copa", 10)).await.unwrap();

    let order = fx
        .engine
        .place_online_order(
            None,
            PlaceOnlineOrder {
                client_id: fx.client,
                items: vec![OnlineOrderItem {
                    product_id: wine.id,
                    quantity: 4,
                    addons: vec![AddonRequest {
                        product_id: glass.id,
                        quantity: 2,
                    }],
                }],
                shipping: None,
                observations: None,
            },
        )
        .await
        .unwrap();
    let stock = |store: &Store| (store.products[&wine.id].stock, store.products[&glass.id].stock);
    assert_eq!(stock(&*fx.engine.read().await), (Some(6), Some(8)));

    let line_id = only_line(&order).id;
    let partial = fx
        .engine
        .remove_order_line(None, order.id, line_id, Some(1))
        .await
        .unwrap();
    assert_eq!(only_line(&partial).quantity, 3);
    assert_eq!(stock(&*fx.engine.read().await), (Some(7), Some(8)));

    let emptied = fx.engine.remove_order_line(None, order.id, line_id, None).await.unwrap();
    assert!(emptied.lines.is_empty());
    assert_eq!(stock(&*fx.engine.read().await), (Some(10), Some(10)));
}

#[tokio::test]
async fn status_machine_is_enforced() {
    let fx = fixture("status_machine.wal").await;
    let order = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();

    let back = fx
        .engine
        .transition_order_status(None, order.id, OrderStatus::Created)
        .await
        .unwrap_err();
    assert!(matches!(back, EngineError::NotAllowed(_)));

    let billed = fx
        .engine
        .transition_order_status(Some("caja"), order.id, OrderStatus::Billed)
        .await
        .unwrap();
    assert_eq!(billed.status, OrderStatus::Billed);
    assert!(billed.closed_at.is_some());
    // Billed reservations keep their slot.
    assert!(!fx.is_free(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await);

    let cancel = fx.engine.cancel_order(None, order.id, None).await.unwrap_err();
    assert!(matches!(cancel, EngineError::NotAllowed(_)));
}

#[tokio::test]
async fn resources_with_live_bookings_cannot_be_deleted() {
    let fx = fixture("delete_resource.wal").await;
    let order = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    let err = fx.engine.delete_resource(None, fx.t1).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)));

    fx.engine.cancel_order(None, order.id, None).await.unwrap();
    fx.engine.delete_resource(None, fx.t1).await.unwrap();
    fx.engine.delete_resource(None, fx.t2).await.unwrap();
    let gone = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap_err();
    assert!(matches!(gone, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn resources_quoted_by_pending_pre_receipts_cannot_be_deleted() {
    let fx = fixture("delete_quoted_resource.wal").await;
    let quote = fx.pre_receipt(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    assert!(fx.engine.read().await.resource_slots(Some(fx.t1)).is_none_or(|i| i.is_empty()));

    let err = fx.engine.delete_resource(None, fx.t1).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAllowed(_)), "got {err:?}");
    assert!(fx.engine.read().await.resources.contains_key(&fx.t1));

    fx.engine.cancel_order(None, quote.id, None).await.unwrap();
    fx.engine.delete_resource(None, fx.t1).await.unwrap();
}

#[tokio::test]
async fn listing_filters_by_slot_start_day() {
    let fx = fixture("list_orders.wal").await;
    let june = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    let july = fx.book(fx.t1, JULY_1 + 10 * H, JULY_1 + 12 * H).await.unwrap();

    let all = fx.engine.list_reservation_orders(None, None).await.unwrap();
    assert_eq!(all.len(), 2);

    let only_june = fx
        .engine
        .list_reservation_orders(Some(JUNE_1 + 15 * H), Some(JUNE_1 + 15 * H))
        .await
        .unwrap();
    assert_eq!(only_june.iter().map(|o| o.id).collect::<Vec<_>>(), vec![june.id]);

    let from_july = fx.engine.list_reservation_orders(Some(JULY_1), None).await.unwrap();
    assert_eq!(from_july.iter().map(|o| o.id).collect::<Vec<_>>(), vec![july.id]);

    let reversed = fx
        .engine
        .list_reservation_orders(Some(JULY_1), Some(JUNE_1))
        .await
        .unwrap_err();
    assert!(matches!(reversed, EngineError::BadRequest(_)));
}

#[tokio::test]
async fn listing_orders_rejects_dates_outside_the_calendar_range() {
    let fx = fixture("list_orders_bounds.wal").await;
    let june = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();

    let widest = fx
        .engine
        .list_reservation_orders(Some(MIN_VALID_TIMESTAMP_MS), Some(MAX_VALID_TIMESTAMP_MS))
        .await
        .unwrap();
    assert_eq!(widest.iter().map(|o| o.id).collect::<Vec<_>>(), vec![june.id]);

    for (from, to) in [
        (None, Some(Ms::MAX)),
        (Some(Ms::MIN), None),
        (Some(MIN_VALID_TIMESTAMP_MS - 1), None),
        (None, Some(MAX_VALID_TIMESTAMP_MS + 1)),
    ] {
        let err = fx.engine.list_reservation_orders(from, to).await.unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)), "{from:?}..{to:?}: got {err:?}");
    }
}

#[tokio::test]
async fn listing_time_blocks_rejects_dates_outside_the_calendar_range() {
    let fx = fixture("list_blocks_bounds.wal").await;
    let last_day = Span::new(MAX_VALID_TIMESTAMP_MS - DAY_MS, MAX_VALID_TIMESTAMP_MS);
    assert!(fx.engine.list_time_blocks(Some(last_day)).await.unwrap().is_empty());
    let first_day = Span::new(MIN_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS + DAY_MS);
    assert!(fx.engine.list_time_blocks(Some(first_day)).await.unwrap().is_empty());

    for range in [
        Span::new(Ms::MAX - 1, Ms::MAX),
        Span { start: Ms::MIN, end: Ms::MAX },
        Span::new(MAX_VALID_TIMESTAMP_MS, MAX_VALID_TIMESTAMP_MS + 1),
    ] {
        let err = fx.engine.list_time_blocks(Some(range)).await.unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)), "{range:?}: got {err:?}");
    }

    let too_wide = Span::new(MIN_VALID_TIMESTAMP_MS, MAX_VALID_TIMESTAMP_MS);
    let err = fx.engine.list_time_blocks(Some(too_wide)).await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

#[tokio::test]
async fn free_windows_reject_dates_outside_the_calendar_range() {
    let fx = fixture("free_windows_bounds.wal").await;
    let last_day = Span::new(MAX_VALID_TIMESTAMP_MS - DAY_MS, MAX_VALID_TIMESTAMP_MS);
    assert_eq!(fx.engine.free_windows(fx.t1, last_day).await.unwrap(), vec![last_day]);

    for window in [
        Span::new(Ms::MAX - 1, Ms::MAX),
        Span { start: Ms::MIN, end: Ms::MAX },
        Span::new(MIN_VALID_TIMESTAMP_MS - 1, MIN_VALID_TIMESTAMP_MS + H),
    ] {
        let err = fx.engine.free_windows(fx.t1, window).await.unwrap_err();
        assert!(matches!(err, EngineError::LimitExceeded(_)), "{window:?}: got {err:?}");
    }
}

// ── Tenancy ──────────────────────────────────────────────

#[tokio::test]
async fn foreign_entities_are_unauthorized() {
    let directory = Arc::new(Directory::new());
    let a = fixture_in("tenancy_a.wal", directory.clone()).await;
    let b = fixture_in("tenancy_b.wal", directory).await;
    let order = a.book(a.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();

    let err = b.engine.get_order(order.id).await.unwrap_err();
    assert!(matches!(err, EngineError::CrossTenant { .. }), "got {err:?}");

    let err = b.book(a.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap_err();
    assert!(matches!(err, EngineError::CrossTenant { .. }), "got {err:?}");

    let mut req = b.request(vec![b.item(b.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H, 2)]);
    req.client_id = a.client;
    let err = b.engine.create_reservation(None, req).await.unwrap_err();
    assert!(matches!(err, EngineError::CrossTenant { .. }));

    // Same hours on B's own table are free.
    b.book(b.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();

    let mut hijack = table("T9");
    hijack.id = Some(a.t1);
    let err = b.engine.upsert_resource(None, hijack).await.unwrap_err();
    assert!(matches!(err, EngineError::CrossTenant { .. }));
}

// ── Durability ───────────────────────────────────────────

async fn reopen(path: PathBuf) -> Engine {
    let (shared, _rx) = shared(Arc::new(Directory::new()));
    Engine::new(Ulid::new(), path, shared).unwrap()
}

#[tokio::test]
async fn wal_replay_restores_orders_and_numbering() {
    let fx = fixture("replay.wal").await;
    let order = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    fx.pre_receipt(fx.t2, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    fx.engine
        .create_time_block(
            None,
            TimeBlockInput {
                title: "Inventario".into(),
                notes: None,
                start_at: JULY_1,
                end_at: JULY_1 + 4 * H,
            },
        )
        .await
        .unwrap();
    let records = fx.engine.list_records(order.id).await.unwrap();

    let Fixture {
        engine, path, client, area, product, t1, ..
    } = fx;
    drop(engine);

    let engine = reopen(path).await;
    assert_eq!(engine.get_order(order.id).await.unwrap(), order);
    assert_eq!(engine.list_records(order.id).await.unwrap(), records);
    assert_eq!(engine.list_time_blocks(None).await.unwrap().len(), 1);
    {
        let store = engine.read().await;
        assert_eq!(store.sequence(Sequence::Reservation), 2);
        assert_eq!(store.sequence(Sequence::PreOperation), 1);
        assert!(store.open_cycle().is_some());
    }

    let item = |start: Ms, end: Ms| ReservationItem {
        product_id: product,
        resource_id: Some(t1),
        start_at: Some(start),
        end_at: Some(end),
        number_adults: 2,
        ..Default::default()
    };
    let req = |items| CreateReservation {
        client_id: client,
        area_sales_id: area,
        items,
        ..Default::default()
    };
    let clash = engine
        .create_reservation(None, req(vec![item(JUNE_1 + 11 * H, JUNE_1 + 13 * H)]))
        .await;
    assert!(is_conflict(&clash, ConflictKind::Reservation));
    let next = engine
        .create_reservation(None, req(vec![item(JUNE_1 + 14 * H, JUNE_1 + 16 * H)]))
        .await
        .unwrap();
    assert_eq!(next.reservation_number, Some(3));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let fx = fixture("compaction.wal").await;
    let kept = fx.book(fx.t1, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    let removed = fx.book(fx.t2, JUNE_1 + 10 * H, JUNE_1 + 12 * H).await.unwrap();
    fx.engine
        .cancel_reservation_line(None, removed.id, only_line(&removed).id)
        .await
        .unwrap();
    let cancelled = fx.book(fx.t2, JUNE_1 + 14 * H, JUNE_1 + 16 * H).await.unwrap();
    fx.engine.cancel_order(None, cancelled.id, None).await.unwrap();

    fx.engine.compact_wal().await.unwrap();
    assert_eq!(fx.engine.wal_appends_since_compact().await, 0);
    let orders: Vec<OrderReceipt> = {
        let store = fx.engine.read().await;
        let mut orders: Vec<_> = store.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        orders
    };
    let records = fx.engine.list_records(kept.id).await.unwrap();

    let Fixture { engine, path, t1, t2, .. } = fx;
    drop(engine);
    let engine = reopen(path).await;
    let store = engine.read().await;
    let mut replayed: Vec<_> = store.orders.values().cloned().collect();
    replayed.sort_by_key(|o| o.id);
    assert_eq!(replayed, orders);
    assert_eq!(store.records[&kept.id], records);
    assert_eq!(store.sequence(Sequence::Reservation), 3);
    assert_eq!(store.resource_slots(Some(t1)).map(|i| i.len()), Some(1));
    assert!(store.resource_slots(Some(t2)).is_none_or(|i| i.is_empty()));
}

// ── Transactions ─────────────────────────────────────────

#[tokio::test]
async fn dropped_transaction_discards_staged_events() {
    let fx = fixture("txn_rollback.wal").await;
    {
        let mut txn = fx.engine.begin(Some("admin")).await.unwrap();
        txn.stage(Event::TimeBlockSaved {
            block: TimeBlock {
                id: Ulid::new(),
                title: "Nunca".into(),
                notes: None,
                span: Span::new(JULY_1, JULY_1 + H),
            },
        });
        let draft = fx.book_draft_probe(&txn);
        txn.put_draft(draft);
        assert_eq!(fx.engine.drafts().len(), 1);
    }
    assert!(fx.engine.drafts().is_empty());
    assert!(fx.engine.list_time_blocks(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn commit_with_nothing_staged_is_a_no_op() {
    let fx = fixture("txn_empty.wal").await;
    let before = fx.engine.wal_appends_since_compact().await;
    let txn = fx.engine.begin(None).await.unwrap();
    fx.engine.commit(txn).await.unwrap();
    assert_eq!(fx.engine.wal_appends_since_compact().await, before);
}

#[tokio::test]
async fn sequences_count_values_staged_in_the_same_transaction() {
    let fx = fixture("txn_sequences.wal").await;
    let mut txn = fx.engine.begin(None).await.unwrap();
    assert_eq!(txn.next_sequence(Sequence::Reservation), 1);
    assert_eq!(txn.next_sequence(Sequence::Reservation), 2);
    assert_eq!(txn.next_operation_number(), 1);
    fx.engine.commit(txn).await.unwrap();
    assert_eq!(fx.engine.read().await.sequence(Sequence::Reservation), 2);
}

impl Fixture {
    /// An empty admin order shaped like the one `create_reservation` drafts.
    fn book_draft_probe(&self, txn: &Txn<'_>) -> OrderReceipt {
        OrderReceipt {
            id: Ulid::new(),
            client_id: Some(self.client),
            area_sales_id: Some(self.area),
            economic_cycle_id: txn.store().open_cycle().map(|c| c.id),
            origin: OrderOrigin::Admin,
            status: OrderStatus::PaymentPending,
            is_reservation: true,
            is_pre_receipt: false,
            operation_number: None,
            pre_operation_number: None,
            reservation_number: None,
            discount: Decimal::ZERO,
            commission: Decimal::ZERO,
            shipping: None,
            house_costed: false,
            observations: None,
            payment_deadline_at: None,
            created_at: txn.now,
            updated_at: txn.now,
            closed_at: None,
            lines: Vec::new(),
            totals: OrderTotals::default(),
        }
    }
}
