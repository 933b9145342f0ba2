//! HTTP surface. The business comes from `x-business-id`, the acting user
//! from `x-user-id`; bodies and responses are camelCase JSON.

pub mod catalog;
pub mod context;
pub mod error;
pub mod orders;
pub mod reservations;
pub mod time_blocks;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::tenant::TenantManager;

pub use context::{BUSINESS_HEADER, BusinessContext, USER_HEADER};
pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantManager>,
}

pub fn router(state: AppState) -> Router {
    let reservations = Router::new()
        .route("/reservation", post(reservations::create).get(reservations::list))
        .route("/reservation/check/availability", get(reservations::check_availability))
        .route("/reservation/check/free-slots", get(reservations::free_slots))
        .route(
            "/reservation/event/block-time",
            get(time_blocks::list).post(time_blocks::create),
        )
        .route(
            "/reservation/event/block-time/{id}",
            patch(time_blocks::update).delete(time_blocks::delete),
        )
        .route(
            "/reservation/{id}",
            get(reservations::get)
                .patch(reservations::update)
                .delete(reservations::remove_line),
        )
        .route("/reservation/{id}/records", get(reservations::records))
        .route("/reservation/{id}/confirm", post(reservations::confirm));

    let orders = Router::new()
        .route("/order/online", post(orders::place_online))
        .route("/order/{id}", get(orders::get))
        .route("/order/{id}/cancel", post(orders::cancel))
        .route("/order/{id}/status", patch(orders::transition))
        .route("/order/{id}/line/{line_id}", axum::routing::delete(orders::remove_line));

    let admin = Router::new()
        .route("/admin/config", put(catalog::configure))
        .route("/admin/cycle/open", post(catalog::open_cycle))
        .route("/admin/cycle/close", post(catalog::close_cycle))
        .route("/admin/resource", put(catalog::upsert_resource))
        .route("/admin/resource/{id}", axum::routing::delete(catalog::delete_resource))
        .route("/admin/product", put(catalog::upsert_product))
        .route("/admin/client", put(catalog::upsert_client))
        .route("/admin/area", put(catalog::upsert_area))
        .route("/admin/policy", put(catalog::upsert_policy));

    Router::new()
        .route("/health", get(health))
        .merge(reservations)
        .merge(orders)
        .merge(admin)
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            let header = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-")
                    .to_string()
            };
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                business = %header(BUSINESS_HEADER),
                actor = %header(USER_HEADER),
            )
        }))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "reservd",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".into());
    let started = Instant::now();
    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(crate::observability::HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(crate::observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}
