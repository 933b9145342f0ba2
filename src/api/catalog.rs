//! `/admin` routes: the catalog scheduling reads from.

use axum::Json;
use axum::extract::Path;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::{ClientInput, PolicyInput, ProductInput, ResourceInput, SalesAreaInput};
use crate::model::*;

use super::context::BusinessContext;
use super::error::ApiResult;

/// Partial business settings; absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigBody {
    pub name: Option<String>,
    pub precision: Option<u32>,
    pub default_currency: Option<String>,
    pub consecutive_operation_number_per_year: Option<bool>,
    /// `0` clears the threshold.
    pub online_shop_cancel_order_after_hours: Option<u32>,
    pub notify_reservations: Option<bool>,
    pub utc_offset_minutes: Option<i32>,
}

impl ConfigBody {
    fn apply(self, mut config: BusinessConfig) -> BusinessConfig {
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(precision) = self.precision {
            config.precision = precision;
        }
        if let Some(currency) = self.default_currency {
            config.default_currency = currency;
        }
        if let Some(flag) = self.consecutive_operation_number_per_year {
            config.consecutive_operation_number_per_year = flag;
        }
        if let Some(hours) = self.online_shop_cancel_order_after_hours {
            config.online_shop_cancel_order_after_hours = (hours > 0).then_some(hours);
        }
        if let Some(flag) = self.notify_reservations {
            config.notify_reservations = flag;
        }
        if let Some(offset) = self.utc_offset_minutes {
            config.utc_offset_minutes = offset;
        }
        config
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductBody {
    pub id: Option<Ulid>,
    pub name: String,
    pub kind: ProductKind,
    pub price: Decimal,
    pub currency: Option<String>,
    pub stock: Option<u32>,
    #[serde(default)]
    pub available_for_reservation: bool,
    #[serde(default)]
    pub always_available_for_reservation: bool,
    pub reservation_available_from: Option<String>,
    pub reservation_available_to: Option<String>,
    #[serde(default)]
    pub resource_ids: Vec<Ulid>,
    #[serde(default)]
    pub policy_ids: Vec<Ulid>,
}

/// PUT /admin/config
pub async fn configure(
    ctx: BusinessContext,
    body: Result<Json<ConfigBody>, JsonRejection>,
) -> ApiResult<Json<BusinessConfig>> {
    let Json(body) = body?;
    let config = body.apply(ctx.engine.business_config().await);
    Ok(Json(ctx.engine.configure_business(ctx.actor(), config).await?))
}

/// POST /admin/cycle/open
pub async fn open_cycle(ctx: BusinessContext) -> ApiResult<Json<EconomicCycle>> {
    Ok(Json(ctx.engine.open_economic_cycle(ctx.actor()).await?))
}

/// POST /admin/cycle/close
pub async fn close_cycle(ctx: BusinessContext) -> ApiResult<Json<EconomicCycle>> {
    Ok(Json(ctx.engine.close_economic_cycle(ctx.actor()).await?))
}

/// PUT /admin/resource
pub async fn upsert_resource(
    ctx: BusinessContext,
    body: Result<Json<ResourceInput>, JsonRejection>,
) -> ApiResult<Json<Resource>> {
    let Json(input) = body?;
    Ok(Json(ctx.engine.upsert_resource(ctx.actor(), input).await?))
}

/// DELETE /admin/resource/{id}
pub async fn delete_resource(ctx: BusinessContext, id: Result<Path<Ulid>, PathRejection>) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    ctx.engine.delete_resource(ctx.actor(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /admin/product
pub async fn upsert_product(
    ctx: BusinessContext,
    body: Result<Json<ProductBody>, JsonRejection>,
) -> ApiResult<Json<Product>> {
    let Json(body) = body?;
    let input = ProductInput {
        id: body.id,
        name: body.name,
        kind: body.kind,
        price: body.price,
        currency: body.currency,
        stock: body.stock,
        available_for_reservation: body.available_for_reservation,
        always_available_for_reservation: body.always_available_for_reservation,
        reservation_available_from: ctx.instant("reservationAvailableFrom", body.reservation_available_from.as_deref())?,
        reservation_available_to: ctx.instant("reservationAvailableTo", body.reservation_available_to.as_deref())?,
        resource_ids: body.resource_ids,
        policy_ids: body.policy_ids,
    };
    Ok(Json(ctx.engine.upsert_product(ctx.actor(), input).await?))
}

/// PUT /admin/client
pub async fn upsert_client(
    ctx: BusinessContext,
    body: Result<Json<ClientInput>, JsonRejection>,
) -> ApiResult<Json<Client>> {
    let Json(input) = body?;
    Ok(Json(ctx.engine.upsert_client(ctx.actor(), input).await?))
}

/// PUT /admin/area
pub async fn upsert_area(
    ctx: BusinessContext,
    body: Result<Json<SalesAreaInput>, JsonRejection>,
) -> ApiResult<Json<SalesArea>> {
    let Json(input) = body?;
    Ok(Json(ctx.engine.upsert_sales_area(ctx.actor(), input).await?))
}

/// PUT /admin/policy
pub async fn upsert_policy(
    ctx: BusinessContext,
    body: Result<Json<PolicyInput>, JsonRejection>,
) -> ApiResult<Json<ReservationPolicy>> {
    let Json(input) = body?;
    Ok(Json(ctx.engine.upsert_policy(ctx.actor(), input).await?))
}
