//! `/reservation` routes.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{
    AddonRequest, AvailabilityQuery, ConfirmReservation, CreateReservation, ReservationItem, SlotChange,
    UpdateReservation,
};
use crate::model::{OrderReceipt, ReservationRecord, Span};

use super::context::BusinessContext;
use super::error::{ApiError, ApiResult, MessageBody};

pub const AVAILABLE_MESSAGE: &str = "Rango disponible";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonBody {
    pub product_id: Ulid,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 {
    1
}

impl From<AddonBody> for AddonRequest {
    fn from(body: AddonBody) -> Self {
        Self {
            product_id: body.product_id,
            quantity: body.quantity,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationProductBody {
    pub product_id: Ulid,
    pub resource_id: Option<Ulid>,
    pub start_date_at: Option<String>,
    pub end_date_at: Option<String>,
    #[serde(default)]
    pub number_adults: u32,
    #[serde(default)]
    pub number_kids: u32,
    pub quantity: Option<u32>,
    #[serde(default)]
    pub addons: Vec<AddonBody>,
    pub observations: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationBody {
    pub client_id: Ulid,
    pub area_sales_id: Ulid,
    #[serde(default)]
    pub reservation_products: Vec<ReservationProductBody>,
    pub discount: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub observations: Option<String>,
    #[serde(default)]
    pub house_costed: bool,
    #[serde(default)]
    pub is_pre_receipt: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotChangeBody {
    pub id: Ulid,
    pub resource_id: Option<Ulid>,
    pub start_date_at: Option<String>,
    pub end_date_at: Option<String>,
    pub number_adults: Option<u32>,
    pub number_kids: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReservationBody {
    pub reservation_products: Option<SlotChangeBody>,
    pub client_id: Option<Ulid>,
    pub observations: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveLineBody {
    pub id_reservation: Ulid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    pub payment_deadline_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityParams {
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub product_id: Option<Ulid>,
    pub resource_id: Option<Ulid>,
    /// Line being edited.
    pub update: Option<Ulid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSlotsParams {
    pub resource_id: Ulid,
    pub start_at: String,
    pub end_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSlot {
    #[serde(with = "crate::clock::serde_ms")]
    pub start_at: i64,
    #[serde(with = "crate::clock::serde_ms")]
    pub end_at: i64,
}

impl BusinessContext {
    fn reservation_item(&self, body: ReservationProductBody) -> ApiResult<ReservationItem> {
        Ok(ReservationItem {
            product_id: body.product_id,
            resource_id: body.resource_id,
            start_at: self.instant("startDateAt", body.start_date_at.as_deref())?,
            end_at: self.instant("endDateAt", body.end_date_at.as_deref())?,
            number_adults: body.number_adults,
            number_kids: body.number_kids,
            quantity: body.quantity,
            addons: body.addons.into_iter().map(AddonRequest::from).collect(),
            observations: body.observations,
        })
    }
}

/// POST /reservation
pub async fn create(
    ctx: BusinessContext,
    body: Result<Json<CreateReservationBody>, JsonRejection>,
) -> ApiResult<Json<OrderReceipt>> {
    let Json(body) = body?;
    let items = body
        .reservation_products
        .into_iter()
        .map(|item| ctx.reservation_item(item))
        .collect::<ApiResult<Vec<_>>>()?;
    let req = CreateReservation {
        client_id: body.client_id,
        area_sales_id: body.area_sales_id,
        items,
        discount: body.discount.unwrap_or_default(),
        commission: body.commission.unwrap_or_default(),
        observations: body.observations,
        house_costed: body.house_costed,
        is_pre_receipt: body.is_pre_receipt,
    };
    let order = ctx.engine.create_reservation(ctx.actor(), req).await?;
    Ok(Json(order))
}

/// GET /reservation?dateFrom&dateTo
pub async fn list(
    ctx: BusinessContext,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<OrderReceipt>>> {
    let Query(query) = query?;
    let from = ctx.instant("dateFrom", query.date_from.as_deref())?;
    let to = ctx.instant("dateTo", query.date_to.as_deref())?;
    Ok(Json(ctx.engine.list_reservation_orders(from, to).await?))
}

/// GET /reservation/{id}
pub async fn get(ctx: BusinessContext, id: Result<Path<Ulid>, PathRejection>) -> ApiResult<Json<OrderReceipt>> {
    let Path(id) = id?;
    Ok(Json(ctx.engine.get_order(id).await?))
}

/// GET /reservation/{id}/records
pub async fn records(
    ctx: BusinessContext,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<Vec<ReservationRecord>>> {
    let Path(id) = id?;
    Ok(Json(ctx.engine.list_records(id).await?))
}

/// PATCH /reservation/{id}
pub async fn update(
    ctx: BusinessContext,
    id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<UpdateReservationBody>, JsonRejection>,
) -> ApiResult<Json<OrderReceipt>> {
    let Path(id) = id?;
    let Json(body) = body?;
    let line = match body.reservation_products {
        Some(change) => Some(SlotChange {
            line_id: change.id,
            resource_id: change.resource_id,
            start_at: ctx.instant("startDateAt", change.start_date_at.as_deref())?,
            end_at: ctx.instant("endDateAt", change.end_date_at.as_deref())?,
            number_adults: change.number_adults,
            number_kids: change.number_kids,
        }),
        None => None,
    };
    let req = UpdateReservation {
        line,
        client_id: body.client_id,
        observations: body.observations,
    };
    Ok(Json(ctx.engine.update_reservation(ctx.actor(), id, req).await?))
}

/// DELETE /reservation/{id}: removes one reservation line.
pub async fn remove_line(
    ctx: BusinessContext,
    id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<RemoveLineBody>, JsonRejection>,
) -> ApiResult<Json<OrderReceipt>> {
    let Path(id) = id?;
    let Json(body) = body?;
    Ok(Json(
        ctx.engine
            .cancel_reservation_line(ctx.actor(), id, body.id_reservation)
            .await?,
    ))
}

/// POST /reservation/{id}/confirm
pub async fn confirm(
    ctx: BusinessContext,
    id: Result<Path<Ulid>, PathRejection>,
    body: Option<Json<ConfirmBody>>,
) -> ApiResult<Json<OrderReceipt>> {
    let Path(id) = id?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let req = ConfirmReservation {
        payment_deadline_at: ctx.instant("paymentDeadlineAt", body.payment_deadline_at.as_deref())?,
    };
    Ok(Json(ctx.engine.confirm_reservation(ctx.actor(), id, req).await?))
}

/// GET /reservation/check/availability
pub async fn check_availability(
    ctx: BusinessContext,
    params: Result<Query<AvailabilityParams>, QueryRejection>,
) -> ApiResult<Json<MessageBody>> {
    let Query(params) = params?;
    let query = AvailabilityQuery {
        start_at: ctx.instant("startAt", params.start_at.as_deref())?,
        end_at: ctx.instant("endAt", params.end_at.as_deref())?,
        product_id: params.product_id,
        resource_id: params.resource_id,
        ignore_line: params.update,
    };
    ctx.engine.check_availability(query).await?;
    Ok(MessageBody::new(AVAILABLE_MESSAGE))
}

/// GET /reservation/check/free-slots
pub async fn free_slots(
    ctx: BusinessContext,
    params: Result<Query<FreeSlotsParams>, QueryRejection>,
) -> ApiResult<Json<Vec<FreeSlot>>> {
    let Query(params) = params?;
    let start = ctx.required_instant("startAt", Some(&params.start_at))?;
    let end = ctx.required_instant("endAt", Some(&params.end_at))?;
    if start >= end {
        return Err(ApiError::BadRequest(
            "La fecha de inicio debe ser anterior a la fecha de fin".into(),
        ));
    }
    let windows = ctx
        .engine
        .free_windows(params.resource_id, Span::new(start, end))
        .await?;
    Ok(Json(
        windows
            .into_iter()
            .map(|w| FreeSlot {
                start_at: w.start,
                end_at: w.end,
            })
            .collect(),
    ))
}
