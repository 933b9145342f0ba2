//! `/order` routes.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use rust_decimal::Decimal;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::{AddonRequest, OnlineOrderItem, PlaceOnlineOrder};
use crate::model::{OrderReceipt, OrderStatus};

use super::context::BusinessContext;
use super::error::ApiResult;
use super::reservations::AddonBody;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineItemBody {
    pub product_id: Ulid,
    pub quantity: u32,
    #[serde(default)]
    pub addons: Vec<AddonBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineOrderBody {
    pub client_id: Ulid,
    #[serde(default)]
    pub items: Vec<OnlineItemBody>,
    pub shipping: Option<Decimal>,
    pub observations: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct RemoveLineQuery {
    pub quantity: Option<u32>,
}

/// POST /order/online
pub async fn place_online(
    ctx: BusinessContext,
    body: Result<Json<OnlineOrderBody>, JsonRejection>,
) -> ApiResult<Json<OrderReceipt>> {
    let Json(body) = body?;
    let req = PlaceOnlineOrder {
        client_id: body.client_id,
        items: body
            .items
            .into_iter()
            .map(|item| OnlineOrderItem {
                product_id: item.product_id,
                quantity: item.quantity,
                addons: item.addons.into_iter().map(AddonRequest::from).collect(),
            })
            .collect(),
        shipping: body.shipping,
        observations: body.observations,
    };
    Ok(Json(ctx.engine.place_online_order(ctx.actor(), req).await?))
}

/// GET /order/{id}
pub async fn get(ctx: BusinessContext, id: Result<Path<Ulid>, PathRejection>) -> ApiResult<Json<OrderReceipt>> {
    let Path(id) = id?;
    Ok(Json(ctx.engine.get_order(id).await?))
}

/// POST /order/{id}/cancel
pub async fn cancel(
    ctx: BusinessContext,
    id: Result<Path<Ulid>, PathRejection>,
    body: Option<Json<CancelBody>>,
) -> ApiResult<Json<OrderReceipt>> {
    let Path(id) = id?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(
        ctx.engine
            .cancel_order(ctx.actor(), id, body.reason.as_deref())
            .await?,
    ))
}

/// PATCH /order/{id}/status
pub async fn transition(
    ctx: BusinessContext,
    id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> ApiResult<Json<OrderReceipt>> {
    let Path(id) = id?;
    let Json(body) = body?;
    Ok(Json(
        ctx.engine
            .transition_order_status(ctx.actor(), id, body.status)
            .await?,
    ))
}

/// DELETE /order/{id}/line/{lineId}?quantity
pub async fn remove_line(
    ctx: BusinessContext,
    ids: Result<Path<(Ulid, Ulid)>, PathRejection>,
    query: Result<Query<RemoveLineQuery>, QueryRejection>,
) -> ApiResult<Json<OrderReceipt>> {
    let Path((order_id, line_id)) = ids?;
    let Query(query) = query?;
    Ok(Json(
        ctx.engine
            .remove_order_line(ctx.actor(), order_id, line_id, query.quantity)
            .await?,
    ))
}
