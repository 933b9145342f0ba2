//! `/reservation/event/block-time` routes.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::{TimeBlockInput, TimeBlockPatch};
use crate::model::{Span, TimeBlock};

use super::context::BusinessContext;
use super::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockBody {
    pub title: String,
    pub notes: Option<String>,
    pub start_date_at: Option<String>,
    pub end_date_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatchBody {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub start_date_at: Option<String>,
    pub end_date_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockQuery {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

/// GET /reservation/event/block-time?dateFrom&dateTo
pub async fn list(
    ctx: BusinessContext,
    query: Result<Query<BlockQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<TimeBlock>>> {
    let Query(query) = query?;
    let from = ctx.instant("dateFrom", query.date_from.as_deref())?;
    let to = ctx.instant("dateTo", query.date_to.as_deref())?;
    let range = match (from, to) {
        (None, None) => None,
        (Some(from), Some(to)) if from <= to => Some(Span::new(from, to)),
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "La fecha de inicio debe ser anterior a la fecha de fin".into(),
            ));
        }
        _ => {
            return Err(ApiError::BadRequest(
                "Debe indicar ambas fechas del rango".into(),
            ));
        }
    };
    Ok(Json(ctx.engine.list_time_blocks(range).await?))
}

/// POST /reservation/event/block-time
pub async fn create(
    ctx: BusinessContext,
    body: Result<Json<BlockBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TimeBlock>)> {
    let Json(body) = body?;
    let input = TimeBlockInput {
        title: body.title,
        notes: body.notes,
        start_at: ctx.required_instant("startDateAt", body.start_date_at.as_deref())?,
        end_at: ctx.required_instant("endDateAt", body.end_date_at.as_deref())?,
    };
    let block = ctx.engine.create_time_block(ctx.actor(), input).await?;
    Ok((StatusCode::CREATED, Json(block)))
}

/// PATCH /reservation/event/block-time/{id}
pub async fn update(
    ctx: BusinessContext,
    id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<BlockPatchBody>, JsonRejection>,
) -> ApiResult<Json<TimeBlock>> {
    let Path(id) = id?;
    let Json(body) = body?;
    let patch = TimeBlockPatch {
        title: body.title,
        notes: body.notes,
        start_at: ctx.instant("startDateAt", body.start_date_at.as_deref())?,
        end_at: ctx.instant("endDateAt", body.end_date_at.as_deref())?,
    };
    Ok(Json(ctx.engine.update_time_block(ctx.actor(), id, patch).await?))
}

/// DELETE /reservation/event/block-time/{id}
pub async fn delete(ctx: BusinessContext, id: Result<Path<Ulid>, PathRejection>) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    ctx.engine.delete_time_block(ctx.actor(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
