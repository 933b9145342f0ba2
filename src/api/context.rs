use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use ulid::Ulid;

use crate::clock::parse_instant;
use crate::engine::Engine;
use crate::model::Ms;

use super::AppState;
use super::error::{ApiError, ApiResult};

pub const BUSINESS_HEADER: &str = "x-business-id";
pub const USER_HEADER: &str = "x-user-id";

/// The business a request acts on, and who is acting.
pub struct BusinessContext {
    pub engine: Arc<Engine>,
    pub actor: Option<String>,
    /// Offset used to read wall-clock dates in request bodies.
    pub utc_offset_minutes: i32,
}

impl BusinessContext {
    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// Parse an optional date field in the business offset.
    pub fn instant(&self, field: &str, value: Option<&str>) -> ApiResult<Option<Ms>> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(raw) => parse_instant(raw, self.utc_offset_minutes)
                .map(Some)
                .ok_or_else(|| ApiError::BadRequest(format!("Fecha inválida en {field}: {raw}"))),
        }
    }

    pub fn required_instant(&self, field: &str, value: Option<&str>) -> ApiResult<Ms> {
        self.instant(field, value)?
            .ok_or_else(|| ApiError::BadRequest(format!("El campo {field} es obligatorio")))
    }
}

pub fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<AppState> for BusinessContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let business_id = header_str(parts, BUSINESS_HEADER)
            .and_then(|v| Ulid::from_string(v).ok())
            .ok_or_else(|| ApiError::Unauthorized("Negocio no identificado".into()))?;
        let actor = header_str(parts, USER_HEADER).map(str::to_string);

        let engine = state
            .tenants
            .get_or_create(business_id)
            .map_err(|e| ApiError::Internal(format!("opening business {business_id}: {e}")))?;
        let utc_offset_minutes = engine.read().await.config.utc_offset_minutes;

        Ok(Self {
            engine,
            actor,
            utc_offset_minutes,
        })
    }
}
