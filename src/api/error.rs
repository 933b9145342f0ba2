use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;

pub const INTERNAL_MESSAGE: &str = "Lo sentimos, ha ocurrido un error inesperado. Inténtelo de nuevo más tarde";
pub const UNAUTHORIZED_MESSAGE: &str = "No tiene acceso a este recurso";

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

/// Everything a handler can fail with. Renders as `{ "message": … }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::CrossTenant { .. } => StatusCode::UNAUTHORIZED,
                EngineError::BadRequest(_) | EngineError::Conflict(_) | EngineError::LimitExceeded(_) => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::NotAllowed(_) => StatusCode::NOT_ACCEPTABLE,
                EngineError::DraftNotFound { .. } | EngineError::Busy | EngineError::Wal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Engine(EngineError::CrossTenant { .. }) => UNAUTHORIZED_MESSAGE.to_string(),
            ApiError::Engine(EngineError::LimitExceeded(what)) => format!("Límite excedido: {what}"),
            _ if self.status().is_server_error() => INTERNAL_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else if let ApiError::Engine(EngineError::CrossTenant { id, entity }) = &self {
            tracing::warn!(%id, entity, "cross-business access rejected");
        }
        (status, MessageBody::new(self.public_message())).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Cuerpo de la petición inválido: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(format!("Parámetros inválidos: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(format!("Identificador inválido: {}", rejection.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConflictKind;
    use ulid::Ulid;

    #[test]
    fn status_mapping() {
        let cases = [
            (EngineError::not_found(Ulid::new(), "x"), StatusCode::NOT_FOUND),
            (
                EngineError::CrossTenant {
                    id: Ulid::new(),
                    entity: "order",
                },
                StatusCode::UNAUTHORIZED,
            ),
            (EngineError::bad_request("x"), StatusCode::BAD_REQUEST),
            (EngineError::not_allowed("x"), StatusCode::NOT_ACCEPTABLE),
            (EngineError::Conflict(ConflictKind::TimeBlock), StatusCode::BAD_REQUEST),
            (EngineError::Busy, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_details_are_hidden() {
        let err = ApiError::from(EngineError::Wal("disk full".into()));
        assert_eq!(err.public_message(), INTERNAL_MESSAGE);
        let err = ApiError::from(EngineError::Conflict(ConflictKind::Reservation));
        assert_eq!(err.public_message(), "Ya existe una reserva en este rango");
    }
}
