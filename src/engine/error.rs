use thiserror::Error;
use ulid::Ulid;

pub const BLOCK_CONFLICT_MESSAGE: &str = "Ya existe un bloqueo en ese horario";
pub const RESERVATION_CONFLICT_MESSAGE: &str = "Ya existe una reserva en este rango";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    TimeBlock,
    Reservation,
}

impl ConflictKind {
    pub fn message(self) -> &'static str {
        match self {
            ConflictKind::TimeBlock => BLOCK_CONFLICT_MESSAGE,
            ConflictKind::Reservation => RESERVATION_CONFLICT_MESSAGE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConflictKind::TimeBlock => "time_block",
            ConflictKind::Reservation => "reservation",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Missing entity in this business. The message names it for the user.
    #[error("{message}")]
    NotFound { id: Option<Ulid>, message: String },
    /// The entity exists but belongs to another business.
    #[error("{entity} {id} belongs to another business")]
    CrossTenant { id: Ulid, entity: &'static str },
    /// Malformed or incomplete input.
    #[error("{0}")]
    BadRequest(String),
    /// Well-formed input that a business rule forbids.
    #[error("{0}")]
    NotAllowed(String),
    #[error("{}", .0.message())]
    Conflict(ConflictKind),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("draft {txn_id} not found or expired")]
    DraftNotFound { txn_id: Ulid },
    #[error("business is busy, try again")]
    Busy,
    #[error("WAL error: {0}")]
    Wal(String),
}

impl EngineError {
    pub fn not_found(id: Ulid, message: impl Into<String>) -> Self {
        EngineError::NotFound {
            id: Some(id),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        EngineError::BadRequest(message.into())
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        EngineError::NotAllowed(message.into())
    }

    /// Failures worth retrying with a fresh transaction.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Busy | EngineError::Wal(_))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::CrossTenant { .. } => "cross_tenant",
            EngineError::BadRequest(_) => "bad_request",
            EngineError::NotAllowed(_) => "not_allowed",
            EngineError::Conflict(_) => "conflict",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::DraftNotFound { .. } => "draft_not_found",
            EngineError::Busy => "busy",
            EngineError::Wal(_) => "wal",
        }
    }
}
