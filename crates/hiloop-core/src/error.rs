//! Unified error taxonomy shared by every crate in the workspace.
//!
//! Each crate still owns its own `thiserror` enum for the errors that are
//! local to it; [`HiloopError`] is the cross-cutting enum those local errors
//! convert into at the boundary a caller actually needs to act on (HTTP
//! responses, retry decisions). It mirrors the seven error kinds the
//! orchestrator contract names: the kind controls retryability and the HTTP
//! status, never the message text.

use uuid::Uuid;

pub type Result<T> = std::result::Result<T, HiloopError>;

#[derive(Debug, thiserror::Error)]
pub enum HiloopError {
    #[error("invalid state transition: {reason}")]
    InvalidStateTransition { reason: String },

    #[error("concurrent modification of {resource} {id}")]
    ConcurrentModification { resource: &'static str, id: Uuid },

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: Uuid },

    #[error("validation error: {reason}")]
    ValidationError { reason: String },

    #[error("approval {id} expired at {expires_at}")]
    Expired { id: Uuid, expires_at: i64 },

    #[error("approval {id} already {status}")]
    AlreadyProcessed { id: Uuid, status: String },

    #[error("upstream unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("task handler {handler} failed: {reason}")]
    HandlerError { handler: String, reason: String },

    #[error("event handler failed for {event_type}: {reason}")]
    EventHandlerError { event_type: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HiloopError {
    pub fn invalid_transition(reason: impl Into<String>) -> Self {
        Self::InvalidStateTransition { reason: reason.into() }
    }

    pub fn not_found(resource: &'static str, id: Uuid) -> Self {
        Self::NotFound { resource, id }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationError { reason: reason.into() }
    }

    /// Semantic classification, independent of the HTTP mapping. `hiloop-api`
    /// uses [`Self::status_code`] directly; callers that need to decide
    /// whether to retry (the bus, the timeout manager) match on this instead.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ValidationError { .. } => ErrorKind::ValidationError,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::AlreadyProcessed { .. } => ErrorKind::AlreadyProcessed,
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::HandlerError { .. } => ErrorKind::HandlerError,
            Self::EventHandlerError { .. } => ErrorKind::EventHandlerError,
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidStateTransition => 400,
            ErrorKind::ConcurrentModification => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::ValidationError => 400,
            ErrorKind::Expired => 400,
            ErrorKind::AlreadyProcessed => 400,
            ErrorKind::UpstreamUnavailable => 502,
            ErrorKind::HandlerError => 400,
            ErrorKind::EventHandlerError => 500,
            ErrorKind::Internal => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorKind::ConcurrentModification => "CONCURRENT_MODIFICATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::Expired => "EXPIRED",
            ErrorKind::AlreadyProcessed => "ALREADY_PROCESSED",
            ErrorKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorKind::HandlerError => "HANDLER_ERROR",
            ErrorKind::EventHandlerError => "EVENT_HANDLER_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// Never retried by the bus or the step executor's caller.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidStateTransition
                | ErrorKind::ValidationError
                | ErrorKind::NotFound
                | ErrorKind::Expired
                | ErrorKind::AlreadyProcessed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidStateTransition,
    ConcurrentModification,
    NotFound,
    ValidationError,
    Expired,
    AlreadyProcessed,
    UpstreamUnavailable,
    HandlerError,
    EventHandlerError,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_modification_is_not_terminal() {
        let err = HiloopError::ConcurrentModification { resource: "workflow", id: Uuid::nil() };
        assert!(!err.is_terminal());
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn validation_error_is_terminal_and_400() {
        let err = HiloopError::validation("missing field");
        assert!(err.is_terminal());
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
