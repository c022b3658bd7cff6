//! Maps [`HiloopError`] onto the HTTP status/body contract from spec §7.
//!
//! Every route handler returns `ApiResult<T>`; this is the single place that
//! translates the core error taxonomy into a response, so no handler needs
//! its own `match` on error kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use hiloop_core::HiloopError;
use serde_json::json;

pub struct ApiError(pub HiloopError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<HiloopError> for ApiError {
    fn from(err: HiloopError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({"error": self.0.error_code(), "message": self.0.to_string()}))).into_response()
    }
}
