//! `POST /callbacks/{callback_token}` and `POST /approvals/{id}/rollback`
//! (spec §6). The callback route is the plain-HTTP counterpart to
//! `hiloop_webhook::inbound`'s Slack-specific route — both end up calling
//! `ApprovalService::respond_to_approval`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use hiloop_core::{Approval, ApprovalDecision, HiloopError, JsonMap};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub decision: String,
    #[serde(default)]
    pub response_data: JsonMap,
}

/// A tampered or unknown callback token is a `403`, not a `400` validation
/// error (spec §6/§7) — it authenticates the caller, it doesn't validate
/// their input.
pub async fn respond_to_callback(
    State(state): State<ApiState>,
    Path(callback_token): Path<String>,
    Json(body): Json<RespondRequest>,
) -> Response {
    let Some(approval_id) = state.approvals.verify_callback_token(&callback_token) else {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "INVALID_TOKEN", "message": "invalid or tampered callback token"})))
            .into_response();
    };

    let decision = match parse_decision(&body.decision) {
        Ok(d) => d,
        Err(e) => return e.into_response(),
    };

    match state.approvals.respond_to_approval(approval_id, decision, body.response_data).await {
        Ok(approval) => Json(approval).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

pub async fn rollback_approval(
    State(state): State<ApiState>,
    Path(approval_id): Path<uuid::Uuid>,
) -> ApiResult<Json<Approval>> {
    Ok(Json(state.approvals.rollback_approval(approval_id).await?))
}

fn parse_decision(s: &str) -> ApiResult<ApprovalDecision> {
    match s {
        "approve" => Ok(ApprovalDecision::Approve),
        "reject" => Ok(ApprovalDecision::Reject),
        other => Err(ApiError(HiloopError::validation(format!("unknown decision '{other}'")))),
    }
}
