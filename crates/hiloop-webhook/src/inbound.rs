//! Inbound chat-platform interactive callback (spec §4.8/§6,
//! `POST /slack/interactive`). Grounded on `app/api/v1/routes/slack.py`'s
//! handling of Slack's `block_actions`/`view_submission` payload shapes.
//!
//! Signature verification runs over the raw request body *before* anything
//! is parsed — fail-closed, matching `hiloop_security::SignatureVerifier`'s
//! own contract.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use chrono::Utc;
use hiloop_core::{ApprovalDecision, HiloopError, JsonMap};
use hiloop_engine::ApprovalService;
use hiloop_security::SignatureVerifier;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;

use crate::adapter::SlackAdapter;

#[derive(Clone)]
pub struct InboundState {
    pub approvals: ApprovalService,
    pub chat_adapter: Arc<SlackAdapter>,
    pub signature_verifier: SignatureVerifier,
}

pub fn interactive_router(state: InboundState) -> Router {
    Router::new().route("/slack/interactive", post(handle_interactive)).with_state(Arc::new(state))
}

#[derive(Deserialize)]
struct SlackForm {
    payload: String,
}

async fn handle_interactive(State(state): State<Arc<InboundState>>, headers: HeaderMap, body: Bytes) -> Response {
    let timestamp = headers.get("x-slack-request-timestamp").and_then(|v| v.to_str().ok()).unwrap_or("");
    let signature = headers.get("x-slack-signature").and_then(|v| v.to_str().ok()).unwrap_or("");

    if !state.signature_verifier.verify(timestamp, &body, signature, Utc::now().timestamp()) {
        warn!("slack_interactive_signature_rejected");
        return (StatusCode::FORBIDDEN, "invalid signature").into_response();
    }

    let form: SlackForm = match serde_urlencoded::from_bytes(&body) {
        Ok(form) => form,
        Err(e) => {
            warn!(error = %e, "slack_interactive_malformed_form");
            return (StatusCode::BAD_REQUEST, "malformed payload").into_response();
        }
    };

    let payload: Value = match serde_json::from_str(&form.payload) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "slack_interactive_malformed_json");
            return (StatusCode::BAD_REQUEST, "malformed payload json").into_response();
        }
    };

    match payload.get("type").and_then(Value::as_str) {
        Some("block_actions") => handle_block_action(&state, &payload).await,
        Some("view_submission") => handle_view_submission(&state, &payload).await,
        other => {
            warn!(?other, "slack_interactive_unknown_payload_type");
            (StatusCode::BAD_REQUEST, "unknown payload type").into_response()
        }
    }
}

async fn handle_block_action(state: &InboundState, payload: &Value) -> Response {
    let Some(action) = payload.get("actions").and_then(Value::as_array).and_then(|a| a.first()) else {
        return (StatusCode::BAD_REQUEST, "missing action").into_response();
    };
    let Some(action_id) = action.get("action_id").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, "missing action_id").into_response();
    };
    let Some(decision_str) = action_id.strip_prefix("approval_") else {
        warn!(action_id, "slack_interactive_non_approval_action_ignored");
        return StatusCode::OK.into_response();
    };
    let Some(callback_token) = action.get("value").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, "missing callback token").into_response();
    };
    let Some(decision) = parse_decision(decision_str) else {
        return (StatusCode::BAD_REQUEST, "unknown decision").into_response();
    };
    let Some(approval_id) = state.approvals.verify_callback_token(callback_token) else {
        return (StatusCode::FORBIDDEN, "invalid callback token").into_response();
    };

    let approval = match state.approvals.get(approval_id).await {
        Ok(a) => a,
        Err(e) => return error_response(&e),
    };

    if !approval.ui_schema.completes_on_button_click() {
        let Some(trigger_id) = payload.get("trigger_id").and_then(Value::as_str) else {
            return (StatusCode::BAD_REQUEST, "missing trigger_id").into_response();
        };
        let view = state.chat_adapter.render_modal_view(&approval.ui_schema, callback_token, decision_str);
        if let Err(e) = state.chat_adapter.open_modal(trigger_id, view).await {
            error!(error = %e, "slack_modal_open_failed");
            return (StatusCode::BAD_GATEWAY, "failed to open modal").into_response();
        }
        return StatusCode::OK.into_response();
    }

    let response_data = payload.get("state").and_then(|s| s.get("values")).map(extract_field_values).unwrap_or_default();
    complete_decision(state, approval_id, decision, response_data).await
}

async fn handle_view_submission(state: &InboundState, payload: &Value) -> Response {
    let Some(view) = payload.get("view") else {
        return (StatusCode::BAD_REQUEST, "missing view").into_response();
    };
    let Some(callback_id) = view.get("callback_id").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, "missing callback_id").into_response();
    };
    let Some((callback_token, decision_str)) = callback_id.rsplit_once(':') else {
        return (StatusCode::BAD_REQUEST, "malformed callback_id").into_response();
    };
    let Some(decision) = parse_decision(decision_str) else {
        return (StatusCode::BAD_REQUEST, "unknown decision").into_response();
    };
    let Some(approval_id) = state.approvals.verify_callback_token(callback_token) else {
        return (StatusCode::FORBIDDEN, "invalid callback token").into_response();
    };

    let response_data = view.get("state").and_then(|s| s.get("values")).map(extract_field_values).unwrap_or_default();
    complete_decision(state, approval_id, decision, response_data).await
}

async fn complete_decision(state: &InboundState, approval_id: Uuid, decision: ApprovalDecision, response_data: JsonMap) -> Response {
    match state.approvals.respond_to_approval(approval_id, decision, response_data).await {
        Ok(updated) => Json(json!({"status": "ok", "approval_status": updated.status.to_string()})).into_response(),
        Err(e) => error_response(&e),
    }
}

fn parse_decision(s: &str) -> Option<ApprovalDecision> {
    match s {
        "approve" => Some(ApprovalDecision::Approve),
        "reject" => Some(ApprovalDecision::Reject),
        _ => None,
    }
}

/// Walks a Slack `state.values` object (`{block_id: {action_id: element}}`)
/// and pulls out one value per `field_{name}`-prefixed `action_id`, covering
/// the element shapes `render_blocks`/`render_modal_view` actually emit.
fn extract_field_values(state_values: &Value) -> JsonMap {
    let mut result = JsonMap::new();
    let Some(blocks) = state_values.as_object() else { return result };

    for block in blocks.values() {
        let Some(actions) = block.as_object() else { continue };
        for (action_id, element) in actions {
            let Some(field_name) = action_id.strip_prefix("field_") else { continue };
            if let Some(value) = extract_element_value(element) {
                result.insert(field_name.to_string(), value);
            }
        }
    }

    result
}

fn extract_element_value(element: &Value) -> Option<Value> {
    if let Some(v) = element.get("value").and_then(Value::as_str) {
        return Some(json!(v));
    }
    if let Some(option) = element.get("selected_option") {
        return option.get("value").cloned();
    }
    if let Some(options) = element.get("selected_options").and_then(Value::as_array) {
        let values: Vec<Value> = options.iter().filter_map(|o| o.get("value").cloned()).collect();
        return Some(json!(values));
    }
    if let Some(date) = element.get("selected_date") {
        return Some(date.clone());
    }
    if let Some(datetime) = element.get("selected_date_time") {
        return Some(datetime.clone());
    }
    None
}

fn error_response(err: &HiloopError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"error": err.error_code(), "message": err.to_string()}))).into_response()
}
