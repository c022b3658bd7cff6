//! `GET/POST/DELETE /admin/dlq*` — operator-facing dead-letter-queue
//! inspection and replay (spec §6). The DLQ is append-only from the bus's
//! side; these routes are the only place rows are ever retried or removed.
//! A retry deletes the row once the event is accepted back onto the bus —
//! "accepted" meaning enqueued, not necessarily processed successfully a
//! second time, since the bus has no synchronous completion signal to wait
//! on (a re-failed event lands back in the DLQ as a fresh row).

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use hiloop_core::DeadLetter;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiResult;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct ListDlqQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_dlq(
    State(state): State<ApiState>,
    Query(query): Query<ListDlqQuery>,
) -> ApiResult<Json<Vec<DeadLetter>>> {
    let entries = state.dlq.list(query.limit.unwrap_or(100), query.offset.unwrap_or(0)).await?;
    Ok(Json(entries))
}

/// Re-publishes a single dead-lettered event onto the bus for another
/// delivery attempt, deleting the row once the bus accepts it (spec §6).
pub async fn retry_dlq_entry(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let entry = state.dlq.get(id).await?;
    state.bus.publish(entry.original_event_type.as_str(), entry.event_data, entry.workflow_id).await?;
    state.dlq.delete(id).await?;
    Ok(Json(json!({"status": "requeued", "id": id})))
}

pub async fn retry_all_dlq(State(state): State<ApiState>) -> ApiResult<Json<serde_json::Value>> {
    let entries = state.dlq.list(i64::MAX, 0).await?;
    let mut requeued = 0u64;
    for entry in entries {
        if state.bus.publish(entry.original_event_type.as_str(), entry.event_data, entry.workflow_id).await.is_ok() {
            let _ = state.dlq.delete(entry.id).await;
            requeued += 1;
        }
    }
    Ok(Json(json!({"status": "requeued", "count": requeued})))
}

pub async fn delete_dlq_entry(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.dlq.delete(id).await?;
    Ok(Json(json!({"status": "deleted", "id": id})))
}

pub async fn clear_dlq(State(state): State<ApiState>) -> ApiResult<Json<serde_json::Value>> {
    let count = state.dlq.clear().await?;
    Ok(Json(json!({"status": "cleared", "count": count})))
}
