//! `POST /workflows`, the read routes, and the workflow-level control-plane
//! routes (`cancel`, `retry`, `rollback`) from spec §6. Thin adapters over
//! `hiloop_engine::WorkflowEngine` — no state-machine logic lives here.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
};
use hiloop_core::{HiloopError, JsonMap, Workflow, WorkflowState};
use hiloop_engine::NewStep;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct StepRequest {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub task_handler: Option<String>,
    #[serde(default)]
    pub task_input: Option<JsonMap>,
    #[serde(default)]
    pub ui_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
}

impl StepRequest {
    fn into_new_step(self) -> ApiResult<NewStep> {
        let step_type = hiloop_core::StepType::from_str(&self.step_type)
            .map_err(|e| ApiError(HiloopError::validation(e)))?;

        let task_input = match step_type {
            hiloop_core::StepType::Task => self.task_input,
            hiloop_core::StepType::Approval => {
                let mut input = self.task_input.unwrap_or_default();
                if let Some(ui_schema) = self.ui_schema {
                    input.insert("ui_schema".to_string(), ui_schema);
                }
                if let Some(timeout) = self.timeout_seconds {
                    input.insert("timeout_seconds".to_string(), json!(timeout));
                }
                Some(input)
            }
        };

        Ok(NewStep { step_type, task_handler: self.task_handler, task_input })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow_type: String,
    #[serde(default)]
    pub context: JsonMap,
    #[serde(default)]
    pub steps: Option<Vec<StepRequest>>,
    #[serde(default)]
    pub approval_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub approval_timeout_seconds: Option<i64>,
}

/// `POST /workflows`. A workflow created with `steps` runs the multi-step
/// path; one created with `approval_schema` and no `steps` stashes it under
/// `context._approval_schema` for the legacy single-step subscriber
/// (`WorkflowStartedHandler`) to pick up.
pub async fn create_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateWorkflowRequest>,
) -> ApiResult<Json<Workflow>> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let mut context = body.context;
    if let Some(schema) = body.approval_schema {
        context.insert("_approval_schema".to_string(), schema);
        if let Some(timeout) = body.approval_timeout_seconds {
            context.insert("_approval_timeout".to_string(), json!(timeout));
        }
    }

    let steps = body
        .steps
        .map(|steps| steps.into_iter().map(StepRequest::into_new_step).collect::<ApiResult<Vec<_>>>())
        .transpose()?;

    let workflow =
        state.engine.create_workflow(body.workflow_type, context, steps, idempotency_key.as_deref()).await?;

    Ok(Json(workflow))
}

pub async fn get_workflow(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.engine.workflows().get(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    pub state: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_workflows(
    State(state): State<ApiState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> ApiResult<Json<Vec<Workflow>>> {
    let workflow_state = query
        .state
        .map(|s| WorkflowState::from_str(&s).map_err(|e| ApiError(HiloopError::validation(e))))
        .transpose()?;

    let workflows = state.engine.workflows().list(workflow_state, query.limit.unwrap_or(50)).await?;
    Ok(Json(workflows))
}

pub async fn get_workflow_events(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<hiloop_core::WorkflowEvent>>> {
    Ok(Json(state.engine.events_repo().list_for_workflow(id).await?))
}

pub async fn get_workflow_steps(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<hiloop_core::WorkflowStep>>> {
    Ok(Json(state.engine.steps().list_for_workflow(id).await?))
}

pub async fn cancel_workflow(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.engine.mark_failed(id, "Cancelled by user", false).await?))
}

pub async fn retry_workflow(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<Json<Workflow>> {
    match state.engine.retry_workflow(id).await? {
        Some(workflow) => Ok(Json(workflow)),
        None => Ok(Json(state.engine.workflows().get(id).await?)),
    }
}

#[derive(Debug, Deserialize)]
pub struct RollbackQuery {
    pub target_state: String,
    pub reason: String,
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_actor() -> String {
    "api".to_string()
}

pub async fn rollback_workflow(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RollbackQuery>,
) -> ApiResult<Json<Workflow>> {
    let target_state =
        WorkflowState::from_str(&query.target_state).map_err(|e| ApiError(HiloopError::validation(e)))?;
    let workflow = state.engine.rollback_workflow(id, target_state, &query.reason, &query.actor).await?;
    Ok(Json(workflow))
}
