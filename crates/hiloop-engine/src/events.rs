//! Bus subscribers that drive the legacy single-step path and close out the
//! redesigned approval-completion glue (spec §9 / SPEC_FULL "Redesigned
//! approval-completion glue").
//!
//! A workflow created without an explicit `steps` array has no
//! `execute_next_step` chain to advance it — these three handlers are that
//! workflow's entire forward progress, reacting to `workflow.started`,
//! `approval.received`, and `approval.timeout` the same way a multi-step
//! workflow's steps react to the engine calling it directly.

use async_trait::async_trait;
use hiloop_bus::{BusEvent, EventHandler};
use hiloop_core::{ApprovalUiSchema, HiloopError, JsonMap, Result, WorkflowState};
use hiloop_db::WorkflowStepRepository;
use tracing::info;
use uuid::Uuid;

use crate::approval_service::ApprovalService;
use crate::engine::WorkflowEngine;
use crate::state_machine;

fn event_field<'a>(event: &'a BusEvent, key: &str) -> Result<&'a serde_json::Value> {
    event.payload.get(key).ok_or_else(|| HiloopError::EventHandlerError {
        event_type: event.event_type.to_string(),
        reason: format!("missing `{key}` in event payload"),
    })
}

fn require_workflow_id(event: &BusEvent) -> Result<Uuid> {
    event.workflow_id.ok_or_else(|| HiloopError::EventHandlerError {
        event_type: event.event_type.to_string(),
        reason: "missing workflow_id".to_string(),
    })
}

/// Subscribed to `workflow.started`. A workflow with explicit steps is
/// already being driven by `WorkflowEngine::create_workflow`'s own call
/// into `execute_next_step` — this handler only acts on the legacy shape:
/// no steps, with an optional `_approval_schema` key stashed in `context`.
pub struct WorkflowStartedHandler {
    engine: WorkflowEngine,
    approvals: ApprovalService,
}

impl WorkflowStartedHandler {
    pub fn new(engine: WorkflowEngine, approvals: ApprovalService) -> Self {
        Self { engine, approvals }
    }
}

#[async_trait]
impl EventHandler for WorkflowStartedHandler {
    async fn handle(&self, event: &BusEvent) -> Result<()> {
        let workflow_id = require_workflow_id(event)?;

        let steps = self.engine.steps().list_for_workflow(workflow_id).await?;
        if !steps.is_empty() {
            info!(%workflow_id, num_steps = steps.len(), "multi_step_workflow_detected");
            return Ok(());
        }

        state_machine::transition_by_id(
            self.engine.workflows(),
            self.engine.events_repo(),
            workflow_id,
            WorkflowState::Running,
            "Workflow started",
        )
        .await?;

        let context = event_field(event, "context")?.clone();
        let context: JsonMap = serde_json::from_value(context)?;

        match context.get("_approval_schema") {
            Some(schema) => {
                let ui_schema: ApprovalUiSchema = serde_json::from_value(schema.clone())?;
                let timeout = context
                    .get("_approval_timeout")
                    .and_then(|v| v.as_i64())
                    .or_else(|| event.payload.get("approval_timeout_seconds").and_then(|v| v.as_i64()));

                state_machine::transition_by_id(
                    self.engine.workflows(),
                    self.engine.events_repo(),
                    workflow_id,
                    WorkflowState::WaitingApproval,
                    "Requesting approval",
                )
                .await?;

                self.approvals.request_approval(workflow_id, ui_schema, timeout).await?;
                info!(%workflow_id, "approval_request_created");
            }
            None => {
                info!(%workflow_id, "no_approval_needed");
                let mut result = JsonMap::new();
                result.insert("auto_approved".to_string(), serde_json::json!(true));
                self.engine.mark_completed(workflow_id, result).await?;
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "workflow_started"
    }
}

/// Subscribed to `approval.received`. `ApprovalService::respond_to_approval`
/// only persists the decision and publishes this event — whether a
/// multi-step `WorkflowStep` is attached decides whether the engine
/// continues the step chain or this handler updates the legacy workflow
/// directly, instead of `ApprovalService` calling into the engine itself
/// (spec §9's redesign of the original's tight coupling).
pub struct ApprovalReceivedHandler {
    engine: WorkflowEngine,
    steps: WorkflowStepRepository,
}

impl ApprovalReceivedHandler {
    pub fn new(engine: WorkflowEngine, steps: WorkflowStepRepository) -> Self {
        Self { engine, steps }
    }
}

#[async_trait]
impl EventHandler for ApprovalReceivedHandler {
    async fn handle(&self, event: &BusEvent) -> Result<()> {
        let workflow_id = require_workflow_id(event)?;
        let decision = event_field(event, "decision")?.as_str().unwrap_or_default().to_string();
        let response_data: JsonMap = event
            .payload
            .get("response_data")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let approval_id = event_field(event, "approval_id")?
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| HiloopError::EventHandlerError {
                event_type: event.event_type.to_string(),
                reason: "malformed approval_id".to_string(),
            })?;

        if let Some(step) = self.steps.find_by_approval_id(approval_id).await? {
            info!(%workflow_id, step_id = %step.id, "multi_step_approval_response_dispatched");
            return self.engine.handle_approval_response(workflow_id, &step, decision == "approve", &response_data).await;
        }

        info!(%workflow_id, decision = %decision, "legacy_single_step_approval_response");

        if decision == "approve" {
            state_machine::transition_by_id(
                self.engine.workflows(),
                self.engine.events_repo(),
                workflow_id,
                WorkflowState::Approved,
                "Approval received",
            )
            .await?;

            let mut result = JsonMap::new();
            result.insert("approval".to_string(), serde_json::json!(response_data));
            self.engine.mark_completed(workflow_id, result).await?;
        } else {
            let rejection_reason =
                response_data.get("rejection_reason").and_then(|v| v.as_str()).unwrap_or("No reason provided");
            let reviewer_name = response_data.get("reviewer_name").and_then(|v| v.as_str()).unwrap_or("Unknown");
            let message = format!("Rejected by {reviewer_name}: {rejection_reason}");

            state_machine::transition_by_id(
                self.engine.workflows(),
                self.engine.events_repo(),
                workflow_id,
                WorkflowState::Rejected,
                &message,
            )
            .await?;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "approval_received"
    }
}

/// Subscribed to `approval.timeout`. `ApprovalService::mark_timeout` has
/// already moved the approval row to `TIMEOUT` and published this event —
/// this handler's only job is the workflow-side transition, skipped if the
/// workflow already reached a terminal state by some other path (a race
/// with a user response that completed the workflow just before the sweep
/// picked up the expiry).
pub struct ApprovalTimeoutHandler {
    engine: WorkflowEngine,
}

impl ApprovalTimeoutHandler {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for ApprovalTimeoutHandler {
    async fn handle(&self, event: &BusEvent) -> Result<()> {
        let workflow_id = require_workflow_id(event)?;
        let approval_id = event.payload.get("approval_id").cloned().unwrap_or_default();

        let workflow = self.engine.workflows().get(workflow_id).await?;
        if workflow.state.is_terminal() || workflow.state == WorkflowState::Timeout {
            info!(%workflow_id, state = %workflow.state, "timeout_ignored_workflow_already_handled");
            return Ok(());
        }

        state_machine::transition_by_id(
            self.engine.workflows(),
            self.engine.events_repo(),
            workflow_id,
            WorkflowState::Timeout,
            &format!("Approval {approval_id} timed out - no response received"),
        )
        .await?;

        info!(%workflow_id, "workflow_transitioned_to_timeout");
        Ok(())
    }

    fn name(&self) -> &str {
        "approval_timeout"
    }
}

/// Subscribed to `approval.retry`. Only the legacy single-step path needs
/// this: a multi-step workflow's retry is already driven synchronously
/// inside `WorkflowEngine::retry_workflow`, which publishes this same event
/// purely for observability in that case. Detected here by the absence of
/// any `WorkflowStep` rows for the workflow.
pub struct ApprovalRetryHandler {
    engine: WorkflowEngine,
    approvals: ApprovalService,
}

impl ApprovalRetryHandler {
    pub fn new(engine: WorkflowEngine, approvals: ApprovalService) -> Self {
        Self { engine, approvals }
    }
}

#[async_trait]
impl EventHandler for ApprovalRetryHandler {
    async fn handle(&self, event: &BusEvent) -> Result<()> {
        let workflow_id = require_workflow_id(event)?;

        let steps = self.engine.steps().list_for_workflow(workflow_id).await?;
        if !steps.is_empty() {
            return Ok(());
        }

        let workflow = self.engine.workflows().get(workflow_id).await?;
        let Some(schema) = workflow.context.get("_approval_schema") else {
            info!(%workflow_id, "retry_ignored_no_approval_schema");
            return Ok(());
        };
        let ui_schema: ApprovalUiSchema = serde_json::from_value(schema.clone())?;
        let timeout = workflow.context.get("_approval_timeout").and_then(|v| v.as_i64());

        state_machine::transition_by_id(
            self.engine.workflows(),
            self.engine.events_repo(),
            workflow_id,
            WorkflowState::WaitingApproval,
            "Re-requesting approval after retry",
        )
        .await?;

        self.approvals.request_approval(workflow_id, ui_schema, timeout).await?;
        info!(%workflow_id, "legacy_approval_re_requested");
        Ok(())
    }

    fn name(&self) -> &str {
        "approval_retry"
    }
}
