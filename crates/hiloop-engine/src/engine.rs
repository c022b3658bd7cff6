//! The step executor: `create_workflow`, `execute_next_step`, completion,
//! failure, retry, and explicit rollback (spec §4.2-4.4).
//!
//! Everything here operates on the *multi-step* path — a workflow created
//! with an explicit `steps` array. The legacy single-step path (a bare
//! `_approval_schema` key in `context`, no `steps`) is driven entirely off
//! the `workflow.started`/`approval.received`/`approval.timeout` events this
//! module publishes; see [`crate::events`].

use chrono::Utc;
use hiloop_bus::EventBus;
use hiloop_core::{
    EventType, HiloopError, JsonMap, Result, StepStatus, StepType, Workflow, WorkflowState, WorkflowStep,
};
use hiloop_db::{
    DlqRepository, EventRepository, IdempotencyRepository, WorkflowRepository, WorkflowStepRepository,
};
use hiloop_resilience::RetryPolicy;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::approval_service::ApprovalService;
use crate::state_machine;
use crate::task::TaskRegistry;

/// One entry of a `create_workflow` `steps` array. `task_input` doubles as
/// the approval step's config: for `StepType::Approval` it carries
/// `ui_schema` and an optional `timeout_seconds`, mirroring how the original
/// packs an approval step's configuration into the same column a task step
/// uses for its handler input.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub step_type: StepType,
    pub task_handler: Option<String>,
    pub task_input: Option<JsonMap>,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    workflows: WorkflowRepository,
    steps: WorkflowStepRepository,
    events: EventRepository,
    idempotency: IdempotencyRepository,
    dlq: DlqRepository,
    bus: EventBus,
    approvals: ApprovalService,
    tasks: TaskRegistry,
    retry_policy: RetryPolicy,
    default_approval_timeout_seconds: i64,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflows: WorkflowRepository,
        steps: WorkflowStepRepository,
        events: EventRepository,
        idempotency: IdempotencyRepository,
        dlq: DlqRepository,
        bus: EventBus,
        approvals: ApprovalService,
        tasks: TaskRegistry,
        retry_policy: RetryPolicy,
        default_approval_timeout_seconds: i64,
    ) -> Self {
        Self {
            workflows,
            steps,
            events,
            idempotency,
            dlq,
            bus,
            approvals,
            tasks,
            retry_policy,
            default_approval_timeout_seconds,
        }
    }

    pub fn workflows(&self) -> &WorkflowRepository {
        &self.workflows
    }

    pub fn steps(&self) -> &WorkflowStepRepository {
        &self.steps
    }

    pub fn approvals(&self) -> &ApprovalService {
        &self.approvals
    }

    pub fn events_repo(&self) -> &EventRepository {
        &self.events
    }

    /// Creates a workflow, optionally with an explicit ordered `steps` list.
    /// A duplicate `idempotency_key` within the 24h window short-circuits to
    /// the previously-created workflow instead of creating a second one
    /// (spec §4.2 / SUPPLEMENT).
    pub async fn create_workflow(
        &self,
        workflow_type: String,
        context: JsonMap,
        steps: Option<Vec<NewStep>>,
        idempotency_key: Option<&str>,
    ) -> Result<Workflow> {
        if let Some(key) = idempotency_key {
            if let Some(cached) = self.idempotency.get(key).await? {
                let workflow: Workflow = serde_json::from_value(serde_json::Value::Object(
                    cached.into_iter().collect(),
                ))?;
                info!(workflow_id = %workflow.id, key, "create_workflow short-circuited by idempotency key");
                return Ok(workflow);
            }
        }

        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::new_v4(),
            workflow_type: workflow_type.clone(),
            state: WorkflowState::Created,
            context: context.clone(),
            created_at: now,
            updated_at: now,
            version: 1,
            retry_count: 0,
            max_retries: 3,
            rollback_count: 0,
            max_rollbacks: 3,
            previous_state: None,
            rollback_reason: None,
        };

        let mut tx = self.workflows.pool().begin().await?;
        let created = self.workflows.create_in_tx(&mut tx, &workflow).await?;

        if let Some(steps) = &steps {
            for (order, spec) in steps.iter().enumerate() {
                let step = WorkflowStep {
                    id: Uuid::new_v4(),
                    workflow_id: created.id,
                    step_order: order as i32,
                    step_type: spec.step_type,
                    status: StepStatus::Pending,
                    task_handler: spec.task_handler.clone(),
                    task_input: spec.task_input.clone(),
                    task_output: None,
                    approval_id: None,
                    started_at: None,
                    completed_at: None,
                };
                self.steps.create_in_tx(&mut tx, &step).await?;
            }
        }

        let mut event_data = JsonMap::new();
        event_data.insert("workflow_type".to_string(), serde_json::json!(workflow_type));
        event_data.insert("initial_state".to_string(), serde_json::json!(WorkflowState::Created.to_string()));
        event_data.insert("context".to_string(), serde_json::json!(context));
        self.events
            .append_in_tx(&mut tx, created.id, &EventType::from(EventType::WORKFLOW_STARTED), event_data)
            .await?;

        tx.commit().await?;

        info!(workflow_id = %created.id, workflow_type = %workflow_type, "workflow_created");

        self.bus
            .publish(
                EventType::WORKFLOW_STARTED,
                serde_json::from_value(serde_json::json!({
                    "workflow_id": created.id,
                    "workflow_type": workflow_type,
                    "context": context,
                    "approval_timeout_seconds": self.default_approval_timeout_seconds,
                }))?,
                Some(created.id),
            )
            .await?;

        // Multi-step workflows run under the engine's own direction; the
        // legacy single-step path (no `steps`) is left entirely to the
        // `workflow.started` subscriber so both paths share one entry point.
        if steps.is_some() {
            state_machine::transition_by_id(
                &self.workflows,
                &self.events,
                created.id,
                WorkflowState::Running,
                "Starting multi-step workflow",
            )
            .await?;
            self.execute_next_step(created.id).await?;
        }

        let final_workflow = self.workflows.get(created.id).await?;

        if let Some(key) = idempotency_key {
            let as_value = serde_json::to_value(&final_workflow)?;
            if let serde_json::Value::Object(map) = as_value {
                let response: JsonMap = map.into_iter().collect();
                self.idempotency.put(key, &response).await?;
            }
        }

        Ok(final_workflow)
    }

    /// Dispatches the next pending step for `workflow_id`, or completes the
    /// workflow if none remain. Recurses (via `Box::pin`) as task steps
    /// finish synchronously; an approval step stops the chain until a human
    /// responds.
    pub fn execute_next_step<'a>(
        &'a self,
        workflow_id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let next = self.steps.next_pending(workflow_id).await?;

            let Some(step) = next else {
                info!(%workflow_id, "workflow_all_steps_completed");
                self.mark_completed(workflow_id, JsonMap::new()).await?;
                return Ok(());
            };

            let step = self.steps.mark_running(step.id).await?;
            info!(
                %workflow_id,
                step_id = %step.id,
                step_type = %step.step_type,
                step_order = step.step_order,
                "step_started"
            );

            match step.step_type {
                StepType::Task => self.execute_task_step(step).await,
                StepType::Approval => self.execute_approval_step(step).await,
            }
        })
    }

    async fn execute_task_step(&self, step: WorkflowStep) -> Result<()> {
        let input = step.task_input.clone().unwrap_or_default();

        let result = match step.task_handler.as_deref().and_then(|h| self.tasks.get(h)) {
            None => {
                warn!(step_id = %step.id, handler = ?step.task_handler, "task_handler_not_found");
                let mut skipped = JsonMap::new();
                skipped.insert("status".to_string(), serde_json::json!("skipped"));
                skipped.insert("reason".to_string(), serde_json::json!("handler_not_found"));
                Ok(skipped)
            }
            Some(handler) => handler.execute(&input).await,
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                error!(step_id = %step.id, workflow_id = %step.workflow_id, error = %e, "task_step_failed");
                let mut output = JsonMap::new();
                output.insert("error".to_string(), serde_json::json!(e.to_string()));
                self.steps.mark_failed(step.id, Some(output)).await?;
                self.mark_failed(step.workflow_id, &format!("Task step failed: {e}"), false).await?;
                return Ok(());
            }
        };

        self.steps.mark_completed(step.id, Some(result.clone())).await?;
        info!(step_id = %step.id, workflow_id = %step.workflow_id, handler = ?step.task_handler, "task_step_completed");

        self.bus
            .publish(
                EventType::STEP_COMPLETED,
                serde_json::from_value(serde_json::json!({
                    "workflow_id": step.workflow_id,
                    "step_id": step.id,
                    "step_order": step.step_order,
                    "step_type": step.step_type.to_string(),
                    "handler": step.task_handler,
                    "result": result,
                }))?,
                Some(step.workflow_id),
            )
            .await?;

        self.execute_next_step(step.workflow_id).await
    }

    async fn execute_approval_step(&self, step: WorkflowStep) -> Result<()> {
        let config = step.task_input.clone().unwrap_or_default();
        let ui_schema = match config.get("ui_schema") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => hiloop_core::ApprovalUiSchema {
                fields: vec![],
                buttons: vec![
                    hiloop_core::ApprovalButton {
                        label: "Approve".to_string(),
                        value: "approve".to_string(),
                        style: hiloop_core::ButtonStyle::Primary,
                    },
                    hiloop_core::ApprovalButton {
                        label: "Reject".to_string(),
                        value: "reject".to_string(),
                        style: hiloop_core::ButtonStyle::Danger,
                    },
                ],
            },
        };
        let timeout_seconds = config.get("timeout_seconds").and_then(|v| v.as_i64());

        if let Err(e) = self.approvals.create_linked(step.workflow_id, step.id, ui_schema, timeout_seconds).await {
            error!(step_id = %step.id, workflow_id = %step.workflow_id, error = %e, "approval_step_failed");
            self.steps.mark_failed(step.id, None).await?;
            self.mark_failed(step.workflow_id, &format!("Approval step failed: {e}"), false).await?;
        }

        Ok(())
    }

    /// Called by the `approval.received` subscriber when the approval is
    /// linked to a step (spec §9 redesigned approval-completion glue).
    pub async fn handle_approval_response(
        &self,
        workflow_id: Uuid,
        step: &WorkflowStep,
        approved: bool,
        response_data: &JsonMap,
    ) -> Result<()> {
        if approved {
            self.steps.mark_completed(step.id, Some(response_data.clone())).await?;
            info!(workflow_id = %workflow_id, step_id = %step.id, "approval_step_approved");
            self.execute_next_step(workflow_id).await
        } else {
            self.steps.mark_failed(step.id, Some(response_data.clone())).await?;
            info!(workflow_id = %workflow_id, step_id = %step.id, "approval_step_rejected");
            self.rollback_steps(workflow_id, step.step_order).await
        }
    }

    /// Compensation: walks completed `task` steps strictly below the
    /// rejected approval's order, invoking each one's registered rollback
    /// handler best-effort, then transitions the workflow to `REJECTED`
    /// (spec §4.3).
    async fn rollback_steps(&self, workflow_id: Uuid, failed_step_order: i32) -> Result<()> {
        info!(%workflow_id, failed_step_order, "rollback_initiated");

        let completed = self.steps.completed_task_steps_below(workflow_id, failed_step_order).await?;
        for step in completed {
            let Some(handler_name) = &step.task_handler else { continue };
            let Some(rollback) = self.tasks.get_rollback(handler_name) else { continue };
            let output = step.task_output.clone().unwrap_or_default();
            if let Err(e) = rollback.rollback(&output).await {
                error!(step_id = %step.id, handler = %handler_name, error = %e, "rollback_failed");
            } else {
                info!(step_id = %step.id, handler = %handler_name, "step_rolled_back");
            }
        }

        let current = self.workflows.get(workflow_id).await?;
        let updated = state_machine::transition_to(
            &self.workflows,
            &self.events,
            &current,
            WorkflowState::Rejected,
            "Approval rejected - workflow rolled back",
            None,
        )
        .await?;

        self.bus
            .publish(
                EventType::WORKFLOW_STATE_CHANGED,
                serde_json::from_value(serde_json::json!({
                    "workflow_id": updated.id,
                    "to_state": WorkflowState::Rejected.to_string(),
                    "reason": "Approval rejected - workflow rolled back",
                }))?,
                Some(updated.id),
            )
            .await?;

        Ok(())
    }

    /// Transitions to `COMPLETED`, folding `result_data` into `context` as
    /// the `result` key, and records/publishes a `workflow.completed` event
    /// alongside the state-change event `transition_to` already recorded.
    pub async fn mark_completed(&self, workflow_id: Uuid, result_data: JsonMap) -> Result<Workflow> {
        let current = self.workflows.get(workflow_id).await?;
        let mut context = current.context.clone();
        context.insert("result".to_string(), serde_json::json!(result_data));

        let updated = state_machine::transition_to(
            &self.workflows,
            &self.events,
            &current,
            WorkflowState::Completed,
            "Workflow completed successfully",
            Some(context),
        )
        .await?;

        let mut event_data = JsonMap::new();
        event_data.insert("workflow_id".to_string(), serde_json::json!(workflow_id));
        event_data.insert("result".to_string(), serde_json::json!(result_data));
        self.append_and_publish(workflow_id, EventType::WORKFLOW_COMPLETED, event_data).await?;

        info!(%workflow_id, "workflow_completed");
        Ok(updated)
    }

    /// Cancels pending approvals, fails any running steps (so a FAILED
    /// workflow never has a running step left dangling), transitions to
    /// `FAILED`, records/publishes `workflow.failed`, and optionally writes
    /// a dead-letter entry.
    pub async fn mark_failed(&self, workflow_id: Uuid, error: &str, move_to_dlq: bool) -> Result<Workflow> {
        self.approvals.cancel_pending_for_workflow(workflow_id).await?;
        self.steps.fail_running_steps(workflow_id).await?;

        let current = self.workflows.get(workflow_id).await?;
        let updated = state_machine::transition_to(
            &self.workflows,
            &self.events,
            &current,
            WorkflowState::Failed,
            &format!("Workflow failed: {error}"),
            None,
        )
        .await?;

        let mut event_data = JsonMap::new();
        event_data.insert("workflow_id".to_string(), serde_json::json!(workflow_id));
        event_data.insert("error".to_string(), serde_json::json!(error));
        self.append_and_publish(workflow_id, EventType::WORKFLOW_FAILED, event_data).await?;

        error!(%workflow_id, error, "workflow_failed");

        if move_to_dlq {
            self.move_to_dlq(&updated, "workflow.failed_max_retries_exceeded", error).await;
        }

        Ok(updated)
    }

    async fn move_to_dlq(&self, workflow: &Workflow, original_event_type: &str, error_message: &str) {
        let payload = serde_json::json!({
            "workflow_id": workflow.id,
            "workflow_type": workflow.workflow_type,
            "state": workflow.state.to_string(),
            "retry_count": workflow.retry_count,
            "max_retries": workflow.max_retries,
            "context": workflow.context,
        });
        let payload: JsonMap = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => {
                error!(workflow_id = %workflow.id, error = %e, "failed to serialize dlq payload");
                return;
            }
        };
        if let Err(e) = self
            .dlq
            .insert(original_event_type, &payload, error_message, workflow.retry_count, Some(workflow.id))
            .await
        {
            error!(workflow_id = %workflow.id, error = %e, "dlq_write_failed_for_workflow");
        } else {
            warn!(workflow_id = %workflow.id, retry_count = workflow.retry_count, "workflow_moved_to_dlq");
        }
    }

    async fn append_and_publish(&self, workflow_id: Uuid, event_type: &str, event_data: JsonMap) -> Result<()> {
        let mut tx = self.workflows.pool().begin().await?;
        self.events
            .append_in_tx(&mut tx, workflow_id, &EventType::from(event_type), event_data.clone())
            .await?;
        tx.commit().await?;
        self.bus.publish(EventType::from(event_type), event_data, Some(workflow_id)).await
    }

    /// Resumes a `TIMEOUT`/`FAILED` workflow: bumps `retry_count`, cancels
    /// orphaned pending approvals, transitions back to `RUNNING`, and
    /// either resumes multi-step execution from the failure point or
    /// publishes `approval.retry` for the legacy single-step subscriber to
    /// re-request approval (spec §4.4). Returns `None` both when the
    /// workflow is in the wrong state to retry and when max retries have
    /// already been exceeded (in the latter case the workflow is moved to
    /// FAILED + DLQ as a side effect).
    pub async fn retry_workflow(&self, workflow_id: Uuid) -> Result<Option<Workflow>> {
        let current = self.workflows.get(workflow_id).await?;

        if current.state != WorkflowState::Timeout && current.state != WorkflowState::Failed {
            warn!(%workflow_id, state = %current.state, "retry_workflow_invalid_state");
            return Ok(None);
        }

        if current.retry_count >= current.max_retries {
            warn!(%workflow_id, retry_count = current.retry_count, max_retries = current.max_retries, "max_retries_exceeded");
            self.mark_failed(workflow_id, &format!("Max retries ({}) exceeded", current.max_retries), true).await?;
            return Ok(None);
        }

        let backoff = self.retry_policy.calculate_backoff(current.retry_count as usize);
        let steps = self.steps.list_for_workflow(workflow_id).await?;
        let is_multi_step = !steps.is_empty();

        info!(
            %workflow_id,
            retry_count = current.retry_count + 1,
            max_retries = current.max_retries,
            backoff_seconds = backoff.as_secs_f64(),
            is_multi_step,
            "workflow_retry_initiated"
        );

        self.approvals.cancel_pending_for_workflow(workflow_id).await?;

        let updated = state_machine::transition_with_retry_increment(
            &self.workflows,
            &self.events,
            &current,
            WorkflowState::Running,
            &format!("Retry attempt {}/{}", current.retry_count + 1, current.max_retries),
        )
        .await?;

        self.bus
            .publish(
                EventType::APPROVAL_RETRY,
                serde_json::from_value(serde_json::json!({
                    "workflow_id": workflow_id,
                    "retry_count": updated.retry_count,
                    "max_retries": updated.max_retries,
                    "backoff_seconds": backoff.as_secs_f64(),
                    "is_multi_step": is_multi_step,
                }))?,
                Some(workflow_id),
            )
            .await?;

        if is_multi_step {
            match self.steps.first_failed_or_running(workflow_id).await? {
                Some(first) => {
                    self.steps.reset_from_order(workflow_id, first.step_order).await?;
                    self.execute_next_step(workflow_id).await?;
                }
                None => {
                    error!(%workflow_id, "multi_step_retry_no_steps_reset");
                    self.mark_failed(workflow_id, "Retry failed: no steps to reset", false).await?;
                    return Ok(None);
                }
            }
        }

        info!(%workflow_id, retry_count = updated.retry_count, "workflow_retry_completed");
        Ok(Some(updated))
    }

    /// Explicit rollback API: moves the workflow to `target_state` with a
    /// full audit trail, subject to the legal-transition graph and
    /// `max_rollbacks` (spec §4.3).
    pub async fn rollback_workflow(
        &self,
        workflow_id: Uuid,
        target_state: WorkflowState,
        reason: &str,
        rollback_by: &str,
    ) -> Result<Workflow> {
        let current = self.workflows.get(workflow_id).await?;

        if current.rollback_count >= current.max_rollbacks {
            return Err(HiloopError::validation(format!(
                "maximum rollback limit ({}) exceeded for workflow {workflow_id}",
                current.max_rollbacks
            )));
        }

        let updated =
            state_machine::transition_with_rollback(&self.workflows, &self.events, &current, target_state, reason, rollback_by)
                .await?;

        self.bus
            .publish(
                EventType::WORKFLOW_ROLLED_BACK,
                serde_json::from_value(serde_json::json!({
                    "workflow_id": workflow_id,
                    "from_state": current.state.to_string(),
                    "to_state": target_state.to_string(),
                    "reason": reason,
                    "rollback_by": rollback_by,
                    "rollback_count": updated.rollback_count,
                }))?,
                Some(workflow_id),
            )
            .await?;

        info!(%workflow_id, from = %current.state, to = %target_state, rollback_count = updated.rollback_count, "rollback_workflow_completed");
        Ok(updated)
    }
}
