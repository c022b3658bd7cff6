//! Approval lifecycle: request, respond, timeout, and rollback (spec §4.5).
//!
//! This is the half of the orchestrator that talks to the outside world
//! through an opaque, signed callback rather than a direct function call.
//! Every mutating method here takes the approval row lock
//! (`SELECT ... FOR UPDATE`) for the duration of its transaction, which is
//! what makes a user's click and the timeout sweeper's sweep race safely
//! against each other (spec §5).

use chrono::Utc;
use hiloop_bus::EventBus;
use hiloop_core::{
    Approval, ApprovalDecision, ApprovalStatus, ApprovalUiSchema, EventType, HiloopError, JsonMap, Result,
    WorkflowState,
};
use hiloop_db::{ApprovalRepository, EventRepository, WorkflowRepository, WorkflowStepRepository};
use tracing::{info, warn};
use uuid::Uuid;

use crate::state_machine;

#[derive(Clone)]
pub struct ApprovalService {
    approvals: ApprovalRepository,
    steps: WorkflowStepRepository,
    workflows: WorkflowRepository,
    events: EventRepository,
    bus: EventBus,
    secret_key: Vec<u8>,
    default_timeout_seconds: i64,
}

impl ApprovalService {
    /// Direct read access for callers outside the engine (the chat adapter's
    /// bus handler needs the approval row to render its outbound message).
    pub fn approvals_repo(&self) -> &ApprovalRepository {
        &self.approvals
    }

    pub async fn get(&self, approval_id: Uuid) -> Result<Approval> {
        self.approvals.get(approval_id).await
    }

    /// Recovers an approval id from a signed callback token using this
    /// service's own secret, without a database round trip. The inbound
    /// webhook and the `/callbacks/{token}` HTTP route both need this before
    /// they have an approval row to work with.
    pub fn verify_callback_token(&self, token: &str) -> Option<Uuid> {
        hiloop_security::verify_callback_token(token, &self.secret_key)
    }

    pub fn new(
        approvals: ApprovalRepository,
        steps: WorkflowStepRepository,
        workflows: WorkflowRepository,
        events: EventRepository,
        bus: EventBus,
        secret_key: Vec<u8>,
        default_timeout_seconds: i64,
    ) -> Self {
        Self { approvals, steps, workflows, events, bus, secret_key, default_timeout_seconds }
    }

    /// Creates a standalone (unlinked) approval and publishes
    /// `approval.requested`. The multi-step executor path
    /// (`execute_next_step`'s approval-step branch) does not call this: it
    /// creates the approval itself inside the same transaction as the step
    /// row lock, via [`Self::create_linked`], so the idempotency guard and
    /// the insert are atomic.
    pub async fn request_approval(
        &self,
        workflow_id: Uuid,
        ui_schema: ApprovalUiSchema,
        timeout_seconds: Option<i64>,
    ) -> Result<Approval> {
        let mut tx = self.approvals.pool().begin().await?;
        let now = Utc::now().timestamp();
        let timeout_seconds = timeout_seconds.unwrap_or(self.default_timeout_seconds);
        let approval_id = Uuid::new_v4();

        let approval = Approval {
            id: approval_id,
            workflow_id,
            status: ApprovalStatus::Pending,
            ui_schema,
            response_data: None,
            requested_at: now,
            responded_at: None,
            expires_at: now + timeout_seconds,
            callback_token: hiloop_security::generate_callback_token(approval_id, &self.secret_key),
            external_message_ref: None,
        };

        let approval = self.approvals.create_in_tx(&mut tx, &approval).await?;

        let event_data = requested_event_payload(&approval);
        self.events
            .append_in_tx(&mut tx, workflow_id, &EventType::from(EventType::APPROVAL_REQUESTED), event_data.clone())
            .await?;

        tx.commit().await?;

        self.bus.publish(EventType::APPROVAL_REQUESTED, event_data, Some(workflow_id)).await?;
        info!(approval_id = %approval.id, workflow_id = %workflow_id, "approval requested");
        Ok(approval)
    }

    /// The multi-step path's approval creation: locks `step_id`, and only
    /// creates+links the approval if one is not already attached (spec
    /// §4.2's idempotency guard against concurrent drivers). Returns the
    /// existing approval unchanged if the guard fired.
    pub async fn create_linked(
        &self,
        workflow_id: Uuid,
        step_id: Uuid,
        ui_schema: ApprovalUiSchema,
        timeout_seconds: Option<i64>,
    ) -> Result<Approval> {
        let mut tx = self.steps.pool().begin().await?;

        let step = self.steps.lock_for_update(&mut tx, step_id).await?;
        if let Some(existing_id) = step.approval_id {
            tx.commit().await?;
            return self.approvals.get(existing_id).await;
        }

        let now = Utc::now().timestamp();
        let timeout_seconds = timeout_seconds.unwrap_or(self.default_timeout_seconds);
        let approval_id = Uuid::new_v4();

        let approval = Approval {
            id: approval_id,
            workflow_id,
            status: ApprovalStatus::Pending,
            ui_schema,
            response_data: None,
            requested_at: now,
            responded_at: None,
            expires_at: now + timeout_seconds,
            callback_token: hiloop_security::generate_callback_token(approval_id, &self.secret_key),
            external_message_ref: None,
        };

        let approval = self.approvals.create_in_tx(&mut tx, &approval).await?;
        self.steps.attach_approval_in_tx(&mut tx, step_id, approval.id).await?;

        let event_data = requested_event_payload(&approval);
        self.events
            .append_in_tx(&mut tx, workflow_id, &EventType::from(EventType::APPROVAL_REQUESTED), event_data.clone())
            .await?;

        tx.commit().await?;

        self.bus.publish(EventType::APPROVAL_REQUESTED, event_data, Some(workflow_id)).await?;
        info!(approval_id = %approval.id, workflow_id = %workflow_id, step_id = %step_id, "linked approval requested");
        Ok(approval)
    }

    /// Records a human decision. Critically checks expiry *before* status
    /// (spec §4.5 step 2): a user clicking after the timeout sweeper has
    /// already fired must see `Expired`, never `AlreadyProcessed`.
    pub async fn respond_to_approval(
        &self,
        approval_id: Uuid,
        decision: ApprovalDecision,
        response_data: JsonMap,
    ) -> Result<Approval> {
        let mut tx = self.approvals.pool().begin().await?;

        let approval = self.approvals.lock_for_update(&mut tx, approval_id).await?;
        let now = Utc::now().timestamp();

        if approval.is_expired(now) {
            return Err(HiloopError::Expired { id: approval_id, expires_at: approval.expires_at });
        }

        if !approval.status.is_pending() {
            return Err(HiloopError::AlreadyProcessed {
                id: approval_id,
                status: approval.status.to_string(),
            });
        }

        approval.ui_schema.validate_response(&response_data)?;

        let new_status = decision.resulting_status();
        let updated = self
            .approvals
            .respond_in_tx(&mut tx, approval_id, new_status, Some(response_data.clone()), now)
            .await?;

        let event_data = received_event_payload(&updated, decision, &response_data);
        self.events
            .append_in_tx(&mut tx, approval.workflow_id, &EventType::from(EventType::APPROVAL_RECEIVED), event_data.clone())
            .await?;

        tx.commit().await?;

        self.bus.publish(EventType::APPROVAL_RECEIVED, event_data, Some(approval.workflow_id)).await?;
        info!(approval_id = %approval_id, status = %updated.status, "approval decision recorded");
        Ok(updated)
    }

    /// PENDING -> TIMEOUT only; a no-op (not an error) if the approval had
    /// already moved, since that means the user won the race (spec §4.7).
    pub async fn mark_timeout(&self, approval_id: Uuid) -> Result<Option<Approval>> {
        let mut tx = self.approvals.pool().begin().await?;

        let approval = self.approvals.lock_for_update(&mut tx, approval_id).await?;
        let now = Utc::now().timestamp();

        let Some(updated) = self.approvals.mark_timeout_in_tx(&mut tx, approval_id, now).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut event_data = JsonMap::new();
        event_data.insert("approval_id".to_string(), serde_json::json!(approval_id));
        event_data.insert("workflow_id".to_string(), serde_json::json!(approval.workflow_id));
        event_data.insert("expires_at".to_string(), serde_json::json!(approval.expires_at));

        self.events
            .append_in_tx(&mut tx, approval.workflow_id, &EventType::from(EventType::APPROVAL_TIMEOUT), event_data.clone())
            .await?;

        tx.commit().await?;

        self.bus.publish(EventType::APPROVAL_TIMEOUT, event_data, Some(approval.workflow_id)).await?;
        warn!(approval_id = %approval_id, workflow_id = %approval.workflow_id, "approval timed out");
        Ok(Some(updated))
    }

    /// Cancels every pending approval belonging to `workflow_id` — orphans
    /// from a previous attempt (spec §4.4, used by `retry_workflow`/
    /// `mark_failed`). Emits one `approval.cancelled` event per cancelled
    /// row.
    pub async fn cancel_pending_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<Approval>> {
        let now = Utc::now().timestamp();
        let cancelled = self.approvals.cancel_pending_for_workflow(workflow_id, now).await?;

        for approval in &cancelled {
            let mut event_data = JsonMap::new();
            event_data.insert("approval_id".to_string(), serde_json::json!(approval.id));
            event_data.insert("workflow_id".to_string(), serde_json::json!(workflow_id));
            self.append_and_publish_cancelled(workflow_id, approval.id, event_data).await?;
        }

        Ok(cancelled)
    }

    async fn append_and_publish_cancelled(
        &self,
        workflow_id: Uuid,
        approval_id: Uuid,
        event_data: JsonMap,
    ) -> Result<()> {
        let mut tx = self.approvals.pool().begin().await?;
        self.events
            .append_in_tx(&mut tx, workflow_id, &EventType::from(EventType::APPROVAL_CANCELLED), event_data.clone())
            .await?;
        tx.commit().await?;
        self.bus.publish(EventType::APPROVAL_CANCELLED, event_data, Some(workflow_id)).await?;
        info!(approval_id = %approval_id, workflow_id = %workflow_id, "pending approval cancelled");
        Ok(())
    }

    /// Undoes a rejection: only legal from `REJECTED` and only while the
    /// approval has not separately expired. Reopens the linked step (if
    /// any) to `running` and moves the workflow back to `RUNNING`
    /// (multi-step) or `WAITING_APPROVAL` (legacy single-step) (spec §4.5).
    pub async fn rollback_approval(&self, approval_id: Uuid) -> Result<Approval> {
        let approval = self.approvals.get(approval_id).await?;
        if approval.status != ApprovalStatus::Rejected {
            return Err(HiloopError::validation(format!(
                "approval {approval_id} is {} , rollback only legal from REJECTED",
                approval.status
            )));
        }

        let now = Utc::now().timestamp();
        if approval.is_expired(now) {
            return Err(HiloopError::Expired { id: approval_id, expires_at: approval.expires_at });
        }

        let workflow = self.workflows.get(approval.workflow_id).await?;
        let linked_step = self.steps.find_by_approval_id(approval_id).await?;

        let timeout_seconds = approval.expires_at - approval.requested_at;
        let mut tx = self.approvals.pool().begin().await?;
        let reset = self
            .approvals
            .reset_to_pending_in_tx(&mut tx, approval_id, now, now + timeout_seconds)
            .await?;
        tx.commit().await?;

        if let Some(step) = &linked_step {
            self.steps.reset_single_to_running(step.id).await?;
        }

        let target_state = if linked_step.is_some() { WorkflowState::Running } else { WorkflowState::WaitingApproval };
        let updated_workflow =
            state_machine::transition_to(&self.workflows, &self.events, &workflow, target_state, "approval rolled back", None)
                .await?;
        self.bus
            .publish(
                EventType::WORKFLOW_STATE_CHANGED,
                serde_json::from_value(serde_json::json!({
                    "workflow_id": updated_workflow.id,
                    "to_state": target_state.to_string(),
                    "reason": "approval rolled back",
                }))?,
                Some(updated_workflow.id),
            )
            .await?;

        info!(approval_id = %approval_id, workflow_id = %approval.workflow_id, "approval decision rolled back");
        Ok(reset)
    }
}

fn requested_event_payload(approval: &Approval) -> JsonMap {
    let mut data = JsonMap::new();
    data.insert("approval_id".to_string(), serde_json::json!(approval.id));
    data.insert("workflow_id".to_string(), serde_json::json!(approval.workflow_id));
    data.insert("ui_schema".to_string(), serde_json::to_value(&approval.ui_schema).unwrap_or_default());
    data.insert("expires_at".to_string(), serde_json::json!(approval.expires_at));
    data.insert("callback_token".to_string(), serde_json::json!(approval.callback_token));
    data
}

fn received_event_payload(approval: &Approval, decision: ApprovalDecision, response_data: &JsonMap) -> JsonMap {
    let mut data = JsonMap::new();
    data.insert("approval_id".to_string(), serde_json::json!(approval.id));
    data.insert("workflow_id".to_string(), serde_json::json!(approval.workflow_id));
    data.insert(
        "decision".to_string(),
        serde_json::json!(match decision {
            ApprovalDecision::Approve => "approve",
            ApprovalDecision::Reject => "reject",
        }),
    );
    data.insert("response_data".to_string(), serde_json::json!(response_data));
    data
}
