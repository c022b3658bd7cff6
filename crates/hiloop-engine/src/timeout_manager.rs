//! Background sweep for expired approvals (spec §4.7).
//!
//! Runs on a fixed interval rather than per-approval timers: at this scale a
//! periodic `SELECT ... WHERE expires_at <= now()` is simpler and cheaper
//! than registering a timer per pending approval, and it self-heals after a
//! restart since the sweep just re-queries expired rows rather than
//! depending on in-memory timer state.

use std::time::Duration;

use hiloop_core::{Result, WorkflowState};
use hiloop_db::ApprovalRepository;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::approval_service::ApprovalService;
use crate::engine::WorkflowEngine;
use crate::state_machine;

const SWEEP_BATCH_SIZE: i64 = 100;

pub struct TimeoutManager {
    approvals_repo: ApprovalRepository,
    approval_service: ApprovalService,
    engine: WorkflowEngine,
    check_interval: Duration,
}

impl TimeoutManager {
    pub fn new(
        approvals_repo: ApprovalRepository,
        approval_service: ApprovalService,
        engine: WorkflowEngine,
        check_interval: Duration,
    ) -> Self {
        Self { approvals_repo, approval_service, engine, check_interval }
    }

    /// Runs until `shutdown` fires. A failed sweep iteration is logged and
    /// the loop keeps going on the next tick — one bad iteration (a
    /// transient DB error) must not stop the sweeper permanently.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.check_interval.as_secs(), "timeout manager starting");
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_and_process_timeouts().await {
                        error!(error = %e, "timeout sweep iteration failed");
                    }
                }
            }
        }

        info!("timeout manager stopped");
    }

    async fn check_and_process_timeouts(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let expired = self.approvals_repo.find_expired_pending(now, SWEEP_BATCH_SIZE).await?;

        if expired.is_empty() {
            return Ok(());
        }

        info!(count = expired.len(), "processing_expired_approvals");

        for approval in expired {
            if let Err(e) = self.process_one(approval.id, approval.workflow_id).await {
                error!(approval_id = %approval.id, workflow_id = %approval.workflow_id, error = %e, "failed to process expired approval");
            }
        }

        Ok(())
    }

    /// Each approval is handled independently so one failure doesn't stop
    /// the sweep from processing the rest of the batch.
    async fn process_one(&self, approval_id: uuid::Uuid, workflow_id: uuid::Uuid) -> Result<()> {
        let Some(_) = self.approval_service.mark_timeout(approval_id).await? else {
            // Already responded to or already timed out by a racing sweep/callback.
            return Ok(());
        };

        // Transition the workflow to TIMEOUT before calling retry_workflow,
        // which requires the workflow to already be in TIMEOUT or FAILED.
        // `ApprovalTimeoutHandler` (subscribed to the `approval.timeout`
        // event `mark_timeout` just published) performs the same transition
        // and is a no-op if it runs after this one already landed.
        let workflow = self.engine.workflows().get(workflow_id).await?;
        if !workflow.state.is_terminal() && workflow.state != WorkflowState::Timeout {
            state_machine::transition_to(
                self.engine.workflows(),
                self.engine.events_repo(),
                &workflow,
                WorkflowState::Timeout,
                &format!("Approval {approval_id} timed out - no response received"),
                None,
            )
            .await?;
        }

        match self.engine.retry_workflow(workflow_id).await? {
            Some(updated) => {
                info!(%workflow_id, retry_count = updated.retry_count, "workflow_retried_after_timeout");
            }
            None => {
                // retry_workflow already moved the workflow to FAILED and
                // wrote the dead-letter entry when retries were exhausted;
                // nothing further to persist here.
                warn!(%workflow_id, "retry_after_timeout_did_not_resume_workflow");
            }
        }

        Ok(())
    }
}
