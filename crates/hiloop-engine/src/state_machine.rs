//! The workflow legal-transition graph and the `transition_to` contract
//! (spec §4.1).
//!
//! `transition_to` is the only way any other module in this crate moves a
//! workflow's `state` column. It enforces the legality check, the
//! optimistic-version conditional update, the append-before-commit event,
//! and hands the caller a committed [`Workflow`] to publish from — the bus
//! publish itself happens outside this function, after the transaction
//! commits, per the commit-before-publish rationale in spec §4.1.

use hiloop_core::{EventType, HiloopError, JsonMap, Result, Workflow, WorkflowState};
use hiloop_db::{EventRepository, WorkflowRepository};
use tracing::info;
use uuid::Uuid;

/// Runs the transition inside a fresh transaction: validates the move
/// against [`WorkflowState::legal_targets`], issues the version-checked
/// `UPDATE`, appends a `workflow.state_changed` event carrying `reason` and
/// the new version, then commits. Returns the committed workflow; the
/// caller publishes it to the bus afterward.
pub async fn transition_to(
    workflows: &WorkflowRepository,
    events: &EventRepository,
    current: &Workflow,
    new_state: WorkflowState,
    reason: &str,
    context: Option<JsonMap>,
) -> Result<Workflow> {
    if !current.state.can_transition_to(new_state) {
        return Err(HiloopError::invalid_transition(format!(
            "{} -> {new_state} is not a legal transition for workflow {}",
            current.state, current.id
        )));
    }

    let mut tx = workflows.pool().begin().await?;

    let updated = workflows
        .transition_in_tx(&mut tx, current.id, current.version, new_state, context)
        .await?;

    let mut event_data = JsonMap::new();
    event_data.insert("reason".to_string(), serde_json::json!(reason));
    event_data.insert("from_state".to_string(), serde_json::json!(current.state.to_string()));
    event_data.insert("to_state".to_string(), serde_json::json!(new_state.to_string()));
    event_data.insert("version".to_string(), serde_json::json!(updated.version));

    events
        .append_in_tx(&mut tx, current.id, &EventType::from(EventType::WORKFLOW_STATE_CHANGED), event_data)
        .await?;

    tx.commit().await?;

    info!(
        workflow_id = %current.id,
        from = %current.state,
        to = %new_state,
        version = updated.version,
        reason,
        "workflow state transition committed"
    );

    Ok(updated)
}

/// Same contract as [`transition_to`] but atomically bumps `retry_count`
/// alongside the state change — `retry_workflow`'s single round trip
/// (spec §4.4).
pub async fn transition_with_retry_increment(
    workflows: &WorkflowRepository,
    events: &EventRepository,
    current: &Workflow,
    new_state: WorkflowState,
    reason: &str,
) -> Result<Workflow> {
    if !current.state.can_transition_to(new_state) {
        return Err(HiloopError::invalid_transition(format!(
            "{} -> {new_state} is not a legal transition for workflow {}",
            current.state, current.id
        )));
    }

    let mut tx = workflows.pool().begin().await?;

    let updated = workflows
        .transition_with_retry_increment_in_tx(&mut tx, current.id, current.version, new_state)
        .await?;

    let mut event_data = JsonMap::new();
    event_data.insert("reason".to_string(), serde_json::json!(reason));
    event_data.insert("from_state".to_string(), serde_json::json!(current.state.to_string()));
    event_data.insert("to_state".to_string(), serde_json::json!(new_state.to_string()));
    event_data.insert("version".to_string(), serde_json::json!(updated.version));
    event_data.insert("retry_count".to_string(), serde_json::json!(updated.retry_count));

    events
        .append_in_tx(&mut tx, current.id, &EventType::from(EventType::WORKFLOW_STATE_CHANGED), event_data)
        .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Same contract as [`transition_to`] but atomically records the rollback
/// audit columns (`rollback_count`, `rollback_reason`) alongside the state
/// change — `rollback_workflow`'s explicit API (spec §4.3).
pub async fn transition_with_rollback(
    workflows: &WorkflowRepository,
    events: &EventRepository,
    current: &Workflow,
    new_state: WorkflowState,
    reason: &str,
    actor: &str,
) -> Result<Workflow> {
    if !current.state.can_transition_to(new_state) {
        return Err(HiloopError::invalid_transition(format!(
            "{} -> {new_state} is not a legal transition for workflow {}",
            current.state, current.id
        )));
    }

    let mut tx = workflows.pool().begin().await?;

    let updated = workflows
        .transition_with_rollback_in_tx(&mut tx, current.id, current.version, new_state, reason)
        .await?;

    let event_data = serde_json::json!({
        "reason": reason,
        "actor": actor,
        "from_state": current.state.to_string(),
        "to_state": new_state.to_string(),
        "version": updated.version,
        "rollback_count": updated.rollback_count,
    });
    let event_data: JsonMap = serde_json::from_value(event_data)?;

    events
        .append_in_tx(&mut tx, current.id, &EventType::from(EventType::WORKFLOW_ROLLED_BACK), event_data)
        .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Convenience id-based entry point for call sites that have not already
/// loaded the current workflow row.
pub async fn transition_by_id(
    workflows: &WorkflowRepository,
    events: &EventRepository,
    workflow_id: Uuid,
    new_state: WorkflowState,
    reason: &str,
) -> Result<Workflow> {
    let current = workflows.get(workflow_id).await?;
    transition_to(workflows, events, &current, new_state, reason, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_is_rejected_before_any_db_call() {
        // Pure legality check — exercised without a database by constructing
        // the rejection path's precondition directly, since
        // `WorkflowState::can_transition_to` is what `transition_to` guards on.
        assert!(!WorkflowState::Completed.can_transition_to(WorkflowState::Running));
        assert!(WorkflowState::Failed.can_transition_to(WorkflowState::Running));
    }
}
