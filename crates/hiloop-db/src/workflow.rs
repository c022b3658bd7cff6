//! `workflows` and `workflow_steps` repositories.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use hiloop_core::{HiloopError, JsonMap, Result, StepStatus, StepType, Workflow, WorkflowState, WorkflowStep};
use uuid::Uuid;

use crate::pool::PgPool;

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: Uuid,
    workflow_type: String,
    state: String,
    context: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
    retry_count: i32,
    max_retries: i32,
    rollback_count: i32,
    max_rollbacks: i32,
    previous_state: Option<String>,
    rollback_reason: Option<String>,
}

impl WorkflowRow {
    fn into_domain(self) -> Result<Workflow> {
        let state = WorkflowState::from_str(&self.state)
            .map_err(HiloopError::validation)?;
        let previous_state = self
            .previous_state
            .map(|s| WorkflowState::from_str(&s).map_err(HiloopError::validation))
            .transpose()?;
        let context: JsonMap = serde_json::from_value(self.context)?;
        Ok(Workflow {
            id: self.id,
            workflow_type: self.workflow_type,
            state,
            context,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            rollback_count: self.rollback_count,
            max_rollbacks: self.max_rollbacks,
            previous_state,
            rollback_reason: self.rollback_reason,
        })
    }
}

#[derive(Clone)]
pub struct WorkflowRepository {
    pool: PgPool,
}

impl WorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Exposed so callers that must combine a transition with an event
    /// append (§4.1 step 5-6) can open their own transaction spanning both
    /// repositories.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create(&self, workflow: &Workflow) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            INSERT INTO workflows
                (id, workflow_type, state, context, created_at, updated_at, version,
                 retry_count, max_retries, rollback_count, max_rollbacks,
                 previous_state, rollback_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.workflow_type)
        .bind(workflow.state.to_string())
        .bind(serde_json::to_value(&workflow.context)?)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .bind(workflow.version)
        .bind(workflow.retry_count)
        .bind(workflow.max_retries)
        .bind(workflow.rollback_count)
        .bind(workflow.max_rollbacks)
        .bind(workflow.previous_state.map(|s| s.to_string()))
        .bind(&workflow.rollback_reason)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    pub async fn create_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        workflow: &Workflow,
    ) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            INSERT INTO workflows
                (id, workflow_type, state, context, created_at, updated_at, version,
                 retry_count, max_retries, rollback_count, max_rollbacks,
                 previous_state, rollback_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.workflow_type)
        .bind(workflow.state.to_string())
        .bind(serde_json::to_value(&workflow.context)?)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .bind(workflow.version)
        .bind(workflow.retry_count)
        .bind(workflow.max_retries)
        .bind(workflow.rollback_count)
        .bind(workflow.max_rollbacks)
        .bind(workflow.previous_state.map(|s| s.to_string()))
        .bind(&workflow.rollback_reason)
        .fetch_one(&mut **tx)
        .await?;

        row.into_domain()
    }

    pub async fn get(&self, id: Uuid) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(HiloopError::NotFound { resource: "workflow", id })?;

        row.into_domain()
    }

    /// Locks the row for the duration of the caller's transaction, so a
    /// concurrent approval response or timeout sweep serializes behind it.
    pub async fn lock_for_update(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
    ) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            "SELECT * FROM workflows WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(HiloopError::NotFound { resource: "workflow", id })?;

        row.into_domain()
    }

    pub async fn list(
        &self,
        state: Option<WorkflowState>,
        limit: i64,
    ) -> Result<Vec<Workflow>> {
        let rows = match state {
            Some(state) => {
                sqlx::query_as::<_, WorkflowRow>(
                    "SELECT * FROM workflows WHERE state = $1 ORDER BY created_at DESC LIMIT $2",
                )
                .bind(state.to_string())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, WorkflowRow>(
                    "SELECT * FROM workflows ORDER BY created_at DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(WorkflowRow::into_domain).collect()
    }

    /// Optimistic-concurrency state transition: the `WHERE version = $expected`
    /// clause makes a stale caller lose the race instead of clobbering a
    /// newer write. Zero rows affected means someone else moved first.
    pub async fn transition_to(
        &self,
        id: Uuid,
        expected_version: i64,
        new_state: WorkflowState,
        context: Option<JsonMap>,
    ) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            UPDATE workflows
            SET state = $1,
                previous_state = state,
                context = COALESCE($2, context),
                updated_at = now(),
                version = version + 1
            WHERE id = $3 AND version = $4
            RETURNING *
            "#,
        )
        .bind(new_state.to_string())
        .bind(context.map(|c| serde_json::to_value(c)).transpose()?)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HiloopError::ConcurrentModification { resource: "workflow", id })?;

        row.into_domain()
    }

    /// Same contract as [`Self::transition_to`] but runs inside the caller's
    /// transaction, so the state change and its `workflow_events` row commit
    /// atomically (spec §4.1 step 5-6: event append happens before commit,
    /// publish happens after).
    pub async fn transition_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        expected_version: i64,
        new_state: WorkflowState,
        context: Option<JsonMap>,
    ) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            UPDATE workflows
            SET state = $1,
                previous_state = state,
                context = COALESCE($2, context),
                updated_at = now(),
                version = version + 1
            WHERE id = $3 AND version = $4
            RETURNING *
            "#,
        )
        .bind(new_state.to_string())
        .bind(context.map(|c| serde_json::to_value(c)).transpose()?)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(HiloopError::ConcurrentModification { resource: "workflow", id })?;

        row.into_domain()
    }

    pub async fn increment_retry_count(&self, id: Uuid) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            UPDATE workflows
            SET retry_count = retry_count + 1, updated_at = now(), version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HiloopError::NotFound { resource: "workflow", id })?;

        row.into_domain()
    }

    /// Combines the retry-count bump with the `state = RUNNING` transition
    /// inside one statement, so `retry_workflow` only needs a single
    /// optimistic-version round trip instead of two.
    pub async fn transition_with_retry_increment_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        expected_version: i64,
        new_state: WorkflowState,
    ) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            UPDATE workflows
            SET state = $1,
                previous_state = state,
                retry_count = retry_count + 1,
                updated_at = now(),
                version = version + 1
            WHERE id = $2 AND version = $3
            RETURNING *
            "#,
        )
        .bind(new_state.to_string())
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(HiloopError::ConcurrentModification { resource: "workflow", id })?;

        row.into_domain()
    }

    /// Combines the rollback bookkeeping (previous_state captured by the
    /// trigger-free `SET previous_state = state`, rollback_count, reason)
    /// with the state transition in one statement (spec §4.3 explicit
    /// rollback API).
    pub async fn transition_with_rollback_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        expected_version: i64,
        new_state: WorkflowState,
        reason: &str,
    ) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            UPDATE workflows
            SET state = $1,
                previous_state = state,
                rollback_count = rollback_count + 1,
                rollback_reason = $2,
                updated_at = now(),
                version = version + 1
            WHERE id = $3 AND version = $4
            RETURNING *
            "#,
        )
        .bind(new_state.to_string())
        .bind(reason)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(HiloopError::ConcurrentModification { resource: "workflow", id })?;

        row.into_domain()
    }

    pub async fn record_rollback(&self, id: Uuid, reason: &str) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            UPDATE workflows
            SET rollback_count = rollback_count + 1,
                rollback_reason = $2,
                updated_at = now(),
                version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HiloopError::NotFound { resource: "workflow", id })?;

        row.into_domain()
    }

}

#[derive(sqlx::FromRow)]
struct WorkflowStepRow {
    id: Uuid,
    workflow_id: Uuid,
    step_order: i32,
    step_type: String,
    status: String,
    task_handler: Option<String>,
    task_input: Option<serde_json::Value>,
    task_output: Option<serde_json::Value>,
    approval_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStepRow {
    fn into_domain(self) -> Result<WorkflowStep> {
        Ok(WorkflowStep {
            id: self.id,
            workflow_id: self.workflow_id,
            step_order: self.step_order,
            step_type: StepType::from_str(&self.step_type).map_err(HiloopError::validation)?,
            status: StepStatus::from_str(&self.status).map_err(HiloopError::validation)?,
            task_handler: self.task_handler,
            task_input: self.task_input.map(serde_json::from_value).transpose()?,
            task_output: self.task_output.map(serde_json::from_value).transpose()?,
            approval_id: self.approval_id,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Clone)]
pub struct WorkflowStepRepository {
    pool: PgPool,
}

impl WorkflowStepRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create(&self, step: &WorkflowStep) -> Result<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            r#"
            INSERT INTO workflow_steps
                (id, workflow_id, step_order, step_type, status, task_handler,
                 task_input, task_output, approval_id, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(step.id)
        .bind(step.workflow_id)
        .bind(step.step_order)
        .bind(step.step_type.to_string())
        .bind(step.status.to_string())
        .bind(&step.task_handler)
        .bind(step.task_input.as_ref().map(serde_json::to_value).transpose()?)
        .bind(step.task_output.as_ref().map(serde_json::to_value).transpose()?)
        .bind(step.approval_id)
        .bind(step.started_at)
        .bind(step.completed_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    pub async fn create_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        step: &WorkflowStep,
    ) -> Result<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            r#"
            INSERT INTO workflow_steps
                (id, workflow_id, step_order, step_type, status, task_handler,
                 task_input, task_output, approval_id, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(step.id)
        .bind(step.workflow_id)
        .bind(step.step_order)
        .bind(step.step_type.to_string())
        .bind(step.status.to_string())
        .bind(&step.task_handler)
        .bind(step.task_input.as_ref().map(serde_json::to_value).transpose()?)
        .bind(step.task_output.as_ref().map(serde_json::to_value).transpose()?)
        .bind(step.approval_id)
        .bind(step.started_at)
        .bind(step.completed_at)
        .fetch_one(&mut **tx)
        .await?;

        row.into_domain()
    }

    pub async fn list_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>> {
        let rows = sqlx::query_as::<_, WorkflowStepRow>(
            "SELECT * FROM workflow_steps WHERE workflow_id = $1 ORDER BY step_order ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkflowStepRow::into_domain).collect()
    }

    /// The next step that hasn't run yet, in execution order.
    pub async fn next_pending(&self, workflow_id: Uuid) -> Result<Option<WorkflowStep>> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            r#"
            SELECT * FROM workflow_steps
            WHERE workflow_id = $1 AND status = 'pending'
            ORDER BY step_order ASC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowStepRow::into_domain).transpose()
    }

    pub async fn mark_running(&self, id: Uuid) -> Result<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            r#"
            UPDATE workflow_steps
            SET status = 'running', started_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HiloopError::NotFound { resource: "workflow_step", id })?;

        row.into_domain()
    }

    pub async fn mark_completed(&self, id: Uuid, output: Option<JsonMap>) -> Result<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            r#"
            UPDATE workflow_steps
            SET status = 'completed', task_output = $2, completed_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(output.map(|o| serde_json::to_value(o)).transpose()?)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HiloopError::NotFound { resource: "workflow_step", id })?;

        row.into_domain()
    }

    pub async fn mark_failed(&self, id: Uuid, output: Option<JsonMap>) -> Result<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            r#"
            UPDATE workflow_steps
            SET status = 'failed', task_output = $2, completed_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(output.map(|o| serde_json::to_value(o)).transpose()?)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HiloopError::NotFound { resource: "workflow_step", id })?;

        row.into_domain()
    }

    pub async fn get(&self, id: Uuid) -> Result<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStepRow>("SELECT * FROM workflow_steps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(HiloopError::NotFound { resource: "workflow_step", id })?;

        row.into_domain()
    }

    pub async fn find_by_approval_id(&self, approval_id: Uuid) -> Result<Option<WorkflowStep>> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            "SELECT * FROM workflow_steps WHERE approval_id = $1",
        )
        .bind(approval_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowStepRow::into_domain).transpose()
    }

    /// Locks the step row before the approval-creation idempotency check
    /// (spec §4.2, §5 shared-resource policy), eliminating double-creation
    /// under concurrent drivers of the same workflow.
    pub async fn lock_for_update(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
    ) -> Result<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            "SELECT * FROM workflow_steps WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(HiloopError::NotFound { resource: "workflow_step", id })?;

        row.into_domain()
    }

    pub async fn attach_approval_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        approval_id: Uuid,
    ) -> Result<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            "UPDATE workflow_steps SET approval_id = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(approval_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(HiloopError::NotFound { resource: "workflow_step", id })?;

        row.into_domain()
    }

    /// The smallest-ordered step whose status is `failed` or `running`
    /// (running is a safety net for a step interrupted mid-flight, spec
    /// §4.4) — the resume point for `retry_workflow`.
    pub async fn first_failed_or_running(&self, workflow_id: Uuid) -> Result<Option<WorkflowStep>> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            r#"
            SELECT * FROM workflow_steps
            WHERE workflow_id = $1 AND status IN ('failed', 'running')
            ORDER BY step_order ASC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowStepRow::into_domain).transpose()
    }

    /// Completed `task` steps strictly below `step_order`, in descending
    /// order — the compensation walk for a rejected approval (spec §4.3).
    pub async fn completed_task_steps_below(
        &self,
        workflow_id: Uuid,
        step_order: i32,
    ) -> Result<Vec<WorkflowStep>> {
        let rows = sqlx::query_as::<_, WorkflowStepRow>(
            r#"
            SELECT * FROM workflow_steps
            WHERE workflow_id = $1
              AND step_order < $2
              AND step_type = 'task'
              AND status = 'completed'
            ORDER BY step_order DESC
            "#,
        )
        .bind(workflow_id)
        .bind(step_order)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkflowStepRow::into_domain).collect()
    }

    /// Resets a step and every later step back to `pending`, clearing
    /// output, approval linkage, and timestamps — `retry_workflow`'s
    /// multi-step resume path (spec §4.4).
    pub async fn reset_from_order(&self, workflow_id: Uuid, from_order: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = 'pending',
                task_output = NULL,
                approval_id = NULL,
                started_at = NULL,
                completed_at = NULL
            WHERE workflow_id = $1 AND step_order >= $2
            "#,
        )
        .bind(workflow_id)
        .bind(from_order)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Marks every `running` step as `failed` with an interruption marker
    /// (spec §4.4 `mark_failed` step 2) so a subsequent retry finds the
    /// failure point via [`Self::first_failed_or_running`].
    pub async fn fail_running_steps(&self, workflow_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = 'failed',
                task_output = $2,
                completed_at = now()
            WHERE workflow_id = $1 AND status = 'running'
            "#,
        )
        .bind(workflow_id)
        .bind(serde_json::json!({"error": "interrupted", "interrupted": true}))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Resets a single step (and clears its approval linkage) back to
    /// `running` — used by `rollback_approval` to reopen the approval step
    /// it is undoing the decision for (spec §4.5).
    pub async fn reset_single_to_running(&self, id: Uuid) -> Result<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            r#"
            UPDATE workflow_steps
            SET status = 'running', task_output = NULL, completed_at = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HiloopError::NotFound { resource: "workflow_step", id })?;

        row.into_domain()
    }

    pub async fn attach_approval(&self, id: Uuid, approval_id: Uuid) -> Result<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStepRow>(
            "UPDATE workflow_steps SET approval_id = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(approval_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HiloopError::NotFound { resource: "workflow_step", id })?;

        row.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_row_round_trips_state_and_context() {
        let row = WorkflowRow {
            id: Uuid::nil(),
            workflow_type: "deploy".into(),
            state: "WAITING_APPROVAL".into(),
            context: serde_json::json!({"env": "prod"}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 3,
            retry_count: 0,
            max_retries: 3,
            rollback_count: 0,
            max_rollbacks: 3,
            previous_state: Some("RUNNING".into()),
            rollback_reason: None,
        };
        let workflow = row.into_domain().unwrap();
        assert_eq!(workflow.state, WorkflowState::WaitingApproval);
        assert_eq!(workflow.previous_state, Some(WorkflowState::Running));
        assert_eq!(workflow.context.get("env").unwrap(), "prod");
    }

    #[test]
    fn workflow_row_rejects_unknown_state() {
        let row = WorkflowRow {
            id: Uuid::nil(),
            workflow_type: "deploy".into(),
            state: "BOGUS".into(),
            context: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 0,
            retry_count: 0,
            max_retries: 3,
            rollback_count: 0,
            max_rollbacks: 3,
            previous_state: None,
            rollback_reason: None,
        };
        assert!(row.into_domain().is_err());
    }
}
