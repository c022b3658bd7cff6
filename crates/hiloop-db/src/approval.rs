//! `approval_requests` repository.

use std::str::FromStr;

use hiloop_core::{Approval, ApprovalStatus, ApprovalUiSchema, HiloopError, JsonMap, Result};
use uuid::Uuid;

use crate::pool::PgPool;

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    id: Uuid,
    workflow_id: Uuid,
    status: String,
    ui_schema: serde_json::Value,
    response_data: Option<serde_json::Value>,
    requested_at: i64,
    responded_at: Option<i64>,
    expires_at: i64,
    callback_token: String,
    external_message_ref: Option<String>,
}

impl ApprovalRow {
    fn into_domain(self) -> Result<Approval> {
        Ok(Approval {
            id: self.id,
            workflow_id: self.workflow_id,
            status: ApprovalStatus::from_str(&self.status).map_err(HiloopError::validation)?,
            ui_schema: serde_json::from_value::<ApprovalUiSchema>(self.ui_schema)?,
            response_data: self.response_data.map(serde_json::from_value).transpose()?,
            requested_at: self.requested_at,
            responded_at: self.responded_at,
            expires_at: self.expires_at,
            callback_token: self.callback_token,
            external_message_ref: self.external_message_ref,
        })
    }
}

#[derive(Clone)]
pub struct ApprovalRepository {
    pool: PgPool,
}

impl ApprovalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, approval: &Approval) -> Result<Approval> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            r#"
            INSERT INTO approval_requests
                (id, workflow_id, status, ui_schema, response_data, requested_at,
                 responded_at, expires_at, callback_token, external_message_ref)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(approval.id)
        .bind(approval.workflow_id)
        .bind(approval.status.to_string())
        .bind(serde_json::to_value(&approval.ui_schema)?)
        .bind(approval.response_data.as_ref().map(serde_json::to_value).transpose()?)
        .bind(approval.requested_at)
        .bind(approval.responded_at)
        .bind(approval.expires_at)
        .bind(&approval.callback_token)
        .bind(&approval.external_message_ref)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    pub async fn create_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        approval: &Approval,
    ) -> Result<Approval> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            r#"
            INSERT INTO approval_requests
                (id, workflow_id, status, ui_schema, response_data, requested_at,
                 responded_at, expires_at, callback_token, external_message_ref)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(approval.id)
        .bind(approval.workflow_id)
        .bind(approval.status.to_string())
        .bind(serde_json::to_value(&approval.ui_schema)?)
        .bind(approval.response_data.as_ref().map(serde_json::to_value).transpose()?)
        .bind(approval.requested_at)
        .bind(approval.responded_at)
        .bind(approval.expires_at)
        .bind(&approval.callback_token)
        .bind(&approval.external_message_ref)
        .fetch_one(&mut **tx)
        .await?;

        row.into_domain()
    }

    pub async fn get(&self, id: Uuid) -> Result<Approval> {
        let row = sqlx::query_as::<_, ApprovalRow>("SELECT * FROM approval_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(HiloopError::NotFound { resource: "approval", id })?;

        row.into_domain()
    }

    pub async fn get_by_callback_token(&self, token: &str) -> Result<Approval> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            "SELECT * FROM approval_requests WHERE callback_token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HiloopError::validation("unknown callback token"))?;

        row.into_domain()
    }

    /// Locks the approval row for the duration of the caller's transaction.
    /// Serializes a callback response against a concurrent timeout sweep for
    /// the same approval, per spec §4.7.
    pub async fn lock_for_update(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
    ) -> Result<Approval> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            "SELECT * FROM approval_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(HiloopError::NotFound { resource: "approval", id })?;

        row.into_domain()
    }

    /// Responds to a pending approval within `tx`. Only updates rows still in
    /// `PENDING` status, so a racing responder (a button click racing a
    /// timeout sweep) finds zero rows and surfaces `AlreadyProcessed`.
    pub async fn respond_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        status: ApprovalStatus,
        response_data: Option<JsonMap>,
        responded_at: i64,
    ) -> Result<Approval> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            r#"
            UPDATE approval_requests
            SET status = $2, response_data = $3, responded_at = $4
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(response_data.map(|d| serde_json::to_value(d)).transpose()?)
        .bind(responded_at)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| HiloopError::AlreadyProcessed { id, status: "non-pending".to_string() })?;

        row.into_domain()
    }

    pub async fn list_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<Approval>> {
        let rows = sqlx::query_as::<_, ApprovalRow>(
            "SELECT * FROM approval_requests WHERE workflow_id = $1 ORDER BY requested_at ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ApprovalRow::into_domain).collect()
    }

    /// Cancels every still-`PENDING` approval for a workflow — orphans left
    /// behind by a previous attempt once `retry_workflow`/`mark_failed`
    /// start a fresh one (spec §4.4).
    pub async fn cancel_pending_for_workflow(&self, workflow_id: Uuid, now: i64) -> Result<Vec<Approval>> {
        let rows = sqlx::query_as::<_, ApprovalRow>(
            r#"
            UPDATE approval_requests
            SET status = 'CANCELLED', responded_at = $2
            WHERE workflow_id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(workflow_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ApprovalRow::into_domain).collect()
    }

    /// Resets a rejected, non-expired approval back to `PENDING` with its
    /// response cleared (spec §4.5 `rollback_approval`).
    pub async fn reset_to_pending_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        requested_at: i64,
        expires_at: i64,
    ) -> Result<Approval> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            r#"
            UPDATE approval_requests
            SET status = 'PENDING',
                response_data = NULL,
                responded_at = NULL,
                requested_at = $2,
                expires_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(requested_at)
        .bind(expires_at)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(HiloopError::NotFound { resource: "approval", id })?;

        row.into_domain()
    }

    /// Exposed so `ApprovalService` can open a transaction spanning this
    /// repository and `WorkflowStepRepository`/`EventRepository`.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn find_expired_pending(&self, now: i64, limit: i64) -> Result<Vec<Approval>> {
        let rows = sqlx::query_as::<_, ApprovalRow>(
            r#"
            SELECT * FROM approval_requests
            WHERE status = 'PENDING' AND expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ApprovalRow::into_domain).collect()
    }

    /// Transitions a single approval PENDING -> TIMEOUT inside the caller's
    /// transaction (the caller is expected to already hold the row lock via
    /// [`Self::lock_for_update`] on the same transaction). Returns `None` if
    /// the row was no longer pending (race with a user response) — spec
    /// §4.7 requires this to be a silent no-op, not an error.
    pub async fn mark_timeout_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        now: i64,
    ) -> Result<Option<Approval>> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            r#"
            UPDATE approval_requests
            SET status = 'TIMEOUT', responded_at = $2
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(ApprovalRow::into_domain).transpose()
    }

    pub async fn attach_message_ref(&self, id: Uuid, message_ref: &str) -> Result<Approval> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            "UPDATE approval_requests SET external_message_ref = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(message_ref)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HiloopError::NotFound { resource: "approval", id })?;

        row.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_row_parses_ui_schema() {
        let row = ApprovalRow {
            id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            status: "PENDING".into(),
            ui_schema: serde_json::json!({
                "fields": [],
                "buttons": [{"label": "Approve", "value": "approve", "style": "primary"}]
            }),
            response_data: None,
            requested_at: 1_700_000_000,
            responded_at: None,
            expires_at: 1_700_003_600,
            callback_token: "tok".into(),
            external_message_ref: None,
        };
        let approval = row.into_domain().unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert!(approval.ui_schema.completes_on_button_click());
    }
}
