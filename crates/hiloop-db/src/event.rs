//! `workflow_events` append-only log.

use chrono::{DateTime, Utc};
use hiloop_core::{EventType, HiloopError, JsonMap, Result, WorkflowEvent};
use uuid::Uuid;

use crate::pool::PgPool;

#[derive(sqlx::FromRow)]
struct WorkflowEventRow {
    id: Uuid,
    workflow_id: Uuid,
    event_type: String,
    event_data: serde_json::Value,
    occurred_at: DateTime<Utc>,
    sequence_number: i64,
}

impl WorkflowEventRow {
    fn into_domain(self) -> Result<WorkflowEvent> {
        Ok(WorkflowEvent {
            id: self.id,
            workflow_id: self.workflow_id,
            event_type: EventType::from(self.event_type.as_str()),
            event_data: serde_json::from_value(self.event_data)?,
            occurred_at: self.occurred_at,
            sequence_number: self.sequence_number,
        })
    }
}

#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends an event inside the caller's transaction, allocating the next
    /// `sequence_number` for the workflow atomically. Callers must commit the
    /// surrounding transaction (which also carries the state change) before
    /// publishing the event to the bus, per the commit-before-publish rule.
    pub async fn append_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        workflow_id: Uuid,
        event_type: &EventType,
        event_data: JsonMap,
    ) -> Result<WorkflowEvent> {
        let row = sqlx::query_as::<_, WorkflowEventRow>(
            r#"
            INSERT INTO workflow_events (id, workflow_id, event_type, event_data, sequence_number)
            VALUES (
                $1, $2, $3, $4,
                COALESCE((SELECT MAX(sequence_number) FROM workflow_events WHERE workflow_id = $2), 0) + 1
            )
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(workflow_id)
        .bind(event_type.as_str())
        .bind(serde_json::to_value(event_data)?)
        .fetch_one(&mut **tx)
        .await?;

        row.into_domain()
    }

    pub async fn list_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<WorkflowEvent>> {
        let rows = sqlx::query_as::<_, WorkflowEventRow>(
            "SELECT * FROM workflow_events WHERE workflow_id = $1 ORDER BY sequence_number ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkflowEventRow::into_domain).collect()
    }

    pub async fn get(&self, id: Uuid) -> Result<WorkflowEvent> {
        let row = sqlx::query_as::<_, WorkflowEventRow>("SELECT * FROM workflow_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(HiloopError::NotFound { resource: "workflow_event", id })?;

        row.into_domain()
    }
}
