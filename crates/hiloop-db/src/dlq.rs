//! `dead_letter_queue` — events the bus gave up retrying (spec §4.6).

use chrono::{DateTime, Utc};
use hiloop_core::{DeadLetter, HiloopError, JsonMap, Result};
use uuid::Uuid;

use crate::pool::PgPool;

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: i64,
    original_event_type: String,
    event_data: serde_json::Value,
    error_message: String,
    retry_count: i32,
    workflow_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl DeadLetterRow {
    fn into_domain(self) -> Result<DeadLetter> {
        Ok(DeadLetter {
            id: self.id,
            original_event_type: self.original_event_type,
            event_data: serde_json::from_value(self.event_data)?,
            error_message: self.error_message,
            retry_count: self.retry_count,
            workflow_id: self.workflow_id,
            created_at: self.created_at,
        })
    }
}

#[derive(Clone)]
pub struct DlqRepository {
    pool: PgPool,
}

impl DlqRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        original_event_type: &str,
        event_data: &JsonMap,
        error_message: &str,
        retry_count: i32,
        workflow_id: Option<Uuid>,
    ) -> Result<DeadLetter> {
        let row = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            INSERT INTO dead_letter_queue
                (original_event_type, event_data, error_message, retry_count, workflow_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(original_event_type)
        .bind(serde_json::to_value(event_data)?)
        .bind(error_message)
        .bind(retry_count)
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            "SELECT * FROM dead_letter_queue ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeadLetterRow::into_domain).collect()
    }

    pub async fn get(&self, id: i64) -> Result<DeadLetter> {
        let row = sqlx::query_as::<_, DeadLetterRow>("SELECT * FROM dead_letter_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(HiloopError::Internal(format!("dead letter {id} not found")))?;

        row.into_domain()
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM dead_letter_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dead_letter_queue").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
