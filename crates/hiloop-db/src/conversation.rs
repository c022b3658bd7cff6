//! `conversation_history` — chat-adapter audit trail, owned by `hiloop-webhook`.

use chrono::{DateTime, Utc};
use hiloop_core::{ConversationRecord, Result};
use uuid::Uuid;

use crate::pool::PgPool;

#[derive(sqlx::FromRow)]
struct ConversationRow {
    conversation_id: String,
    user_id: String,
    channel: String,
    messages: serde_json::Value,
    workflow_id: Option<Uuid>,
    approval_id: Option<Uuid>,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationRow {
    fn into_domain(self) -> Result<ConversationRecord> {
        Ok(ConversationRecord {
            conversation_id: self.conversation_id,
            user_id: self.user_id,
            channel: self.channel,
            messages: serde_json::from_value(self.messages)?,
            workflow_id: self.workflow_id,
            approval_id: self.approval_id,
            state: self.state,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, record: &ConversationRecord) -> Result<ConversationRecord> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            INSERT INTO conversation_history
                (conversation_id, user_id, channel, messages, workflow_id, approval_id, state, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            ON CONFLICT (conversation_id) DO UPDATE SET
                messages = EXCLUDED.messages,
                workflow_id = EXCLUDED.workflow_id,
                approval_id = EXCLUDED.approval_id,
                state = EXCLUDED.state,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(&record.conversation_id)
        .bind(&record.user_id)
        .bind(&record.channel)
        .bind(serde_json::to_value(&record.messages)?)
        .bind(record.workflow_id)
        .bind(record.approval_id)
        .bind(&record.state)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT * FROM conversation_history WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConversationRow::into_domain).transpose()
    }

    pub async fn get_by_approval(&self, approval_id: Uuid) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT * FROM conversation_history WHERE approval_id = $1",
        )
        .bind(approval_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConversationRow::into_domain).transpose()
    }
}
