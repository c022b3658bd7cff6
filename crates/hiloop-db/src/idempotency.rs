//! `idempotency_keys` — dedupes workflow-creation requests within a
//! configurable window (`idempotency_key_expiry_hours`, 24h by default).

use chrono::{DateTime, Duration, Utc};
use hiloop_core::{JsonMap, Result};

use crate::pool::PgPool;

pub const DEFAULT_IDEMPOTENCY_WINDOW_HOURS: i64 = 24;

#[derive(Clone)]
pub struct IdempotencyRepository {
    pool: PgPool,
    window_hours: i64,
}

impl IdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self::with_window_hours(pool, DEFAULT_IDEMPOTENCY_WINDOW_HOURS)
    }

    pub fn with_window_hours(pool: PgPool, window_hours: i64) -> Self {
        Self { pool, window_hours }
    }

    /// Returns the previously stored response if `key` was already used
    /// within the dedup window, without creating a new entry.
    pub async fn get(&self, key: &str) -> Result<Option<JsonMap>> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "SELECT response FROM idempotency_keys WHERE key = $1 AND expires_at > now()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(v,)| serde_json::from_value(v)).transpose().map_err(Into::into)
    }

    /// Records `response` under `key`. A conflicting concurrent insert for
    /// the same key is resolved by keeping whichever response landed first.
    pub async fn put(&self, key: &str, response: &JsonMap) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let expires_at = now + Duration::hours(self.window_hours);

        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, response, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(serde_json::to_value(response)?)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
