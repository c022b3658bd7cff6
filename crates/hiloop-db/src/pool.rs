//! Connection pool setup and migration runner.
//!
//! A single `PgPool` is enough here, unlike the split reader/writer pools a
//! SQLite-backed store needs: Postgres gives every connection true row-level
//! locking, so the `SELECT ... FOR UPDATE` discipline in §4.5/§4.7 works
//! without a dedicated single-writer connection.

use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::Pool;

pub type PgPool = Pool<Postgres>;

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Falls back to a local development database when `DATABASE_URL` is unset,
/// matching the teacher's `default_database_url` convenience for local runs.
pub fn default_database_url() -> String {
    std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/hiloop".to_string())
}
