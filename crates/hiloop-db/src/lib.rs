//! Postgres persistence layer for the hiloop orchestrator.
//!
//! Each repository follows the row-struct pattern: a `#[derive(sqlx::FromRow)]`
//! row type mirrors the table's native Postgres column types, with a fallible
//! `into_domain()`/`into_*()` conversion into the shared `hiloop_core::types`
//! structs that the rest of the workspace works with.

pub mod approval;
pub mod conversation;
pub mod dlq;
pub mod event;
pub mod idempotency;
pub mod pool;
pub mod workflow;

pub use pool::{connect, default_database_url, PgPool};

pub use approval::ApprovalRepository;
pub use conversation::ConversationRepository;
pub use dlq::DlqRepository;
pub use event::EventRepository;
pub use idempotency::IdempotencyRepository;
pub use workflow::{WorkflowRepository, WorkflowStepRepository};
