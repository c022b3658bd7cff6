//! Repository-layer integration tests run against a real Postgres instance
//! provisioned per-test by `sqlx::test` (migrations applied automatically
//! from `hiloop-db/migrations`).

use chrono::Utc;
use hiloop_core::{JsonMap, Workflow, WorkflowState};
use hiloop_db::WorkflowRepository;
use sqlx::PgPool;
use uuid::Uuid;

fn new_workflow() -> Workflow {
    let now = Utc::now();
    Workflow {
        id: Uuid::new_v4(),
        workflow_type: "deploy".to_string(),
        state: WorkflowState::Created,
        context: JsonMap::new(),
        created_at: now,
        updated_at: now,
        version: 1,
        retry_count: 0,
        max_retries: 3,
        rollback_count: 0,
        max_rollbacks: 1,
        previous_state: None,
        rollback_reason: None,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn create_then_get_round_trips_a_workflow(pool: PgPool) -> sqlx::Result<()> {
    let repo = WorkflowRepository::new(pool);
    let workflow = new_workflow();

    let created = repo.create(&workflow).await.expect("insert should succeed");
    assert_eq!(created.id, workflow.id);
    assert_eq!(created.version, 1);

    let fetched = repo.get(workflow.id).await.expect("row should be readable back");
    assert_eq!(fetched.state, WorkflowState::Created);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn transition_to_bumps_version_and_rejects_stale_writes(pool: PgPool) -> sqlx::Result<()> {
    let repo = WorkflowRepository::new(pool);
    let workflow = new_workflow();
    repo.create(&workflow).await.expect("insert should succeed");

    let updated = repo
        .transition_to(workflow.id, workflow.version, WorkflowState::Running, None)
        .await
        .expect("transition from the current version should succeed");
    assert_eq!(updated.state, WorkflowState::Running);
    assert_eq!(updated.version, workflow.version + 1);

    let stale = repo.transition_to(workflow.id, workflow.version, WorkflowState::Completed, None).await;
    assert!(stale.is_err(), "a transition against a stale version must be rejected");
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn list_filters_by_state(pool: PgPool) -> sqlx::Result<()> {
    let repo = WorkflowRepository::new(pool);
    let running = new_workflow();
    repo.create(&running).await.expect("insert should succeed");
    repo.transition_to(running.id, running.version, WorkflowState::Running, None)
        .await
        .expect("transition should succeed");

    let created_only = new_workflow();
    repo.create(&created_only).await.expect("insert should succeed");

    let running_workflows = repo.list(Some(WorkflowState::Running), 10).await.expect("list should succeed");
    assert_eq!(running_workflows.len(), 1);
    assert_eq!(running_workflows[0].id, running.id);
    Ok(())
}
