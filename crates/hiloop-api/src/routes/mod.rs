//! Router assembly (spec §6). A thin adapter: every handler here does
//! nothing but parse the request, call a core method, and serialize the
//! result — none of the state-machine, approval, or bus logic lives in this
//! crate. Grounded on the teacher's `copilot-api::rest::router::create_router`
//! nest-and-layer shape.

pub mod admin;
pub mod approvals;
pub mod health;
pub mod workflows;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::ApiState;

pub fn create_router(state: ApiState) -> Router {
    let v1 = Router::new()
        .route("/workflows", post(workflows::create_workflow).get(workflows::list_workflows))
        .route("/workflows/:id", get(workflows::get_workflow))
        .route("/workflows/:id/events", get(workflows::get_workflow_events))
        .route("/workflows/:id/steps", get(workflows::get_workflow_steps))
        .route("/workflows/:id/cancel", post(workflows::cancel_workflow))
        .route("/workflows/:id/retry", post(workflows::retry_workflow))
        .route("/workflows/:id/rollback", post(workflows::rollback_workflow))
        .route("/approvals/:id/rollback", post(approvals::rollback_approval))
        .route("/callbacks/:callback_token", post(approvals::respond_to_callback))
        .route("/admin/dlq", get(admin::list_dlq))
        .route("/admin/dlq/:id/retry", post(admin::retry_dlq_entry))
        .route("/admin/dlq/retry-all", post(admin::retry_all_dlq))
        .route("/admin/dlq/:id", delete(admin::delete_dlq_entry))
        .route("/admin/dlq/clear", delete(admin::clear_dlq));

    let ungated = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics));

    Router::new()
        .merge(ungated)
        .merge(v1)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
