//! `GET /health`, `GET /ready`, `GET /metrics` (spec §6). `/health` is pure
//! liveness — the process answers unconditionally — while `/ready` is the
//! one that actually reaches the database, matching the teacher's
//! `copilot-api` health/readiness split. There's no separate metrics backend
//! wired up, consistent with spec §1's non-goal of exhaustive observability
//! (see SPEC_FULL.md).

use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

use crate::state::ApiState;

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

pub async fn readiness_check(State(state): State<ApiState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.engine.workflows().list(None, 1).await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "not_ready", "error": e.to_string()}))),
    }
}

pub async fn metrics(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let stats = state.bus.get_stats();
    Json(json!({
        "event_bus": {
            "running": stats.running,
            "queue_size": stats.queue_size,
            "max_queue_size": stats.max_queue_size,
            "event_types": stats.event_types,
            "total_handlers": stats.total_handlers,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_route_answers_ok_without_touching_any_state() {
        let app: Router = Router::new().route("/health", get(health_check));
        let response =
            app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
