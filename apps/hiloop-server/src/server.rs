//! HTTP server wiring: the REST surface from `hiloop-api`, the chat
//! platform's inbound webhook from `hiloop-webhook`, and a bare root/health
//! banner.

use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use hiloop_api::{create_router, ApiState};
use hiloop_webhook::{interactive_router, InboundState};

use crate::app::AppState;
use crate::cli::Args;

const DEFAULT_PORT: u16 = 8080;

pub struct Server {
    args: Args,
    state: AppState,
}

impl Server {
    pub fn new(args: Args, state: AppState) -> Result<Self> {
        Ok(Self { args, state })
    }

    pub async fn run(self) -> Result<()> {
        let port = self.args.port.unwrap_or(DEFAULT_PORT);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        let app = self.build_http_router();

        info!("HTTP server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind HTTP server")?;

        axum::serve(listener, app.into_make_service()).await.context("HTTP server error")?;

        Ok(())
    }

    fn build_http_router(&self) -> Router {
        let api_state = ApiState::new(
            self.state.engine.clone(),
            self.state.approvals.clone(),
            self.state.bus.clone(),
            self.state.dlq.clone(),
        );
        let api_router = create_router(api_state);

        let inbound_state = InboundState {
            approvals: self.state.approvals.clone(),
            chat_adapter: self.state.chat_adapter.clone(),
            signature_verifier: self.state.signature_verifier.clone(),
        };
        let webhook_router = interactive_router(inbound_state);

        Router::new()
            .route("/", get(root))
            .merge(api_router)
            .merge(webhook_router)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "hiloop-orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_handler() {
        let response = root().await;
        assert_eq!(response.0["service"], "hiloop-orchestrator");
    }
}
