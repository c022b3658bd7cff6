//! Application wiring: loads config, connects the database, constructs
//! every core component, subscribes the event handlers, and spawns the two
//! background tasks (the bus consumer and the timeout sweeper).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use hiloop_bus::EventBus;
use hiloop_core::{AppConfig, EventType};
use hiloop_db::{
    ApprovalRepository, DlqRepository, EventRepository, IdempotencyRepository, WorkflowRepository,
    WorkflowStepRepository,
};
use hiloop_engine::{
    ApprovalReceivedHandler, ApprovalRetryHandler, ApprovalService, ApprovalTimeoutHandler, TaskRegistryBuilder,
    TimeoutManager, WorkflowEngine, WorkflowStartedHandler,
};
use hiloop_resilience::{CircuitBreakerConfig, RetryPolicy};
use hiloop_webhook::{ApprovalReceivedChatHandler, ApprovalRequestedHandler, ChatAdapter, SlackAdapter};

use crate::cli::Args;
use crate::server::Server;

/// Everything a request handler or background task needs, cheap to clone.
/// Threaded explicitly rather than reached for as a global (spec §9's
/// redesign note on global singletons).
#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
    pub approvals: ApprovalService,
    pub bus: EventBus,
    pub dlq: DlqRepository,
    pub chat_adapter: Arc<SlackAdapter>,
    pub signature_verifier: hiloop_security::SignatureVerifier,
}

pub struct App {
    args: Args,
    state: AppState,
    bus_processor: Option<hiloop_bus::EventBusProcessor>,
    timeout_manager: Option<TimeoutManager>,
}

impl App {
    pub async fn build(args: Args) -> Result<Self> {
        args.validate().context("invalid command line arguments")?;

        let config = AppConfig::load().context("failed to load configuration (is SECRET_KEY set?)")?;
        info!(host = %config.host, port = config.port, "configuration loaded");

        let pool = hiloop_db::connect(&config.database_url)
            .await
            .context("failed to connect to database / run migrations")?;

        let workflows = WorkflowRepository::new(pool.clone());
        let steps = WorkflowStepRepository::new(pool.clone());
        let approvals_repo = ApprovalRepository::new(pool.clone());
        let events = EventRepository::new(pool.clone());
        let idempotency =
            IdempotencyRepository::with_window_hours(pool.clone(), config.idempotency_key_expiry_hours);
        let dlq = DlqRepository::new(pool.clone());

        let bus_config = hiloop_bus::EventBusConfig {
            max_queue_size: config.event_bus.max_queue_size,
            max_retries: config.event_bus.max_retries,
        };
        let (bus, bus_processor) = EventBus::new(bus_config, dlq.clone());

        let secret_key = config.secret_key.as_bytes().to_vec();

        let approvals = ApprovalService::new(
            approvals_repo.clone(),
            steps.clone(),
            workflows.clone(),
            events.clone(),
            bus.clone(),
            secret_key,
            config.default_approval_timeout_seconds,
        );

        let retry_policy = RetryPolicy::new(config.retry.max_attempts as usize)
            .with_backoff(config.retry.initial_wait(), config.retry.max_wait())
            .with_multiplier(config.retry.multiplier);

        // No handlers are registered at startup beyond what deployments add
        // via their own `TaskRegistryBuilder` extension; an empty registry
        // still behaves correctly since the executor soft-skips unknown
        // handler names (spec §4.2).
        let tasks = TaskRegistryBuilder::new().build();

        let engine = WorkflowEngine::new(
            workflows.clone(),
            steps.clone(),
            events.clone(),
            idempotency,
            dlq.clone(),
            bus.clone(),
            approvals.clone(),
            tasks,
            retry_policy,
            config.default_approval_timeout_seconds,
        );

        let timeout_manager = TimeoutManager::new(
            approvals_repo.clone(),
            approvals.clone(),
            engine.clone(),
            Duration::from_secs(config.timeout_check_interval_seconds),
        );

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.circuit_breaker.fail_max as usize,
            success_threshold: config.circuit_breaker.success_threshold as usize,
            timeout: config.circuit_breaker.timeout(),
            ..Default::default()
        };
        let chat_retry = RetryPolicy::new(config.retry.max_attempts as usize)
            .with_backoff(config.retry.initial_wait(), config.retry.max_wait())
            .with_multiplier(config.retry.multiplier);
        let chat_adapter = Arc::new(SlackAdapter::new(
            config.chat_bot_token.clone(),
            config.chat_channel.clone(),
            breaker_config,
            chat_retry,
        ));

        let signature_verifier = hiloop_security::SignatureVerifier::new(
            config.chat_signing_secret.as_ref().map(|s| s.as_bytes().to_vec()),
        );

        subscribe_event_handlers(&bus, &engine, &approvals, &steps, &chat_adapter, &approvals_repo, &config);

        let state = AppState { engine, approvals, bus, dlq, chat_adapter, signature_verifier };

        Ok(Self { args, state, bus_processor: Some(bus_processor), timeout_manager: Some(timeout_manager) })
    }

    pub async fn run(mut self) -> Result<()> {
        info!("starting orchestrator");

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let bus_handle = self.bus_processor.take().map(|processor| {
            let rx = shutdown_rx.clone();
            tokio::spawn(processor.run(rx))
        });
        let timeout_handle = self.timeout_manager.take().map(|manager| {
            let rx = shutdown_rx.clone();
            tokio::spawn(manager.run(rx))
        });

        let server = Server::new(self.args, self.state)?;
        let result = server.run().await;

        let _ = shutdown_tx.send(true);
        if let Some(handle) = bus_handle {
            let _ = handle.await;
        }
        if let Some(handle) = timeout_handle {
            let _ = handle.await;
        }

        result
    }
}

/// Wires the cross-component glue described in spec §4.6/§4.9: the legacy
/// single-step path, the redesigned approval-completion split, and the
/// chat-notification subscribers. None of these handlers know about each
/// other — they only know the event taxonomy.
fn subscribe_event_handlers(
    bus: &EventBus,
    engine: &WorkflowEngine,
    approvals: &ApprovalService,
    steps: &WorkflowStepRepository,
    chat_adapter: &Arc<SlackAdapter>,
    approvals_repo: &ApprovalRepository,
    config: &AppConfig,
) {
    bus.subscribe(EventType::WORKFLOW_STARTED, Arc::new(WorkflowStartedHandler::new(engine.clone(), approvals.clone())));
    bus.subscribe(EventType::APPROVAL_RECEIVED, Arc::new(ApprovalReceivedHandler::new(engine.clone(), steps.clone())));
    bus.subscribe(EventType::APPROVAL_TIMEOUT, Arc::new(ApprovalTimeoutHandler::new(engine.clone())));
    bus.subscribe(EventType::APPROVAL_RETRY, Arc::new(ApprovalRetryHandler::new(engine.clone(), approvals.clone())));

    let chat_adapter_dyn: Arc<dyn ChatAdapter> = chat_adapter.clone();
    bus.subscribe(
        EventType::APPROVAL_REQUESTED,
        Arc::new(ApprovalRequestedHandler::new(chat_adapter_dyn.clone(), approvals_repo.clone(), config.callback_base_url.clone())),
    );
    bus.subscribe(
        EventType::APPROVAL_RECEIVED,
        Arc::new(ApprovalReceivedChatHandler::new(chat_adapter_dyn, approvals_repo.clone())),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_validate_is_infallible() {
        let args = Args { port: None, log_level: "info".to_string(), env: "dev".to_string(), json_logs: false };
        assert!(args.validate().is_ok());
    }
}
