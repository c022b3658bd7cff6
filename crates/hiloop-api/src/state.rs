//! Shared handler state: everything a route needs, cheap to clone.

use hiloop_bus::EventBus;
use hiloop_db::DlqRepository;
use hiloop_engine::{ApprovalService, WorkflowEngine};

#[derive(Clone)]
pub struct ApiState {
    pub engine: WorkflowEngine,
    pub approvals: ApprovalService,
    pub bus: EventBus,
    pub dlq: DlqRepository,
}

impl ApiState {
    pub fn new(engine: WorkflowEngine, approvals: ApprovalService, bus: EventBus, dlq: DlqRepository) -> Self {
        Self { engine, approvals, bus, dlq }
    }
}
