//! Workflow execution: the legal-transition state machine, approval
//! lifecycle, step executor, and event-driven legacy-path glue (spec §4).

pub mod approval_service;
pub mod engine;
pub mod events;
pub mod state_machine;
pub mod task;
pub mod timeout_manager;

pub use approval_service::ApprovalService;
pub use engine::{NewStep, WorkflowEngine};
pub use events::{ApprovalReceivedHandler, ApprovalRetryHandler, ApprovalTimeoutHandler, WorkflowStartedHandler};
pub use task::{RollbackHandler, TaskHandler, TaskRegistry, TaskRegistryBuilder};
pub use timeout_manager::TimeoutManager;
