//! Chat-platform approval adapter (spec §4.8/§4.9).
//!
//! Owns the one outbound integration the orchestrator has — posting an
//! approval's UI schema to a chat channel and updating that message once a
//! decision lands — plus the inbound HTTP surface that receives interactive
//! callbacks from it. Everything here is circuit-broken and retried through
//! `hiloop-resilience`; nothing here decides workflow state, it only
//! translates between `ApprovalService`/`WorkflowEngine` and the wire format
//! a specific chat platform expects.

pub mod adapter;
pub mod handler;
pub mod inbound;

pub use adapter::{ChatAdapter, SlackAdapter};
pub use handler::{ApprovalReceivedChatHandler, ApprovalRequestedHandler};
pub use inbound::{interactive_router, InboundState};
