//! Bus subscribers bridging the engine to the chat adapter (spec §4.8's
//! outbound half). Grounded on `app/adapters/slack.py`'s event-driven
//! notification hooks and the subscriber shape established in
//! `hiloop-engine::events`.

use std::sync::Arc;

use async_trait::async_trait;
use hiloop_bus::{BusEvent, EventHandler};
use hiloop_core::{ApprovalUiSchema, HiloopError, JsonMap, Result};
use hiloop_db::ApprovalRepository;
use tracing::info;
use uuid::Uuid;

use crate::adapter::ChatAdapter;

fn event_field<'a>(event: &'a BusEvent, key: &str) -> Result<&'a serde_json::Value> {
    event.payload.get(key).ok_or_else(|| HiloopError::EventHandlerError {
        event_type: event.event_type.to_string(),
        reason: format!("missing `{key}` in event payload"),
    })
}

fn parse_approval_id(event: &BusEvent) -> Result<Uuid> {
    event_field(event, "approval_id")?
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| HiloopError::EventHandlerError {
            event_type: event.event_type.to_string(),
            reason: "malformed approval_id".to_string(),
        })
}

/// Subscribed to `approval.requested`: posts the approval's UI to the chat
/// channel and records the resulting message reference so a later decision
/// can update the same message instead of posting a new one.
pub struct ApprovalRequestedHandler {
    chat_adapter: Arc<dyn ChatAdapter>,
    approvals: ApprovalRepository,
    callback_base_url: Option<String>,
}

impl ApprovalRequestedHandler {
    pub fn new(chat_adapter: Arc<dyn ChatAdapter>, approvals: ApprovalRepository, callback_base_url: Option<String>) -> Self {
        Self { chat_adapter, approvals, callback_base_url }
    }
}

#[async_trait]
impl EventHandler for ApprovalRequestedHandler {
    async fn handle(&self, event: &BusEvent) -> Result<()> {
        if !self.chat_adapter.is_configured() {
            info!("chat adapter not configured, skipping approval notification");
            return Ok(());
        }

        let approval_id = parse_approval_id(event)?;
        let ui_schema: ApprovalUiSchema = serde_json::from_value(event_field(event, "ui_schema")?.clone())?;
        let callback_token = event_field(event, "callback_token")?.as_str().unwrap_or_default().to_string();

        let message_ref = self
            .chat_adapter
            .send_approval_request(&ui_schema, approval_id, &callback_token, self.callback_base_url.as_deref())
            .await
            .map_err(HiloopError::from)?;

        if let Some(message_ref) = message_ref {
            self.approvals.attach_message_ref(approval_id, &message_ref).await?;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "approval_requested_chat_notify"
    }
}

/// Subscribed to `approval.received`: updates the previously posted message
/// (if any) to reflect the decision. Runs for decisions made through the
/// chat platform's own UI and for decisions made through the plain HTTP
/// callback route alike — both end up publishing the same event.
pub struct ApprovalReceivedChatHandler {
    chat_adapter: Arc<dyn ChatAdapter>,
    approvals: ApprovalRepository,
}

impl ApprovalReceivedChatHandler {
    pub fn new(chat_adapter: Arc<dyn ChatAdapter>, approvals: ApprovalRepository) -> Self {
        Self { chat_adapter, approvals }
    }
}

#[async_trait]
impl EventHandler for ApprovalReceivedChatHandler {
    async fn handle(&self, event: &BusEvent) -> Result<()> {
        if !self.chat_adapter.is_configured() {
            return Ok(());
        }

        let approval_id = parse_approval_id(event)?;
        let decision = event_field(event, "decision")?.as_str().unwrap_or_default().to_string();
        let response_data: JsonMap = event
            .payload
            .get("response_data")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let approval = self.approvals.get(approval_id).await?;
        let Some(message_ref) = approval.external_message_ref else {
            return Ok(());
        };

        let (text, blocks) = self.chat_adapter.render_decision_update(&decision, &response_data);
        self.chat_adapter.update_message(&message_ref, &text, blocks).await.map_err(HiloopError::from)?;
        info!(%approval_id, decision = %decision, "chat message updated with decision");
        Ok(())
    }

    fn name(&self) -> &str {
        "approval_received_chat_notify"
    }
}
