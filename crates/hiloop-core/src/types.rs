use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Legal lifecycle states of a [`Workflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Created,
    Running,
    WaitingApproval,
    Approved,
    Completed,
    Failed,
    Rejected,
    Timeout,
}

impl WorkflowState {
    /// States from which the storage invariant "no pending approvals, no
    /// running steps" applies unconditionally. `Timeout` is excluded here
    /// because it is always a transient stop on the way to `Running` (retry)
    /// or `Failed` (exhaustion) — never a resting state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }

    /// The legal-transition graph from spec §4.1.
    pub fn legal_targets(self) -> &'static [WorkflowState] {
        use WorkflowState::*;
        match self {
            Created => &[Running, Failed],
            Running => &[WaitingApproval, Completed, Failed, Rejected, Timeout],
            WaitingApproval => &[Approved, Rejected, Timeout, Failed],
            Approved => &[Completed, Failed],
            Rejected => &[Running],
            Timeout => &[Running, Failed],
            Failed => &[Running],
            Completed => &[],
        }
    }

    pub fn can_transition_to(self, target: WorkflowState) -> bool {
        self.legal_targets().contains(&target)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::WaitingApproval => "WAITING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Rejected => "REJECTED",
            Self::Timeout => "TIMEOUT",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "RUNNING" => Ok(Self::Running),
            "WAITING_APPROVAL" => Ok(Self::WaitingApproval),
            "APPROVED" => Ok(Self::Approved),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "REJECTED" => Ok(Self::Rejected),
            "TIMEOUT" => Ok(Self::Timeout),
            other => Err(format!("unknown workflow state: {other}")),
        }
    }
}

/// One entry in a workflow's ordered execution list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Task,
    Approval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Approval => "approval",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "approval" => Ok(Self::Approval),
            other => Err(format!("unknown step type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "TIMEOUT" => Ok(Self::Timeout),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown approval status: {other}")),
        }
    }
}

/// A decision delivered for a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

impl ApprovalDecision {
    pub fn resulting_status(self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
        }
    }
}

/// Stable, wire-level event type taxonomy (spec §4.6). Kept as a string
/// newtype rather than a closed enum: the bus and the DLQ persist the raw
/// string, and new event types are additive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(pub String);

impl EventType {
    pub const WORKFLOW_STARTED: &'static str = "workflow.started";
    pub const WORKFLOW_STATE_CHANGED: &'static str = "workflow.state_changed";
    pub const WORKFLOW_COMPLETED: &'static str = "workflow.completed";
    pub const WORKFLOW_FAILED: &'static str = "workflow.failed";
    pub const WORKFLOW_ROLLED_BACK: &'static str = "workflow.rolled_back";
    pub const APPROVAL_REQUESTED: &'static str = "approval.requested";
    pub const APPROVAL_RECEIVED: &'static str = "approval.received";
    pub const APPROVAL_TIMEOUT: &'static str = "approval.timeout";
    pub const APPROVAL_RETRY: &'static str = "approval.retry";
    pub const APPROVAL_CANCELLED: &'static str = "approval.cancelled";
    pub const STEP_COMPLETED: &'static str = "step.completed";

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The enumerated ui_schema field-type set (spec §9 / SPEC_FULL §3). Only the
/// chat-rendered subset is special-cased anywhere; the rest persist and
/// validate identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Select,
    Multiselect,
    Checkbox,
    Radio,
    Number,
    Email,
    Url,
    Tel,
    Date,
    Datetime,
    Time,
    File,
    Color,
    Range,
    Password,
    Hidden,
}

impl FieldType {
    /// Field types the chat adapter knows how to render; anything else still
    /// validates and persists but is shown as a generic text input.
    pub fn is_chat_renderable(self) -> bool {
        matches!(
            self,
            Self::Text
                | Self::Textarea
                | Self::Select
                | Self::Multiselect
                | Self::Checkbox
                | Self::Radio
                | Self::Date
                | Self::Datetime
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldOption {
    pub value: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Accepts both the bare `"value"` and the `{"value": "...", "label": "..."}`
/// option shapes, matching the original implementation's validation.
impl<'de> Deserialize<'de> for FieldOption {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Plain(String),
            Full { value: String, #[serde(default)] label: Option<String> },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Plain(value) => FieldOption { value, label: None },
            Repr::Full { value, label } => FieldOption { value, label },
        })
    }
}

impl FieldOption {
    pub fn value(&self) -> &str {
        &self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalButton {
    pub label: String,
    pub value: String,
    #[serde(default = "default_button_style")]
    pub style: ButtonStyle,
}

fn default_button_style() -> ButtonStyle {
    ButtonStyle::Default
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<FieldOption>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

/// The form definition attached to an [`Approval`]. Stored as opaque JSON at
/// the persistence boundary; parsed into this shape wherever validation or
/// rendering needs structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApprovalUiSchema {
    #[serde(default)]
    pub fields: Vec<FormField>,
    #[serde(default)]
    pub buttons: Vec<ApprovalButton>,
}

impl ApprovalUiSchema {
    /// True when a button click alone can complete the approval — no
    /// required free-text fields stand between the click and a decision.
    pub fn completes_on_button_click(&self) -> bool {
        self.fields.iter().all(|f| !f.required)
    }

    /// Validates a submitted response against the declared fields: required
    /// fields must be present and non-empty, `select` values must match a
    /// declared option, `multiselect` values must each match one.
    pub fn validate_response(&self, response: &JsonMap) -> crate::Result<()> {
        for field in &self.fields {
            let value = response.get(&field.name);

            if field.required && value.map(is_empty_value).unwrap_or(true) {
                return Err(crate::HiloopError::validation(format!(
                    "required field '{}' missing in response",
                    field.name
                )));
            }

            let Some(value) = value else { continue };

            match field.field_type {
                FieldType::Select => {
                    if !field.options.is_empty() && !option_values(&field.options).any(|v| Some(v) == value.as_str())
                    {
                        return Err(crate::HiloopError::validation(format!(
                            "invalid value for field '{}': must be one of the declared options",
                            field.name
                        )));
                    }
                }
                FieldType::Multiselect => {
                    let Some(values) = value.as_array() else {
                        return Err(crate::HiloopError::validation(format!(
                            "field '{}' must be an array",
                            field.name
                        )));
                    };
                    if !field.options.is_empty() {
                        for v in values {
                            if !option_values(&field.options).any(|o| Some(o) == v.as_str()) {
                                return Err(crate::HiloopError::validation(format!(
                                    "invalid value in field '{}': must be one of the declared options",
                                    field.name
                                )));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn option_values(options: &[FieldOption]) -> impl Iterator<Item = &str> {
    options.iter().map(|o| o.value())
}

fn is_empty_value(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Audit metadata carried by a conversation-history row (spec §3
/// `ConversationHistory`, persisted by `hiloop-db`, owned by `hiloop-webhook`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

pub type JsonMap = HashMap<String, serde_json::Value>;

/// A running or completed workflow instance (spec §3 `workflows`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: uuid::Uuid,
    pub workflow_type: String,
    pub state: WorkflowState,
    pub context: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub retry_count: i32,
    pub max_retries: i32,
    pub rollback_count: i32,
    pub max_rollbacks: i32,
    pub previous_state: Option<WorkflowState>,
    pub rollback_reason: Option<String>,
}

/// One entry in a workflow's ordered execution list (spec §3 `workflow_steps`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: uuid::Uuid,
    pub workflow_id: uuid::Uuid,
    pub step_order: i32,
    pub step_type: StepType,
    pub status: StepStatus,
    pub task_handler: Option<String>,
    pub task_input: Option<JsonMap>,
    pub task_output: Option<JsonMap>,
    pub approval_id: Option<uuid::Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A human-in-the-loop approval request (spec §3 `approval_requests`).
///
/// `requested_at`/`responded_at`/`expires_at` are Unix seconds, matching the
/// callback-token and timeout-sweep arithmetic the original implementation
/// performs directly against epoch integers rather than calendar timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: uuid::Uuid,
    pub workflow_id: uuid::Uuid,
    pub status: ApprovalStatus,
    pub ui_schema: ApprovalUiSchema,
    pub response_data: Option<JsonMap>,
    pub requested_at: i64,
    pub responded_at: Option<i64>,
    pub expires_at: i64,
    pub callback_token: String,
    pub external_message_ref: Option<String>,
}

impl Approval {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// An append-only audit entry (spec §3 `workflow_events`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: uuid::Uuid,
    pub workflow_id: uuid::Uuid,
    pub event_type: EventType,
    pub event_data: JsonMap,
    pub occurred_at: DateTime<Utc>,
    pub sequence_number: i64,
}

/// A dead-lettered event that exhausted the bus's retry budget (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub original_event_type: String,
    pub event_data: JsonMap,
    pub error_message: String,
    pub retry_count: i32,
    pub workflow_id: Option<uuid::Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Chat-adapter audit trail for a single conversation thread (spec §3
/// `conversation_history`, owned by `hiloop-webhook`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub user_id: String,
    pub channel: String,
    pub messages: Vec<ConversationMessage>,
    pub workflow_id: Option<uuid::Uuid>,
    pub approval_id: Option<uuid::Uuid>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_match_state_table() {
        assert!(WorkflowState::Created.can_transition_to(WorkflowState::Running));
        assert!(WorkflowState::Created.can_transition_to(WorkflowState::Failed));
        assert!(!WorkflowState::Created.can_transition_to(WorkflowState::Completed));
        assert!(WorkflowState::Rejected.can_transition_to(WorkflowState::Running));
        assert!(WorkflowState::Completed.legal_targets().is_empty());
    }

    #[test]
    fn terminal_states_exclude_timeout() {
        assert!(WorkflowState::Completed.is_terminal());
        assert!(WorkflowState::Failed.is_terminal());
        assert!(WorkflowState::Rejected.is_terminal());
        assert!(!WorkflowState::Timeout.is_terminal());
        assert!(!WorkflowState::Running.is_terminal());
    }

    #[test]
    fn ui_schema_button_only_completes_on_click() {
        let schema = ApprovalUiSchema {
            fields: vec![],
            buttons: vec![ApprovalButton {
                label: "Approve".into(),
                value: "approve".into(),
                style: ButtonStyle::Primary,
            }],
        };
        assert!(schema.completes_on_button_click());

        let schema_with_required = ApprovalUiSchema {
            fields: vec![FormField {
                name: "comment".into(),
                field_type: FieldType::Textarea,
                label: None,
                required: true,
                options: vec![],
                placeholder: None,
                default: None,
            }],
            buttons: vec![],
        };
        assert!(!schema_with_required.completes_on_button_click());
    }

    #[test]
    fn field_option_accepts_plain_string_and_object_shapes() {
        let plain: FieldOption = serde_json::from_value(serde_json::json!("prod")).unwrap();
        assert_eq!(plain.value(), "prod");
        assert_eq!(plain.label, None);

        let full: FieldOption =
            serde_json::from_value(serde_json::json!({"value": "prod", "label": "Production"})).unwrap();
        assert_eq!(full.value(), "prod");
        assert_eq!(full.label.as_deref(), Some("Production"));
    }

    #[test]
    fn validate_response_accepts_select_against_mixed_option_shapes() {
        let schema = ApprovalUiSchema {
            fields: vec![FormField {
                name: "env".into(),
                field_type: FieldType::Select,
                label: None,
                required: true,
                options: vec![
                    serde_json::from_value(serde_json::json!("staging")).unwrap(),
                    serde_json::from_value(serde_json::json!({"value": "prod", "label": "Production"})).unwrap(),
                ],
                placeholder: None,
                default: None,
            }],
            buttons: vec![],
        };

        let mut response = JsonMap::new();
        response.insert("env".into(), serde_json::json!("prod"));
        assert!(schema.validate_response(&response).is_ok());

        let mut bad = JsonMap::new();
        bad.insert("env".into(), serde_json::json!("dev"));
        assert!(schema.validate_response(&bad).is_err());
    }
}
