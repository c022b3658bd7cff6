//! Slack Block Kit rendering and outbound calls, behind a circuit breaker and
//! retry policy (spec §4.8/§4.9). Grounded on `app/adapters/slack.py`.

use async_trait::async_trait;
use hiloop_core::{ApprovalUiSchema, FieldType, JsonMap};
use hiloop_resilience::{AdapterError, AdapterResult, CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

/// The capability the rest of the crate depends on. A second implementation
/// (a different chat platform, or a no-op for tests) only needs these two
/// methods; everything Slack-specific (modals, block rendering) lives on
/// [`SlackAdapter`] itself since no other platform in scope shares that
/// rendering model.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    fn is_configured(&self) -> bool;

    /// Posts the approval UI and returns a platform message reference
    /// (Slack's `ts`) to thread later updates through, if one was sent.
    async fn send_approval_request(
        &self,
        schema: &ApprovalUiSchema,
        approval_id: Uuid,
        callback_token: &str,
        callback_base_url: Option<&str>,
    ) -> AdapterResult<Option<String>>;

    async fn update_message(&self, message_ref: &str, text: &str, blocks: Option<Value>) -> AdapterResult<()>;

    /// Renders the `(text, blocks)` pair `update_message` should send once a
    /// decision lands, so the bus handler that reacts to `approval.received`
    /// can stay generic over the chat platform instead of reaching for
    /// Slack-specific rendering itself.
    fn render_decision_update(&self, decision: &str, response_data: &JsonMap) -> (String, Option<Value>);
}

pub struct SlackAdapter {
    bot_token: Option<String>,
    channel_id: Option<String>,
    client: reqwest::Client,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl SlackAdapter {
    pub fn new(
        bot_token: Option<String>,
        channel_id: Option<String>,
        breaker_config: CircuitBreakerConfig,
        retry: RetryPolicy,
    ) -> Self {
        if bot_token.is_none() {
            warn!("slack_not_configured: SLACK_BOT_TOKEN not set");
        }
        Self {
            bot_token,
            channel_id,
            client: reqwest::Client::new(),
            breaker: CircuitBreaker::new(breaker_config),
            retry,
        }
    }

    fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.channel_id.is_some()
    }

    async fn post(&self, url: &str, body: Value) -> AdapterResult<Value> {
        let token = self.bot_token.clone().ok_or(AdapterError::ServiceUnavailable("not configured".into()))?;
        let client = self.client.clone();
        let url = url.to_string();
        let retry = self.retry.clone();

        self.breaker
            .call(move || {
                let client = client.clone();
                let url = url.clone();
                let body = body.clone();
                let token = token.clone();
                let retry = retry.clone();
                async move {
                    retry
                        .execute(move || {
                            let client = client.clone();
                            let url = url.clone();
                            let body = body.clone();
                            let token = token.clone();
                            async move { send_once(&client, &url, &token, &body).await }
                        })
                        .await
                }
            })
            .await
    }

    /// Fields requiring free-text entry can't be answered from a message's
    /// inline accessories — Slack needs a modal for those.
    pub fn has_text_input_fields(&self, schema: &ApprovalUiSchema) -> bool {
        schema.fields.iter().any(|f| {
            matches!(
                f.field_type,
                FieldType::Text
                    | FieldType::Textarea
                    | FieldType::Email
                    | FieldType::Url
                    | FieldType::Tel
                    | FieldType::Number
                    | FieldType::Password
            )
        })
    }

    pub async fn open_modal(&self, trigger_id: &str, view: Value) -> AdapterResult<Value> {
        self.post("https://slack.com/api/views.open", json!({"trigger_id": trigger_id, "view": view})).await
    }

    pub fn render_modal_view(&self, schema: &ApprovalUiSchema, callback_token: &str, decision: &str) -> Value {
        let text_input = [
            FieldType::Text,
            FieldType::Textarea,
            FieldType::Email,
            FieldType::Url,
            FieldType::Tel,
            FieldType::Number,
            FieldType::Password,
        ];

        let blocks: Vec<Value> = schema
            .fields
            .iter()
            .filter(|f| text_input.contains(&f.field_type))
            .map(|field| {
                let label = field.label.clone().unwrap_or_else(|| field.name.clone());
                let mut element = json!({
                    "type": "plain_text_input",
                    "action_id": format!("field_{}", field.name),
                    "placeholder": {"type": "plain_text", "text": field.placeholder.clone().unwrap_or_else(|| label.clone())},
                });
                if field.field_type == FieldType::Textarea {
                    element["multiline"] = json!(true);
                }
                json!({
                    "type": "input",
                    "block_id": format!("block_{}", field.name),
                    "label": {"type": "plain_text", "text": label},
                    "element": element,
                    "optional": !field.required,
                })
            })
            .collect();

        // callback_id carries the token (which already encodes approval_id)
        // plus the decision, split by `inbound::handle_modal_submission`.
        let callback_id = format!("{callback_token}:{decision}");
        let title = if decision == "approve" { "Approve" } else { "Reject" };

        json!({
            "type": "modal",
            "callback_id": callback_id,
            "title": {"type": "plain_text", "text": &title[..title.len().min(24)]},
            "submit": {"type": "plain_text", "text": "Submit"},
            "close": {"type": "plain_text", "text": "Cancel"},
            "blocks": blocks,
        })
    }

    pub fn render_approval_result(&self, decision: &str, response_data: &hiloop_core::JsonMap) -> Vec<Value> {
        let (emoji, status_text) = if decision == "approve" { ("\u{2705}", "Approved") } else { ("\u{274c}", "Rejected") };

        let mut blocks = vec![
            json!({
                "type": "header",
                "text": {"type": "plain_text", "text": format!("{emoji} {status_text}")},
            }),
            json!({"type": "divider"}),
        ];

        if !response_data.is_empty() {
            let fields: Vec<Value> = response_data
                .iter()
                .map(|(key, value)| {
                    let value_str = match value {
                        Value::Array(items) => items.iter().map(value_to_display).collect::<Vec<_>>().join(", "),
                        other => value_to_display(other),
                    };
                    let readable_key = key.replace('_', " ");
                    json!({"type": "mrkdwn", "text": format!("*{readable_key}:*\n{value_str}")})
                })
                .collect();
            blocks.push(json!({"type": "section", "fields": fields}));
        }

        blocks
    }

    fn render_blocks(&self, schema: &ApprovalUiSchema, approval_id: Uuid, callback_token: &str, callback_base_url: Option<&str>) -> Vec<Value> {
        let mut blocks = vec![
            json!({"type": "header", "text": {"type": "plain_text", "text": "Approval requested"}}),
            json!({"type": "section", "text": {"type": "mrkdwn", "text": format!("Approval `{approval_id}` is waiting for a decision.")}}),
            json!({"type": "divider"}),
        ];

        for field in &schema.fields {
            let label = field.label.clone().unwrap_or_else(|| field.name.clone());
            let suffix = if field.required { " (required)" } else { "" };
            let text = format!("*{label}*{suffix}");
            let options: Vec<Value> = field
                .options
                .iter()
                .map(|opt| {
                    json!({
                        "text": {"type": "plain_text", "text": opt.label.clone().unwrap_or_else(|| opt.value.clone())},
                        "value": opt.value,
                    })
                })
                .collect();

            let accessory = match field.field_type {
                FieldType::Select => Some(json!({
                    "type": "static_select",
                    "action_id": format!("field_{}", field.name),
                    "placeholder": {"type": "plain_text", "text": field.placeholder.clone().unwrap_or_else(|| "Select an option".to_string())},
                    "options": options,
                })),
                FieldType::Multiselect => Some(json!({
                    "type": "multi_static_select",
                    "action_id": format!("field_{}", field.name),
                    "placeholder": {"type": "plain_text", "text": field.placeholder.clone().unwrap_or_else(|| label.clone())},
                    "options": options,
                })),
                FieldType::Checkbox => Some(json!({
                    "type": "checkboxes",
                    "action_id": format!("field_{}", field.name),
                    "options": options,
                })),
                FieldType::Radio => Some(json!({
                    "type": "radio_buttons",
                    "action_id": format!("field_{}", field.name),
                    "options": options,
                })),
                FieldType::Date => Some(json!({
                    "type": "datepicker",
                    "action_id": format!("field_{}", field.name),
                    "placeholder": {"type": "plain_text", "text": field.placeholder.clone().unwrap_or_else(|| "Select a date".to_string())},
                })),
                FieldType::Datetime => Some(json!({
                    "type": "datetimepicker",
                    "action_id": format!("field_{}", field.name),
                })),
                FieldType::Hidden => None,
                _ => None,
            };

            if let Some(accessory) = accessory {
                blocks.push(json!({"type": "section", "text": {"type": "mrkdwn", "text": text}, "accessory": accessory}));
            }
        }

        blocks.push(json!({"type": "divider"}));

        let buttons: Vec<Value> = schema
            .buttons
            .iter()
            .map(|btn| {
                let style = match btn.style {
                    hiloop_core::ButtonStyle::Primary => Some("primary"),
                    hiloop_core::ButtonStyle::Danger => Some("danger"),
                    hiloop_core::ButtonStyle::Default => None,
                };
                let mut block = json!({
                    "type": "button",
                    "text": {"type": "plain_text", "text": btn.label},
                    "action_id": format!("approval_{}", btn.value),
                    "value": callback_token,
                });
                if let Some(style) = style {
                    block["style"] = json!(style);
                }
                block
            })
            .collect();

        if !buttons.is_empty() {
            blocks.push(json!({"type": "actions", "elements": buttons}));
        }

        if let Some(base_url) = callback_base_url {
            blocks.push(json!({
                "type": "context",
                "elements": [{"type": "mrkdwn", "text": format!("Or respond via web: {base_url}/approval/{approval_id}")}],
            }));
        }

        blocks
    }
}

async fn send_once(client: &reqwest::Client, url: &str, token: &str, body: &Value) -> AdapterResult<Value> {
    let response = client
        .post(url)
        .bearer_auth(token)
        .json(body)
        .send()
        .await
        .map_err(|e| AdapterError::ConnectionError(e.to_string()))?;

    let status = response.status();
    let data: Value = response.json().await.map_err(|e| AdapterError::SerializationError(e.to_string()))?;

    if !status.is_success() {
        return Err(AdapterError::RequestFailed(format!("http {status}")));
    }
    if !data.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        let err = data.get("error").and_then(Value::as_str).unwrap_or("unknown").to_string();
        return Err(AdapterError::InvalidResponse(err));
    }
    Ok(data)
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ChatAdapter for SlackAdapter {
    fn is_configured(&self) -> bool {
        self.is_configured()
    }

    async fn send_approval_request(
        &self,
        schema: &ApprovalUiSchema,
        approval_id: Uuid,
        callback_token: &str,
        callback_base_url: Option<&str>,
    ) -> AdapterResult<Option<String>> {
        if !self.is_configured() {
            info!(%approval_id, "slack_send_skipped: not configured");
            return Ok(None);
        }

        let channel = self.channel_id.clone().expect("checked by is_configured");
        let blocks = self.render_blocks(schema, approval_id, callback_token, callback_base_url);
        let body = json!({"channel": channel, "blocks": blocks, "text": "Approval requested"});

        match self.post("https://slack.com/api/chat.postMessage", body).await {
            Ok(data) => {
                let ts = data.get("ts").and_then(Value::as_str).map(|s| s.to_string());
                info!(%approval_id, ts = ?ts, "slack_message_sent");
                Ok(ts)
            }
            Err(e) => {
                error!(%approval_id, error = %e, "slack_send_failed");
                Err(e)
            }
        }
    }

    async fn update_message(&self, message_ref: &str, text: &str, blocks: Option<Value>) -> AdapterResult<()> {
        if !self.is_configured() {
            return Ok(());
        }

        let channel = self.channel_id.clone().expect("checked by is_configured");
        let mut body = json!({"channel": channel, "ts": message_ref, "text": text});
        if let Some(blocks) = blocks {
            body["blocks"] = blocks;
        }

        self.post("https://slack.com/api/chat.update", body).await?;
        info!(message_ref, "slack_message_updated");
        Ok(())
    }

    fn render_decision_update(&self, decision: &str, response_data: &JsonMap) -> (String, Option<Value>) {
        let text = if decision == "approve" { "Approved".to_string() } else { "Rejected".to_string() };
        let blocks = self.render_approval_result(decision, response_data);
        (text, Some(json!(blocks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiloop_core::{ApprovalButton, ButtonStyle, FieldOption, FormField};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> SlackAdapter {
        SlackAdapter::new(
            Some("xoxb-test".to_string()),
            Some("C12345".to_string()),
            CircuitBreakerConfig::default(),
            RetryPolicy::default(),
        )
    }

    fn select_schema() -> ApprovalUiSchema {
        ApprovalUiSchema {
            fields: vec![FormField {
                name: "env".into(),
                field_type: FieldType::Select,
                label: Some("Environment".into()),
                required: true,
                options: vec![FieldOption { value: "prod".into(), label: Some("Production".into()) }],
                placeholder: None,
                default: None,
            }],
            buttons: vec![
                ApprovalButton { label: "Approve".into(), value: "approve".into(), style: ButtonStyle::Primary },
                ApprovalButton { label: "Reject".into(), value: "reject".into(), style: ButtonStyle::Danger },
            ],
        }
    }

    #[test]
    fn has_text_input_fields_detects_free_text_only() {
        let adapter = adapter();
        assert!(!adapter.has_text_input_fields(&select_schema()));

        let with_text = ApprovalUiSchema {
            fields: vec![FormField {
                name: "note".into(),
                field_type: FieldType::Textarea,
                label: None,
                required: false,
                options: vec![],
                placeholder: None,
                default: None,
            }],
            buttons: vec![],
        };
        assert!(adapter.has_text_input_fields(&with_text));
    }

    #[test]
    fn render_blocks_emits_select_accessory_and_buttons() {
        let adapter = adapter();
        let approval_id = Uuid::nil();
        let blocks = adapter.render_blocks(&select_schema(), approval_id, "tok:abc", None);

        let select_block = blocks
            .iter()
            .find(|b| b["accessory"]["type"] == "static_select")
            .expect("select field should render a static_select accessory");
        assert_eq!(select_block["accessory"]["options"][0]["value"], "prod");

        let actions_block = blocks.iter().find(|b| b["type"] == "actions").expect("buttons render an actions block");
        assert_eq!(actions_block["elements"].as_array().unwrap().len(), 2);
        assert_eq!(actions_block["elements"][0]["value"], "tok:abc");
    }

    #[test]
    fn render_blocks_appends_web_callback_context_when_base_url_set() {
        let adapter = adapter();
        let blocks = adapter.render_blocks(&select_schema(), Uuid::nil(), "tok", Some("https://hiloop.example"));
        assert!(blocks.iter().any(|b| b["type"] == "context"));
    }

    #[test]
    fn render_modal_view_only_includes_free_text_fields() {
        let adapter = adapter();
        let schema = ApprovalUiSchema {
            fields: vec![
                FormField {
                    name: "reason".into(),
                    field_type: FieldType::Textarea,
                    label: Some("Reason".into()),
                    required: true,
                    options: vec![],
                    placeholder: None,
                    default: None,
                },
                FormField {
                    name: "env".into(),
                    field_type: FieldType::Select,
                    label: None,
                    required: true,
                    options: vec![FieldOption { value: "prod".into(), label: None }],
                    placeholder: None,
                    default: None,
                },
            ],
            buttons: vec![],
        };

        let view = adapter.render_modal_view(&schema, "APPROVAL:RANDOM:SIG", "approve");
        assert_eq!(view["callback_id"], "APPROVAL:RANDOM:SIG:approve");
        let blocks = view["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 1, "only the free-text field should become a modal input block");
        assert_eq!(blocks[0]["element"]["action_id"], "field_reason");
    }

    #[test]
    fn render_approval_result_formats_array_values_joined() {
        let adapter = adapter();
        let mut response_data = JsonMap::new();
        response_data.insert("approved_by".into(), json!(["alice", "bob"]));
        let blocks = adapter.render_approval_result("approve", &response_data);
        let fields_block = blocks.iter().find(|b| b["type"] == "section").unwrap();
        let text = fields_block["fields"][0]["text"].as_str().unwrap();
        assert!(text.contains("alice, bob"));
    }

    #[tokio::test]
    async fn send_once_rejects_non_ok_slack_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat.postMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "channel_not_found"})))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/api/chat.postMessage", server.uri());
        let err = send_once(&client, &url, "xoxb-test", &json!({})).await.unwrap_err();
        assert!(matches!(err, AdapterError::InvalidResponse(ref e) if e == "channel_not_found"));
    }

    #[tokio::test]
    async fn send_once_rejects_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat.postMessage"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"ok": false})))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/api/chat.postMessage", server.uri());
        let err = send_once(&client, &url, "xoxb-test", &json!({})).await.unwrap_err();
        assert!(matches!(err, AdapterError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn send_once_succeeds_and_returns_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat.postMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "ts": "123.456"})))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/api/chat.postMessage", server.uri());
        let data = send_once(&client, &url, "xoxb-test", &json!({})).await.unwrap();
        assert_eq!(data["ts"], "123.456");
    }
}
