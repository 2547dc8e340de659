//! Telegram transport — long-polls the Bot API and sends via HTTP.
//!
//! Raw Bot API over reqwest. All JSON stays inside this module: updates
//! are normalized into [`Inbound`] values before anything else sees them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::TransportError;
use crate::model::{
    Attachment, AttachmentKind, Control, IncomingUnit, OperatorAction, parse_callback,
};
use crate::transport::{Command, CommandKind, Destination, Inbound, Transport};

/// Bot API sends are retried this many times on transient failures.
const MAX_SEND_ATTEMPTS: u32 = 3;

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

pub struct TelegramTransport {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// One Bot API call. Returns the `result` payload on success.
    async fn call(&self, method: &str, body: &Value) -> Result<Value, TransportError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if data.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(data.get("result").cloned().unwrap_or(Value::Null));
        }

        let description = data
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description")
            .to_string();
        let code = data
            .get("error_code")
            .and_then(Value::as_u64)
            .map(|c| c as u16)
            .unwrap_or_else(|| status.as_u16());

        Err(match code {
            429 => {
                let retry_after = data
                    .pointer("/parameters/retry_after")
                    .and_then(Value::as_u64)
                    .map(Duration::from_secs);
                TransportError::RateLimited { retry_after }
            }
            403 => TransportError::Forbidden(description),
            400 => TransportError::BadRequest(description),
            _ => TransportError::Api { code, description },
        })
    }

    /// Call with bounded retries on transient failures. Permanent errors
    /// (blocked bot, malformed request) surface immediately.
    async fn call_with_retry(&self, method: &str, body: &Value) -> Result<Value, TransportError> {
        let mut attempt = 0;
        loop {
            match self.call(method, body).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt + 1 < MAX_SEND_ATTEMPTS => {
                    let backoff = match &e {
                        TransportError::RateLimited {
                            retry_after: Some(d),
                        } => *d,
                        _ => Duration::from_secs(1 << attempt),
                    };
                    warn!(method, attempt, error = %e, "Bot API call failed; retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Spawn the getUpdates long-poll loop. Normalized events go out on
    /// `tx`; the task ends when the receiver is dropped.
    pub fn spawn_poller(&self, tx: mpsc::UnboundedSender<Inbound>) -> JoinHandle<()> {
        let client = self.client.clone();
        let url = self.api_url("getUpdates");

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            info!("Telegram poller listening for updates");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query"],
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Telegram poll error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };
                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Telegram parse error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(updates) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };
                for update in updates {
                    if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                        offset = update_id + 1;
                    }
                    let Some(inbound) = normalize_update(update) else {
                        continue;
                    };
                    if tx.send(inbound).is_err() {
                        info!("Inbound receiver closed; poller stopping");
                        return;
                    }
                }
            }
        })
    }
}

// ── Outbound ────────────────────────────────────────────────────────

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(
        &self,
        dest: Destination,
        text: &str,
        controls: &[Control],
    ) -> Result<i64, TransportError> {
        let mut body = json!({
            "chat_id": dest.chat_id,
            "text": text,
        });
        if let Some(topic_id) = dest.topic_id {
            body["message_thread_id"] = json!(topic_id);
        }
        if !controls.is_empty() {
            body["reply_markup"] = json!({ "inline_keyboard": keyboard(controls) });
        }

        let result = self.call_with_retry("sendMessage", &body).await?;
        message_id(&result)
    }

    async fn send_media(
        &self,
        dest: Destination,
        attachments: &[Attachment],
        caption: Option<&str>,
    ) -> Result<Vec<i64>, TransportError> {
        match attachments {
            [] => Ok(vec![]),
            [single] => {
                let (method, field) = match single.kind {
                    AttachmentKind::Photo => ("sendPhoto", "photo"),
                    AttachmentKind::Video => ("sendVideo", "video"),
                };
                let mut body = json!({
                    "chat_id": dest.chat_id,
                    field: single.media_ref,
                });
                if let Some(topic_id) = dest.topic_id {
                    body["message_thread_id"] = json!(topic_id);
                }
                if let Some(caption) = caption {
                    body["caption"] = json!(caption);
                }
                let result = self.call_with_retry(method, &body).await?;
                Ok(vec![message_id(&result)?])
            }
            many => {
                let mut body = json!({
                    "chat_id": dest.chat_id,
                    "media": media_group(many, caption),
                });
                if let Some(topic_id) = dest.topic_id {
                    body["message_thread_id"] = json!(topic_id);
                }
                let result = self.call_with_retry("sendMediaGroup", &body).await?;
                let Some(messages) = result.as_array() else {
                    return Err(TransportError::Http(
                        "sendMediaGroup returned a non-array result".into(),
                    ));
                };
                messages.iter().map(message_id).collect()
            }
        }
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TransportError> {
        let body = json!({ "chat_id": chat_id, "message_id": message_id });
        self.call_with_retry("deleteMessage", &body).await?;
        Ok(())
    }

    async fn restrict_sender(
        &self,
        chat_id: i64,
        sender_id: i64,
        until: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        let body = json!({
            "chat_id": chat_id,
            "user_id": sender_id,
            "until_date": until.timestamp(),
            "permissions": {
                "can_send_messages": false,
                "can_send_audios": false,
                "can_send_documents": false,
                "can_send_photos": false,
                "can_send_videos": false,
                "can_send_other_messages": false,
            },
        });
        self.call_with_retry("restrictChatMember", &body).await?;
        Ok(())
    }

    async fn ack_action(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        // A single attempt: callback acknowledgements expire server-side,
        // retrying a stale one only earns a BadRequest.
        self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}

// ── Wire helpers ────────────────────────────────────────────────────

/// Inline keyboard layout: two controls per row.
fn keyboard(controls: &[Control]) -> Value {
    let rows: Vec<Value> = controls
        .chunks(2)
        .map(|row| {
            Value::Array(
                row.iter()
                    .map(|c| json!({ "text": c.label, "callback_data": c.data }))
                    .collect(),
            )
        })
        .collect();
    Value::Array(rows)
}

/// sendMediaGroup payload; the caption rides on the first item.
fn media_group(attachments: &[Attachment], caption: Option<&str>) -> Value {
    let items: Vec<Value> = attachments
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let kind = match a.kind {
                AttachmentKind::Photo => "photo",
                AttachmentKind::Video => "video",
            };
            let mut item = json!({ "type": kind, "media": a.media_ref });
            if i == 0
                && let Some(caption) = caption
            {
                item["caption"] = json!(caption);
            }
            item
        })
        .collect();
    Value::Array(items)
}

fn message_id(message: &Value) -> Result<i64, TransportError> {
    message
        .get("message_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| TransportError::Http("response carried no message_id".into()))
}

/// Normalize one raw update into an [`Inbound`] event. Updates that carry
/// nothing actionable (joins, pins, unparseable callbacks) yield `None`.
fn normalize_update(update: &Value) -> Option<Inbound> {
    if let Some(callback) = update.get("callback_query") {
        return normalize_callback(callback);
    }
    let message = update.get("message")?;
    normalize_message(message)
}

fn normalize_callback(callback: &Value) -> Option<Inbound> {
    let data = callback.get("data").and_then(Value::as_str)?;
    let (kind, report_id) = parse_callback(data)?;
    let chat_id = callback.pointer("/message/chat/id").and_then(Value::as_i64)?;
    let callback_id = callback.get("id").and_then(Value::as_str)?.to_string();
    Some(Inbound::Action(OperatorAction {
        kind,
        report_id,
        chat_id,
        callback_id,
    }))
}

fn normalize_message(message: &Value) -> Option<Inbound> {
    let chat_id = message.pointer("/chat/id").and_then(Value::as_i64)?;
    let sender_id = message.pointer("/from/id").and_then(Value::as_i64)?;
    let message_id = message.get("message_id").and_then(Value::as_i64)?;

    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str)
        .map(String::from);

    if let Some(text) = text.as_deref() {
        match text.split_whitespace().next() {
            Some("/start") => {
                return Some(Inbound::Command(Command {
                    chat_id,
                    kind: CommandKind::Start,
                }));
            }
            Some("/cancel") => {
                return Some(Inbound::Command(Command {
                    chat_id,
                    kind: CommandKind::Cancel,
                }));
            }
            _ => {}
        }
    }

    // Photos arrive as a size ladder; the last entry is the largest.
    let attachment = if let Some(file_id) = message
        .get("photo")
        .and_then(Value::as_array)
        .and_then(|sizes| sizes.last())
        .and_then(|p| p.get("file_id"))
        .and_then(Value::as_str)
    {
        Some(Attachment::photo(file_id))
    } else {
        message
            .pointer("/video/file_id")
            .and_then(Value::as_str)
            .map(Attachment::video)
    };

    let correlation_id = message
        .get("media_group_id")
        .and_then(Value::as_str)
        .map(String::from);

    let sender_display = message
        .pointer("/from/username")
        .and_then(Value::as_str)
        .map(|u| format!("@{u}"))
        .or_else(|| {
            message
                .pointer("/from/first_name")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| "anonyme".into());

    Some(Inbound::Content(IncomingUnit {
        sender_id,
        origin_chat: chat_id,
        message_id,
        correlation_id,
        text,
        attachment,
        sender_display,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionKind;

    fn private_message(extra: Value) -> Value {
        let mut message = json!({
            "message_id": 1001,
            "chat": { "id": 42, "type": "private" },
            "from": { "id": 42, "username": "alice", "first_name": "Alice" },
        });
        if let (Some(dst), Some(src)) = (message.as_object_mut(), extra.as_object()) {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }
        json!({ "update_id": 7, "message": message })
    }

    #[test]
    fn api_url_embeds_the_token() {
        let transport = TelegramTransport::new(SecretString::from("123:ABC"));
        assert_eq!(
            transport.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn text_message_normalizes_to_content() {
        let update = private_message(json!({ "text": "Radar mobile A7" }));
        let Some(Inbound::Content(unit)) = normalize_update(&update) else {
            panic!("expected content");
        };
        assert_eq!(unit.sender_id, 42);
        assert_eq!(unit.message_id, 1001);
        assert_eq!(unit.text.as_deref(), Some("Radar mobile A7"));
        assert_eq!(unit.sender_display, "@alice");
        assert!(unit.correlation_id.is_none());
        assert!(unit.is_private());
    }

    #[test]
    fn photo_message_takes_the_largest_size() {
        let update = private_message(json!({
            "caption": "Accident N104",
            "photo": [
                { "file_id": "small", "width": 90 },
                { "file_id": "large", "width": 1280 },
            ],
        }));
        let Some(Inbound::Content(unit)) = normalize_update(&update) else {
            panic!("expected content");
        };
        assert_eq!(unit.attachment, Some(Attachment::photo("large")));
        assert_eq!(unit.text.as_deref(), Some("Accident N104"));
    }

    #[test]
    fn album_fragment_carries_the_correlation_id() {
        let update = private_message(json!({
            "media_group_id": "13577531",
            "photo": [{ "file_id": "f1" }],
        }));
        let Some(Inbound::Content(unit)) = normalize_update(&update) else {
            panic!("expected content");
        };
        assert_eq!(unit.correlation_id.as_deref(), Some("13577531"));
    }

    #[test]
    fn video_message_normalizes() {
        let update = private_message(json!({ "video": { "file_id": "v1" } }));
        let Some(Inbound::Content(unit)) = normalize_update(&update) else {
            panic!("expected content");
        };
        assert_eq!(unit.attachment, Some(Attachment::video("v1")));
    }

    #[test]
    fn slash_commands_normalize_to_commands() {
        let start = private_message(json!({ "text": "/start" }));
        let Some(Inbound::Command(cmd)) = normalize_update(&start) else {
            panic!("expected command");
        };
        assert_eq!(cmd.kind, CommandKind::Start);
        assert_eq!(cmd.chat_id, 42);

        let cancel = private_message(json!({ "text": "/cancel" }));
        let Some(Inbound::Command(cmd)) = normalize_update(&cancel) else {
            panic!("expected command");
        };
        assert_eq!(cmd.kind, CommandKind::Cancel);
    }

    #[test]
    fn callback_query_normalizes_to_action() {
        let update = json!({
            "update_id": 8,
            "callback_query": {
                "id": "cb-9",
                "data": "approve|42:1001",
                "message": { "chat": { "id": -100 } },
            },
        });
        let Some(Inbound::Action(action)) = normalize_update(&update) else {
            panic!("expected action");
        };
        assert_eq!(action.kind, ActionKind::Approve);
        assert_eq!(action.report_id.as_str(), "42:1001");
        assert_eq!(action.chat_id, -100);
        assert_eq!(action.callback_id, "cb-9");
    }

    #[test]
    fn malformed_callback_is_dropped() {
        let update = json!({
            "update_id": 8,
            "callback_query": {
                "id": "cb-9",
                "data": "nonsense",
                "message": { "chat": { "id": -100 } },
            },
        });
        assert!(normalize_update(&update).is_none());
    }

    #[test]
    fn service_update_is_dropped() {
        let update = private_message(json!({ "new_chat_members": [] }));
        // No text, no media: still a content unit; intake ignores it.
        assert!(matches!(
            normalize_update(&update),
            Some(Inbound::Content(_))
        ));
        assert!(normalize_update(&json!({ "update_id": 9 })).is_none());
    }

    #[test]
    fn missing_username_falls_back_to_first_name() {
        let update = json!({
            "update_id": 7,
            "message": {
                "message_id": 1,
                "chat": { "id": 5 },
                "from": { "id": 5, "first_name": "Ano" },
                "text": "hello",
            },
        });
        let Some(Inbound::Content(unit)) = normalize_update(&update) else {
            panic!("expected content");
        };
        assert_eq!(unit.sender_display, "Ano");
    }

    #[test]
    fn keyboard_lays_controls_out_two_per_row() {
        let id = crate::model::ReportId::for_message(1, 2);
        let controls = crate::model::review_controls(&id);
        let kb = keyboard(&controls);
        let rows = kb.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_array().unwrap().len(), 2);
        assert_eq!(
            rows[0][0]["callback_data"].as_str().unwrap(),
            "approve|1:2"
        );
    }

    #[test]
    fn media_group_captions_only_the_first_item() {
        let group = media_group(
            &[Attachment::photo("f1"), Attachment::video("f2")],
            Some("légende"),
        );
        let items = group.as_array().unwrap();
        assert_eq!(items[0]["caption"].as_str(), Some("légende"));
        assert_eq!(items[0]["type"].as_str(), Some("photo"));
        assert_eq!(items[1]["type"].as_str(), Some("video"));
        assert!(items[1].get("caption").is_none());
    }
}
