//! Core data model: reports, attachments, queue items, operator actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between the callback action code and the report id.
const CALLBACK_SEPARATOR: char = '|';

// ── Report identity ─────────────────────────────────────────────────

/// Stable report identifier, deterministic from the submission's origin.
///
/// Single messages map to `{sender_id}:{message_id}`, albums to
/// `{sender_id}:a:{correlation_id}`. Duplicate delivery of the same
/// fragment can therefore never mint a second id, and the sender id can
/// be decoded back out of the id (needed for reject+mute).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(String);

impl ReportId {
    pub fn for_message(sender_id: i64, message_id: i64) -> Self {
        Self(format!("{sender_id}:{message_id}"))
    }

    pub fn for_album(sender_id: i64, correlation_id: &str) -> Self {
        Self(format!("{sender_id}:a:{correlation_id}"))
    }

    /// Reconstruct an id from its wire form (callback data, DB row).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Decode the originating sender id.
    pub fn sender_id(&self) -> Option<i64> {
        self.0.split(':').next()?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Attachments ─────────────────────────────────────────────────────

/// Media kind of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Photo,
    Video,
}

/// One media item of a submission. `media_ref` is the transport's opaque
/// handle (Telegram file_id); the relay never downloads the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub media_ref: String,
}

impl Attachment {
    pub fn photo(media_ref: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Photo,
            media_ref: media_ref.into(),
        }
    }

    pub fn video(media_ref: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Video,
            media_ref: media_ref.into(),
        }
    }
}

// ── Report ──────────────────────────────────────────────────────────

/// One user submission awaiting an operator decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub id: ReportId,
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    pub sender_display: String,
}

impl Report {
    /// Admin-facing preview text rendered above the action controls.
    pub fn preview_text(&self) -> String {
        format!(
            "📩 Nouveau signalement\n👤 {}\n\n{}",
            self.sender_display,
            self.text.as_deref().unwrap_or("")
        )
    }
}

/// Ephemeral review-queue entry, consumed exactly once by the dispatcher.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub report_id: ReportId,
    pub preview_text: String,
    pub attachments: Vec<Attachment>,
}

impl From<&Report> for QueueItem {
    fn from(report: &Report) -> Self {
        Self {
            report_id: report.id.clone(),
            preview_text: report.preview_text(),
            attachments: report.attachments.clone(),
        }
    }
}

// ── Inbound content ─────────────────────────────────────────────────

/// Normalized unit of inbound content, produced by the transport adapter.
#[derive(Debug, Clone)]
pub struct IncomingUnit {
    pub sender_id: i64,
    pub origin_chat: i64,
    pub message_id: i64,
    /// Album correlation id (media_group_id); `None` for standalone items.
    pub correlation_id: Option<String>,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub sender_display: String,
}

impl IncomingUnit {
    /// Whether this unit arrived in the sender's private chat with the bot.
    pub fn is_private(&self) -> bool {
        self.origin_chat == self.sender_id
    }
}

// ── Operator actions ────────────────────────────────────────────────

/// The four operator decisions, as encoded in control callback data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Approve,
    Edit,
    Reject,
    RejectAndMute,
}

impl ActionKind {
    pub fn code(self) -> &'static str {
        match self {
            ActionKind::Approve => "approve",
            ActionKind::Edit => "edit",
            ActionKind::Reject => "reject",
            ActionKind::RejectAndMute => "mute",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "approve" => Some(ActionKind::Approve),
            "edit" => Some(ActionKind::Edit),
            "reject" => Some(ActionKind::Reject),
            "mute" => Some(ActionKind::RejectAndMute),
            _ => None,
        }
    }

    /// Callback payload carried by the inline control for `report_id`.
    pub fn callback_data(self, report_id: &ReportId) -> String {
        format!("{}{}{}", self.code(), CALLBACK_SEPARATOR, report_id)
    }
}

/// Parse a control callback payload back into `(kind, report_id)`.
///
/// This is the only place callback data is decoded; everything past the
/// transport boundary works with the typed [`OperatorAction`].
pub fn parse_callback(data: &str) -> Option<(ActionKind, ReportId)> {
    let (code, raw_id) = data.split_once(CALLBACK_SEPARATOR)?;
    if raw_id.is_empty() {
        return None;
    }
    Some((ActionKind::from_code(code)?, ReportId::from_raw(raw_id)))
}

/// A typed operator action, constructed at the transport boundary.
#[derive(Debug, Clone)]
pub struct OperatorAction {
    pub kind: ActionKind,
    pub report_id: ReportId,
    /// Chat the control was clicked in (the admin group).
    pub chat_id: i64,
    /// Transport handle for acknowledging the click.
    pub callback_id: String,
}

/// An inline action control attached to a rendered preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub label: String,
    pub data: String,
}

impl Control {
    pub fn new(label: impl Into<String>, kind: ActionKind, report_id: &ReportId) -> Self {
        Self {
            label: label.into(),
            data: kind.callback_data(report_id),
        }
    }
}

/// The standard review control row for a report.
pub fn review_controls(report_id: &ReportId) -> Vec<Control> {
    vec![
        Control::new("✅ Publier", ActionKind::Approve, report_id),
        Control::new("✏️ Modifier", ActionKind::Edit, report_id),
        Control::new("❌ Supprimer", ActionKind::Reject, report_id),
        Control::new("🔇 Suppr. + Mute", ActionKind::RejectAndMute, report_id),
    ]
}

// ── Edit sessions ───────────────────────────────────────────────────

/// At most one concurrent edit per operator chat; opening a new one
/// supersedes the old.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub chat_id: i64,
    pub report_id: ReportId,
    pub prompt_message_id: i64,
}
