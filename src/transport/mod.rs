//! Transport abstraction — everything the relay needs from the chat API.

pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TransportError;
use crate::model::{Attachment, Control, IncomingUnit, OperatorAction};

pub use telegram::TelegramTransport;

/// Where a message goes: a chat, optionally a forum topic within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub chat_id: i64,
    pub topic_id: Option<i64>,
}

impl Destination {
    pub fn chat(chat_id: i64) -> Self {
        Self {
            chat_id,
            topic_id: None,
        }
    }

    pub fn topic(chat_id: i64, topic_id: Option<i64>) -> Self {
        Self { chat_id, topic_id }
    }
}

/// Normalized inbound event from the transport receive loop.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A unit of user content.
    Content(IncomingUnit),
    /// An operator clicked a review control.
    Action(OperatorAction),
    /// A slash command.
    Command(Command),
}

#[derive(Debug, Clone)]
pub struct Command {
    pub chat_id: i64,
    pub kind: CommandKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Cancel,
}

/// Outbound side of the transport. All calls are fallible; callers contain
/// failures per item so one bad send never stops a consumer loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send text, optionally with inline action controls. Returns the
    /// transport message id.
    async fn send_text(
        &self,
        dest: Destination,
        text: &str,
        controls: &[Control],
    ) -> Result<i64, TransportError>;

    /// Send one or more media items. A single attachment goes out as one
    /// captioned message; several go out as a grouped album with the
    /// caption on the first item. Returns all produced message ids.
    async fn send_media(
        &self,
        dest: Destination,
        attachments: &[Attachment],
        caption: Option<&str>,
    ) -> Result<Vec<i64>, TransportError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TransportError>;

    /// Restrict a sender in a chat until the given instant.
    async fn restrict_sender(
        &self,
        chat_id: i64,
        sender_id: i64,
        until: DateTime<Utc>,
    ) -> Result<(), TransportError>;

    /// Acknowledge an operator control click, optionally with a toast.
    async fn ack_action(&self, callback_id: &str, text: Option<&str>)
        -> Result<(), TransportError>;
}
