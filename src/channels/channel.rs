//! Channel trait and the message envelope types shared by all transports.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::channels::keyboard::Keyboard;
use crate::error::ChannelError;
use crate::form::input::Intent;
use crate::form::model::SubmitterIdentity;

/// A classified inbound event.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Name of the channel that produced the event.
    pub channel: String,
    /// Who sent it; taken from the event envelope.
    pub submitter: SubmitterIdentity,
    pub intent: Intent,
    /// Transport-specific routing data (e.g. Telegram `chat_id`).
    pub metadata: serde_json::Value,
}

impl IncomingMessage {
    pub fn new(channel: impl Into<String>, submitter: SubmitterIdentity, intent: Intent) -> Self {
        Self {
            channel: channel.into(),
            submitter,
            intent,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn submitter_id(&self) -> i64 {
        self.submitter.id
    }
}

/// A file sent alongside (or instead of) text.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A reply to an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingResponse {
    /// Message text, or the caption when an attachment is present.
    pub content: String,
    /// Keyboard to show with this message; `None` leaves the current one.
    pub keyboard: Option<Keyboard>,
    pub attachment: Option<Attachment>,
    /// Whether `content` may carry Markdown. Off for text that echoes user
    /// input.
    pub markdown: bool,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            keyboard: None,
            attachment: None,
            markdown: true,
        }
    }

    pub fn document(file_name: impl Into<String>, bytes: Vec<u8>, caption: impl Into<String>) -> Self {
        Self {
            content: caption.into(),
            keyboard: None,
            attachment: Some(Attachment {
                file_name: file_name.into(),
                bytes,
            }),
            markdown: true,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    /// Send `content` verbatim, without Markdown parsing.
    pub fn plain(mut self) -> Self {
        self.markdown = false;
        self
    }
}

/// Stream of inbound events produced by [`Channel::start`].
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A message transport.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving events.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send a reply to the chat that produced `msg`.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
