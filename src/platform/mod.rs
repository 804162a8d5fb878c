pub mod greenapi;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("WhatsApp API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("invalid chat id: {0}")]
    InvalidChatId(String),
}

/// A text message received from WhatsApp
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    /// Sender id, e.g. `491234567890@c.us`
    pub sender_id: String,
    pub sender_name: Option<String>,
    /// Chat the message arrived in; differs from `sender_id` in groups
    pub chat_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Name to show the completion provider: display name if known, else id.
    pub fn sender_label(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.sender_id)
    }
}

/// A reply headed back to WhatsApp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub chat_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
}

/// Delivers a reply to a WhatsApp chat.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, reply: &OutboundReply) -> Result<SendReceipt, WhatsAppError>;
}

/// Normalize a phone number or chat id into WhatsApp chat id form.
///
/// Bare numbers (an optional leading `+` is dropped) become personal chats
/// (`<digits>@c.us`); ids already carrying `@c.us` or `@g.us` pass through.
pub fn normalize_chat_id(raw: &str) -> Result<String, WhatsAppError> {
    let trimmed = raw.trim();
    if trimmed.ends_with("@c.us") || trimmed.ends_with("@g.us") {
        return Ok(trimmed.to_string());
    }

    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return Ok(format!("{}@c.us", digits));
    }

    Err(WhatsAppError::InvalidChatId(raw.to_string()))
}
