use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::llm::{CompletionProvider, LlmError};
use crate::platform::greenapi::{truncate_chars, MAX_MESSAGE_CHARS};
use crate::platform::{normalize_chat_id, InboundMessage, MessageSender, OutboundReply};

/// What happened to a single inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Replied { reply_id: String },
    Ignored,
}

/// Turns inbound WhatsApp messages into AI replies.
/// Stateless: every message is handled on its own.
pub struct Relay {
    completions: Arc<dyn CompletionProvider>,
    sender: Arc<dyn MessageSender>,
    /// Normalized chat ids; `None` allows everyone.
    allowed_senders: Option<Vec<String>>,
}

impl Relay {
    pub fn new(
        completions: Arc<dyn CompletionProvider>,
        sender: Arc<dyn MessageSender>,
        config: RelayConfig,
    ) -> Self {
        let allowed_senders = (!config.allowed_senders.is_empty()).then(|| {
            config
                .allowed_senders
                .iter()
                .filter_map(|entry| match normalize_chat_id(entry) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!("Dropping allow-list entry: {}", e);
                        None
                    }
                })
                .collect()
        });

        Self {
            completions,
            sender,
            allowed_senders,
        }
    }

    /// Exact match on normalized chat ids.
    fn is_allowed(&self, sender_id: &str) -> bool {
        let Some(allowed) = &self.allowed_senders else {
            return true;
        };
        normalize_chat_id(sender_id).is_ok_and(|id| allowed.contains(&id))
    }

    /// Run one request/response cycle: completion, then one send attempt.
    pub async fn handle(&self, message: &InboundMessage) -> Result<Outcome, RelayError> {
        if message.text.trim().is_empty() {
            debug!("Ignoring message {} without text", message.message_id);
            return Ok(Outcome::Ignored);
        }

        if !self.is_allowed(&message.sender_id) {
            debug!("Ignoring message from {} (not allowed)", message.sender_id);
            return Ok(Outcome::Ignored);
        }

        info!(
            "WhatsApp message from {} in {} at {}: {} chars",
            message.sender_label(),
            message.chat_id,
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.text.len()
        );

        let completion = self
            .completions
            .complete(&message.text, Some(message.sender_label()))
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(LlmError::EmptyResponse)
                } else {
                    Ok(text)
                }
            })
            .map_err(|source| RelayError::CompletionFailed {
                message_id: message.message_id.clone(),
                source,
            })?;

        let reply = OutboundReply {
            chat_id: message.chat_id.clone(),
            text: truncate_chars(&completion, MAX_MESSAGE_CHARS).to_string(),
        };

        let receipt = self
            .sender
            .send(&reply)
            .await
            .map_err(|source| RelayError::DeliveryFailed {
                chat_id: reply.chat_id.clone(),
                source,
            })?;

        Ok(Outcome::Replied {
            reply_id: receipt.message_id,
        })
    }

    /// Handle a message and log the result. Never fails, so one bad message
    /// cannot take down the caller's dispatch loop.
    #[instrument(
        skip(self, message),
        fields(message_id = %message.message_id, chat_id = %message.chat_id)
    )]
    pub async fn dispatch(&self, message: InboundMessage) -> Option<Outcome> {
        match self.handle(&message).await {
            Ok(outcome) => {
                if let Outcome::Replied { reply_id } = &outcome {
                    info!("Reply {} sent to {}", reply_id, message.chat_id);
                }
                Some(outcome)
            }
            Err(e @ RelayError::CompletionFailed { .. }) => {
                error!("{:#}", anyhow::Error::from(e));
                None
            }
            Err(e @ RelayError::DeliveryFailed { .. }) => {
                warn!("{:#}", anyhow::Error::from(e));
                None
            }
        }
    }
}
