use thiserror::Error;

use crate::llm::LlmError;
use crate::platform::WhatsAppError;

/// Startup configuration errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Per-message relay failures. Terminal for that message only.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("completion failed for message {message_id}")]
    CompletionFailed {
        message_id: String,
        #[source]
        source: LlmError,
    },

    #[error("delivery to {chat_id} failed")]
    DeliveryFailed {
        chat_id: String,
        #[source]
        source: WhatsAppError,
    },
}
