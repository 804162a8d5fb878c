//! Recording stand-ins for the completion and send capabilities.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::RelayConfig;
use crate::llm::{CompletionProvider, LlmError};
use crate::platform::{MessageSender, OutboundReply, SendReceipt, WhatsAppError};
use crate::relay::Relay;

/// Returns a fixed reply, or fails with a 500 when built with `failing()`.
#[derive(Default)]
pub struct StubCompletions {
    reply: Option<String>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl StubCompletions {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    /// Every `(prompt, sender)` pair seen so far.
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for StubCompletions {
    async fn complete(&self, prompt: &str, sender: Option<&str>) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), sender.map(String::from)));
        match &self.reply {
            Some(text) => Ok(text.clone()),
            None => Err(LlmError::Api {
                status: 500,
                body: "boom".to_string(),
            }),
        }
    }
}

#[derive(Default)]
pub struct StubSender {
    fail: bool,
    sent: Mutex<Vec<OutboundReply>>,
}

impl StubSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Every reply handed to `send`, including failed attempts.
    pub fn sent(&self) -> Vec<OutboundReply> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for StubSender {
    async fn send(&self, reply: &OutboundReply) -> Result<SendReceipt, WhatsAppError> {
        self.sent.lock().unwrap().push(reply.clone());
        if self.fail {
            return Err(WhatsAppError::Api {
                status: 400,
                body: "bad chat".to_string(),
            });
        }
        Ok(SendReceipt {
            message_id: "sent-1".to_string(),
        })
    }
}

pub fn stub_relay(completions: &Arc<StubCompletions>, sender: &Arc<StubSender>) -> Arc<Relay> {
    Arc::new(Relay::new(
        completions.clone(),
        sender.clone(),
        RelayConfig::default(),
    ))
}
