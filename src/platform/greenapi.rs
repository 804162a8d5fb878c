//! GreenAPI gateway client
//!
//! Every call goes to `{api_url}/waInstance{id}/{method}/{token}`. Inbound
//! messages arrive as notifications, either pushed to the webhook or fetched
//! through `receiveNotification`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
    normalize_chat_id, InboundMessage, MessageSender, OutboundReply, SendReceipt, WhatsAppError,
};
use crate::config::WhatsAppConfig;

/// Longest text GreenAPI accepts in a single `sendMessage`.
pub const MAX_MESSAGE_CHARS: usize = 20_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageResponse {
    id_message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateInstanceResponse {
    state_instance: String,
}

#[derive(Debug, Deserialize)]
struct DeleteNotificationResponse {
    #[serde(default)]
    result: bool,
}

/// A queued notification returned by `receiveNotification`.
///
/// `body` stays untyped so a notification the relay cannot decode can still
/// be acknowledged by its receipt id.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedNotification {
    pub receipt_id: u64,
    pub body: serde_json::Value,
}

impl ReceivedNotification {
    /// The `typeWebhook` of the body, for logging.
    pub fn kind(&self) -> &str {
        self.body
            .get("typeWebhook")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
    }
}

/// GreenAPI webhook body. Only the fields the relay reads are modelled.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub type_webhook: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub id_message: Option<String>,
    #[serde(default)]
    pub sender_data: Option<SenderData>,
    #[serde(default)]
    pub message_data: Option<MessageData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderData {
    pub chat_id: String,
    pub sender: String,
    #[serde(default)]
    pub sender_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub type_message: String,
    #[serde(default)]
    pub text_message_data: Option<TextMessageData>,
    #[serde(default)]
    pub extended_text_message_data: Option<ExtendedTextMessageData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessageData {
    pub text_message: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendedTextMessageData {
    pub text: String,
}

impl Notification {
    /// Decode a raw webhook body. Bodies outside the modelled schema give
    /// `None` instead of an error.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match serde_json::from_value(value) {
            Ok(notification) => Some(notification),
            Err(e) => {
                debug!("Notification outside the known schema: {}", e);
                None
            }
        }
    }

    /// Extract the inbound text message, if this notification carries one.
    ///
    /// Anything other than an incoming text (status updates, outgoing
    /// echoes, media, polls, ...) yields `None`.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        if self.type_webhook != "incomingMessageReceived" {
            return None;
        }

        let sender = self.sender_data?;
        let data = self.message_data?;

        let text = match data.type_message.as_str() {
            "textMessage" => data.text_message_data.map(|d| d.text_message),
            "extendedTextMessage" | "quotedMessage" => {
                data.extended_text_message_data.map(|d| d.text)
            }
            _ => None,
        }?;

        let timestamp = self
            .timestamp
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        Some(InboundMessage {
            message_id: self.id_message.unwrap_or_default(),
            sender_id: sender.sender,
            sender_name: sender.sender_name,
            chat_id: sender.chat_id,
            text,
            timestamp,
        })
    }
}

/// Truncate `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Every URL carries the API token, so transport errors drop theirs.
fn request_error(e: reqwest::Error) -> WhatsAppError {
    WhatsAppError::Request(e.without_url())
}

#[derive(Debug, Clone)]
pub struct GreenApiClient {
    client: reqwest::Client,
    config: WhatsAppConfig,
}

impl GreenApiClient {
    pub fn new(config: WhatsAppConfig, timeout: Duration) -> Result<Self, WhatsAppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(request_error)?;
        Ok(Self { client, config })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/waInstance{}/{}/{}",
            self.config.api_url, self.config.instance_id, method, self.config.api_token
        )
    }

    async fn parse<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, WhatsAppError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhatsAppError::Api {
                status: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(request_error)
    }

    /// Send a text message to a chat id or bare phone number.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
    ) -> Result<SendReceipt, WhatsAppError> {
        let chat_id = normalize_chat_id(chat_id)?;
        let request = SendMessageRequest {
            chat_id: &chat_id,
            message: text,
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        let sent: SendMessageResponse = Self::parse(response).await?;
        debug!(id_message = %sent.id_message, "Message accepted by GreenAPI");

        Ok(SendReceipt {
            message_id: sent.id_message,
        })
    }

    /// Current authorization state of the instance (`authorized`,
    /// `notAuthorized`, `blocked`, ...).
    pub async fn state_instance(&self) -> Result<String, WhatsAppError> {
        let response = self
            .client
            .get(self.method_url("getStateInstance"))
            .send()
            .await
            .map_err(request_error)?;

        let state: StateInstanceResponse = Self::parse(response).await?;
        Ok(state.state_instance)
    }

    /// Long-poll the notification queue. `Ok(None)` means the queue stayed
    /// empty for `receive_timeout_secs`.
    pub async fn receive_notification(
        &self,
        receive_timeout_secs: u64,
    ) -> Result<Option<ReceivedNotification>, WhatsAppError> {
        let response = self
            .client
            .get(self.method_url("receiveNotification"))
            .query(&[("receiveTimeout", receive_timeout_secs)])
            .timeout(Duration::from_secs(receive_timeout_secs + 10))
            .send()
            .await
            .map_err(request_error)?;

        Self::parse(response).await
    }

    /// Acknowledge a notification so the queue moves on.
    pub async fn delete_notification(&self, receipt_id: u64) -> Result<bool, WhatsAppError> {
        let url = format!("{}/{}", self.method_url("deleteNotification"), receipt_id);
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(request_error)?;

        let deleted: DeleteNotificationResponse = Self::parse(response).await?;
        Ok(deleted.result)
    }
}

#[async_trait]
impl MessageSender for GreenApiClient {
    async fn send(&self, reply: &OutboundReply) -> Result<SendReceipt, WhatsAppError> {
        self.send_message(&reply.chat_id, &reply.text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GreenApiClient {
        let config = WhatsAppConfig {
            instance_id: "1101000001".to_string(),
            api_token: "tok".to_string(),
            api_url: server.uri(),
        };
        GreenApiClient::new(config, Duration::from_secs(5)).unwrap()
    }

    fn incoming_text(chat_id: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "typeWebhook": "incomingMessageReceived",
            "instanceData": {
                "idInstance": 1101000001,
                "wid": "11001234567@c.us",
                "typeInstance": "whatsapp"
            },
            "timestamp": 1588091580,
            "idMessage": "F7AEC1B7086ECDC7E6E45923F5EDB825",
            "senderData": {
                "chatId": chat_id,
                "sender": "79001234568@c.us",
                "senderName": "Green API"
            },
            "messageData": {
                "typeMessage": "textMessage",
                "textMessageData": { "textMessage": text }
            }
        })
    }

    #[test]
    fn test_text_notification_decodes() {
        let notification: Notification =
            serde_json::from_value(incoming_text("79001234568@c.us", "Hello")).unwrap();
        let msg = notification.into_inbound().unwrap();

        assert_eq!(msg.message_id, "F7AEC1B7086ECDC7E6E45923F5EDB825");
        assert_eq!(msg.chat_id, "79001234568@c.us");
        assert_eq!(msg.sender_id, "79001234568@c.us");
        assert_eq!(msg.sender_name.as_deref(), Some("Green API"));
        assert_eq!(msg.text, "Hello");
        assert_eq!(msg.timestamp.timestamp(), 1588091580);
    }

    #[test]
    fn test_extended_and_quoted_text_decode() {
        for kind in ["extendedTextMessage", "quotedMessage"] {
            let notification: Notification = serde_json::from_value(serde_json::json!({
                "typeWebhook": "incomingMessageReceived",
                "idMessage": "A1",
                "senderData": { "chatId": "120363@g.us", "sender": "555@c.us" },
                "messageData": {
                    "typeMessage": kind,
                    "extendedTextMessageData": { "text": "see https://example.com" }
                }
            }))
            .unwrap();

            let msg = notification.into_inbound().unwrap();
            assert_eq!(msg.chat_id, "120363@g.us");
            assert_eq!(msg.sender_id, "555@c.us");
            assert_eq!(msg.text, "see https://example.com");
        }
    }

    #[test]
    fn test_non_text_notifications_are_ignored() {
        let image: Notification = serde_json::from_value(serde_json::json!({
            "typeWebhook": "incomingMessageReceived",
            "senderData": { "chatId": "1@c.us", "sender": "1@c.us" },
            "messageData": {
                "typeMessage": "imageMessage",
                "fileMessageData": { "downloadUrl": "https://example.com/a.jpg", "caption": "look" }
            }
        }))
        .unwrap();
        assert!(image.into_inbound().is_none());

        let status: Notification = serde_json::from_value(serde_json::json!({
            "typeWebhook": "outgoingMessageStatus",
            "idMessage": "X",
            "status": "delivered"
        }))
        .unwrap();
        assert!(status.into_inbound().is_none());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("😀😀😀", 1), "😀");
    }

    #[tokio::test]
    async fn test_send_message_normalizes_chat_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/waInstance1101000001/sendMessage/tok"))
            .and(body_json(serde_json::json!({
                "chatId": "491234567890@c.us",
                "message": "Hi there!"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "idMessage": "3EB0C767D097B7C7C030" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let receipt = client_for(&server)
            .send_message("+491234567890", "Hi there!")
            .await
            .unwrap();
        assert_eq!(receipt.message_id, "3EB0C767D097B7C7C030");
    }

    #[tokio::test]
    async fn test_send_message_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/waInstance1101000001/sendMessage/tok"))
            .respond_with(ResponseTemplate::new(466).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .send(&OutboundReply {
                chat_id: "123".to_string(),
                text: "x".to_string(),
            })
            .await
            .unwrap_err();

        match err {
            WhatsAppError::Api { status, body } => {
                assert_eq!(status, 466);
                assert_eq!(body, "quota exceeded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_message_rejects_names_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .send_message("Alice", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, WhatsAppError::InvalidChatId(_)));
    }

    #[tokio::test]
    async fn test_state_instance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/waInstance1101000001/getStateInstance/tok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "stateInstance": "authorized" })),
            )
            .mount(&server)
            .await;

        let state = client_for(&server).state_instance().await.unwrap();
        assert_eq!(state, "authorized");
    }

    #[tokio::test]
    async fn test_receive_notification_empty_queue() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/waInstance1101000001/receiveNotification/tok"))
            .and(query_param("receiveTimeout", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;

        let received = client_for(&server).receive_notification(1).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_receive_and_delete_notification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/waInstance1101000001/receiveNotification/tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "receiptId": 42,
                "body": incoming_text("123@c.us", "Hello")
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/waInstance1101000001/deleteNotification/tok/42"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": true })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let received = client.receive_notification(1).await.unwrap().unwrap();
        assert_eq!(received.receipt_id, 42);
        assert_eq!(received.kind(), "incomingMessageReceived");
        let notification = Notification::from_value(received.body).unwrap();
        assert_eq!(notification.into_inbound().unwrap().text, "Hello");

        assert!(client.delete_notification(42).await.unwrap());
    }

    #[test]
    fn test_off_schema_body_decodes_to_none() {
        let body = serde_json::json!({
            "typeWebhook": "incomingMessageReceived",
            "senderData": { "chatId": "1@c.us" },
            "messageData": { "textMessageData": { "textMessage": "hi" } }
        });
        assert!(Notification::from_value(body).is_none());
    }

    #[tokio::test]
    async fn test_transport_errors_hide_api_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "idMessage": "late" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let config = WhatsAppConfig {
            instance_id: "42".to_string(),
            api_token: "SECRETTOKEN".to_string(),
            api_url: server.uri(),
        };
        let client = GreenApiClient::new(config, Duration::from_millis(50)).unwrap();

        let err = client.send_message("123", "hi").await.unwrap_err();
        match &err {
            WhatsAppError::Request(e) => assert!(e.is_timeout()),
            other => panic!("unexpected error: {other:?}"),
        }
        let rendered = format!("{:#}", anyhow::Error::from(err));
        assert!(!rendered.contains("SECRETTOKEN"), "token leaked: {rendered}");
    }
}
