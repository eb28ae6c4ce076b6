use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use treejar_core::domain::batch::{BufferedEvent, GroupKey};

use crate::client::ResilientClient;
use crate::errors::IntegrationError;

/// Wazzup v3 messaging gateway (WhatsApp). Authenticated with a static API key.
pub struct WazzupClient {
    client: ResilientClient,
    channel_id: Option<String>,
}

impl WazzupClient {
    pub fn new(client: ResilientClient, channel_id: Option<String>) -> Self {
        Self { client, channel_id }
    }

    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<String, IntegrationError> {
        let mut payload = self.base_payload(chat_id);
        payload["text"] = json!(text);
        self.send(payload).await
    }

    pub async fn send_media(
        &self,
        chat_id: &str,
        content_uri: &str,
        caption: Option<&str>,
    ) -> Result<String, IntegrationError> {
        let mut payload = self.base_payload(chat_id);
        payload["contentUri"] = json!(content_uri);
        if let Some(caption) = caption.filter(|caption| !caption.is_empty()) {
            payload["text"] = json!(caption);
        }
        self.send(payload).await
    }

    /// Pre-approved template, used for follow-ups outside the 24h session window.
    pub async fn send_template(
        &self,
        chat_id: &str,
        template_name: &str,
    ) -> Result<String, IntegrationError> {
        let mut payload = self.base_payload(chat_id);
        payload["template"] = json!(true);
        payload["text"] = json!(template_name);
        self.send(payload).await
    }

    fn base_payload(&self, chat_id: &str) -> Value {
        let mut payload = json!({ "chatId": chat_id, "chatType": "whatsapp" });
        if let Some(channel_id) = self.channel_id.as_deref().filter(|id| !id.is_empty()) {
            payload["channelId"] = json!(channel_id);
        }
        payload
    }

    async fn send(&self, payload: Value) -> Result<String, IntegrationError> {
        let response = self.client.post("/message", payload).await?;
        Ok(message_id(&response.body))
    }
}

fn message_id(body: &Value) -> String {
    let record = match body {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    record
        .and_then(|record| record.get("messageId"))
        .map(|id| match id {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WazzupWebhook {
    pub messages: Vec<IncomingMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub message_id: String,
    pub chat_id: String,
    pub chat_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub channel_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub media: Option<IncomingMedia>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMedia {
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

impl IncomingMessage {
    /// Messages are grouped per chat so one conversation turn sees every burst message.
    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.chat_id.clone())
    }

    pub fn to_buffered_event(&self) -> Result<BufferedEvent, serde_json::Error> {
        Ok(BufferedEvent {
            event_id: self.message_id.clone(),
            occurred_at: self.timestamp,
            payload: serde_json::to_value(self)?,
        })
    }
}
