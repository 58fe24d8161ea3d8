//! Wire types for the Feishu open platform subset the channel uses.

use serde::Deserialize;

/// Response of `auth/v3/tenant_access_token/internal`.
#[derive(Debug, Deserialize)]
pub struct TenantTokenResponse {
    /// 0 on success.
    pub code: i64,
    /// Error description.
    #[serde(default)]
    pub msg: String,
    /// The token, valid for `expire` seconds.
    #[serde(default)]
    pub tenant_access_token: String,
    /// Token lifetime in seconds.
    #[serde(default)]
    pub expire: u64,
}

/// Envelope of an event pushed over the websocket subscription.
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    /// Event metadata.
    #[serde(default)]
    pub header: Option<EventHeader>,
    /// Event payload.
    #[serde(default)]
    pub event: Option<MessageEvent>,
}

/// Event metadata.
#[derive(Debug, Deserialize)]
pub struct EventHeader {
    /// E.g. "im.message.receive_v1".
    #[serde(default)]
    pub event_type: String,
}

/// Payload of `im.message.receive_v1`.
#[derive(Debug, Deserialize)]
pub struct MessageEvent {
    /// Who sent the message.
    #[serde(default)]
    pub sender: Option<Sender>,
    /// The message itself.
    #[serde(default)]
    pub message: Option<EventMessage>,
}

/// Message sender identity.
#[derive(Debug, Deserialize)]
pub struct Sender {
    /// Sender ids.
    #[serde(default)]
    pub sender_id: Option<SenderId>,
}

/// The id bundle Feishu attaches to a sender.
#[derive(Debug, Deserialize)]
pub struct SenderId {
    /// The open id, stable per app.
    #[serde(default)]
    pub open_id: String,
}

/// An inbound message.
#[derive(Debug, Deserialize)]
pub struct EventMessage {
    /// Chat the message belongs to.
    #[serde(default)]
    pub chat_id: String,
    /// "text", "image", ...
    #[serde(default)]
    pub message_type: String,
    /// JSON-encoded content; for text: `{"text":"..."}`.
    #[serde(default)]
    pub content: String,
}

impl EventMessage {
    /// Extract plain text from the JSON-encoded content.
    pub fn text(&self) -> Option<String> {
        if self.message_type != "text" {
            return None;
        }
        let content: serde_json::Value = serde_json::from_str(&self.content).ok()?;
        content["text"].as_str().map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_token_parses() {
        let json = r#"{"code":0,"msg":"ok","tenant_access_token":"t-abc","expire":7200}"#;
        let resp: TenantTokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.code, 0);
        assert_eq!(resp.tenant_access_token, "t-abc");
        assert_eq!(resp.expire, 7200);
    }

    #[test]
    fn message_event_parses() {
        let json = r#"{
            "header": {"event_type": "im.message.receive_v1"},
            "event": {
                "sender": {"sender_id": {"open_id": "ou_123"}},
                "message": {
                    "chat_id": "oc_456",
                    "message_type": "text",
                    "content": "{\"text\":\"hello\"}"
                }
            }
        }"#;
        let envelope: EventEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            envelope.header.unwrap().event_type,
            "im.message.receive_v1"
        );
        let event = envelope.event.unwrap();
        assert_eq!(event.sender.unwrap().sender_id.unwrap().open_id, "ou_123");
        let message = event.message.unwrap();
        assert_eq!(message.chat_id, "oc_456");
        assert_eq!(message.text().as_deref(), Some("hello"));
    }

    #[test]
    fn non_text_message_has_no_text() {
        let message = EventMessage {
            chat_id: "oc".into(),
            message_type: "image".into(),
            content: r#"{"image_key":"k"}"#.into(),
        };
        assert!(message.text().is_none());
    }

    #[test]
    fn malformed_content_has_no_text() {
        let message = EventMessage {
            chat_id: "oc".into(),
            message_type: "text".into(),
            content: "not json".into(),
        };
        assert!(message.text().is_none());
    }
}
