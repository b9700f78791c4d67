use serde::Deserialize;
use serde_json::Value;

use super::dispatch::NotificationKind;
use super::Identity;

/// Render the text frame for a notification.
pub fn render_notification(kind: NotificationKind, identity: &Identity) -> String {
    match kind {
        NotificationKind::ConnectionEstablished => {
            format!("Connection established for user {}.", identity)
        }
        NotificationKind::MessageReceived => format!("Message received from user {}", identity),
    }
}

/// What an inbound frame turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Request to subscribe to a named data source. Acknowledged only.
    Subscribe {
        db: Option<String>,
        collection: Option<String>,
    },
    /// Any other text payload
    Text,
    /// Any binary payload
    Binary,
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    subscribe: Value,
    #[serde(default)]
    db: Option<String>,
    #[serde(default)]
    coll: Option<String>,
}

/// Classify a text frame. Only the subscription request shape is recognised.
pub fn parse_text_message(text: &str) -> ClientMessage {
    match serde_json::from_str::<SubscribeRequest>(text) {
        Ok(req) if is_truthy(&req.subscribe) => ClientMessage::Subscribe {
            db: req.db,
            collection: req.coll,
        },
        _ => ClientMessage::Text,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Log what the client sent. Payloads carry no behaviour beyond the
/// acknowledgement the caller sends afterwards.
pub fn handle_client_message(identity: &Identity, message: &ClientMessage) {
    match message {
        ClientMessage::Subscribe { db, collection } => {
            tracing::info!(
                identity = %identity,
                db = db.as_deref().unwrap_or(""),
                collection = collection.as_deref().unwrap_or(""),
                "Subscription request acknowledged"
            );
        }
        ClientMessage::Text => {
            tracing::debug!(identity = %identity, "Received text message");
        }
        ClientMessage::Binary => {
            tracing::debug!(identity = %identity, "Received binary message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_notifications() {
        let id = Identity::from("u1");
        assert_eq!(
            render_notification(NotificationKind::ConnectionEstablished, &id),
            "Connection established for user u1."
        );
        assert_eq!(
            render_notification(NotificationKind::MessageReceived, &id),
            "Message received from user u1"
        );
    }

    #[test]
    fn test_parse_subscribe_with_string_flag() {
        let msg = parse_text_message(r#"{"subscribe":"true","db":"auth","coll":"clients"}"#);
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                db: Some("auth".to_string()),
                collection: Some("clients".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_subscribe_with_bool_flag_and_missing_fields() {
        let msg = parse_text_message(r#"{"subscribe":true}"#);
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                db: None,
                collection: None,
            }
        );
    }

    #[test]
    fn test_non_subscribe_payloads_are_plain_text() {
        assert_eq!(parse_text_message("hello"), ClientMessage::Text);
        assert_eq!(parse_text_message(r#"{"subscribe":"false"}"#), ClientMessage::Text);
        assert_eq!(parse_text_message(r#"{"db":"auth"}"#), ClientMessage::Text);
    }
}
