//! Bus wire format
//!
//! Every message published on the bus is wrapped in a [`BusEnvelope`]
//! carrying the id of the instance that published it. Envelopes travel as
//! JSON text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::BusError;

/// Replicated operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    /// Deliver a payload to local subscribers of a channel
    Broadcast { channel: String, payload: Value },
    /// Subscribe a connection, if it lives on the receiving instance
    Subscribe { channel: String, uid: String },
    /// Unsubscribe a connection, if it lives on the receiving instance
    Unsubscribe { channel: String, uid: String },
}

/// A bus message tagged with its publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    /// Instance id of the publisher
    pub origin: Uuid,
    #[serde(flatten)]
    pub message: BusMessage,
}

impl BusEnvelope {
    pub fn new(origin: Uuid, message: BusMessage) -> Self {
        Self { origin, message }
    }

    pub fn encode(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, BusError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_wire_format() {
        let origin = Uuid::new_v4();
        let envelope = BusEnvelope::new(
            origin,
            BusMessage::Broadcast {
                channel: "users/1".to_string(),
                payload: json!({ "text": "hi" }),
            },
        );

        let value: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "origin": origin.to_string(),
                "type": "broadcast",
                "channel": "users/1",
                "payload": { "text": "hi" }
            })
        );
    }

    #[test]
    fn test_decode_subscribe() {
        let origin = Uuid::new_v4();
        let raw = format!(
            r#"{{"origin":"{}","type":"subscribe","channel":"news","uid":"abc"}}"#,
            origin
        );

        let envelope = BusEnvelope::decode(&raw).unwrap();
        assert_eq!(envelope.origin, origin);
        assert_eq!(
            envelope.message,
            BusMessage::Subscribe {
                channel: "news".to_string(),
                uid: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let raw = format!(
            r#"{{"origin":"{}","type":"explode","channel":"news"}}"#,
            Uuid::new_v4()
        );

        assert!(matches!(
            BusEnvelope::decode(&raw),
            Err(BusError::Serialization(_))
        ));
    }
}
