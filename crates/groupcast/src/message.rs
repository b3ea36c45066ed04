//! Wire message types.

use serde::{Deserialize, Serialize};

/// Encoding of a data message's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// JSON content. The only type channels route.
    Json,
    /// Plain text content.
    Text,
    /// Binary content.
    Binary,
    /// Protobuf-encoded content.
    Protobuf,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Json => write!(f, "json"),
            DataType::Text => write!(f, "text"),
            DataType::Binary => write!(f, "binary"),
            DataType::Protobuf => write!(f, "protobuf"),
        }
    }
}

/// The envelope carried inside a JSON group message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Wire event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Create a new envelope.
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Encode the envelope as message content.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "event": self.event,
            "payload": self.payload,
        })
    }
}

/// A data message delivered to a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDataMessage {
    /// Group the message was sent to.
    pub group: String,
    /// Content encoding.
    pub data_type: DataType,
    /// Message content.
    pub data: serde_json::Value,
    /// Sequence id assigned by the service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
    /// User id of the sending connection, if the sender was a client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<String>,
}

/// A data message sent by the service to a single connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDataMessage {
    /// Content encoding.
    pub data_type: DataType,
    /// Message content.
    pub data: serde_json::Value,
    /// Sequence id assigned by the service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
}

/// A decoded channel event, as handed to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    /// Raw wire event name.
    pub event: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Sequence id of the carrying group message.
    pub sequence_id: Option<u64>,
    /// User id of the sender, if known.
    pub from_user_id: Option<String>,
}

/// Acknowledgement of a request to the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResult {
    /// Ack id of the request, if one was assigned.
    pub ack_id: Option<u64>,
    /// The service had already applied this request (e.g. the group was
    /// joined before a reconnect). Not an error.
    pub is_duplicated: bool,
}

/// Options for [`crate::Transport::send_event`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventOptions {
    /// Explicit ack id. The transport assigns one when absent.
    pub ack_id: Option<u64>,
    /// Do not wait for the service's acknowledgement.
    pub fire_and_forget: bool,
}
