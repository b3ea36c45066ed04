//! Error types for the connector.

use crate::channel::ChannelKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured failure detail reported by the service alongside a rejected
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error name (e.g. `Forbidden`).
    pub name: String,
    /// Human-readable description.
    pub message: String,
}

/// Errors that can occur in connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// A request to the service was rejected or could not be delivered.
    #[error("failed to send message: {message}")]
    SendFailed {
        /// Ack id of the failed request, if one was assigned.
        ack_id: Option<u64>,
        /// Failure reason.
        message: String,
        /// Structured detail, when the service provides one.
        detail: Option<ErrorDetail>,
    },

    /// No transport is installed, or the transport has no live connection.
    #[error("transport not connected")]
    NotConnected,

    /// The transport was stopped while the request was pending.
    #[error("transport stopped")]
    TransportStopped,

    /// Neither a client access URI nor a pre-built transport was supplied.
    #[error("client access uri is required when no transport is supplied")]
    MissingClientAccessUri,

    /// The client access URI could not be used.
    #[error("invalid client access uri: {0}")]
    InvalidClientAccessUri(String),

    /// A URI was supplied but nothing knows how to build a transport from it.
    #[error("no transport factory configured")]
    MissingTransportFactory,

    /// A channel is already registered under the name with another kind.
    #[error("channel {name} is already registered as {existing:?}")]
    ChannelKindMismatch {
        /// Qualified channel name.
        name: String,
        /// Kind of the registered channel.
        existing: ChannelKind,
    },

    /// `connect` was called outside of a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The service refused a new connection.
    #[error("connection limit reached: max {0} connections")]
    ConnectionLimit(usize),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConnectorError {
    /// Build a `SendFailed` error without structured detail.
    pub fn send_failed(message: impl Into<String>) -> Self {
        ConnectorError::SendFailed {
            ack_id: None,
            message: message.into(),
            detail: None,
        }
    }

    /// Structured detail carried by the failure, if any.
    pub fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            ConnectorError::SendFailed { detail, .. } => detail.as_ref(),
            _ => None,
        }
    }
}

/// Result type for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_failed_detail() {
        let err = ConnectorError::SendFailed {
            ack_id: Some(7),
            message: "join rejected".to_string(),
            detail: Some(ErrorDetail {
                name: "Forbidden".to_string(),
                message: "no permission".to_string(),
            }),
        };

        assert_eq!(err.to_string(), "failed to send message: join rejected");
        assert_eq!(err.detail().map(|d| d.name.as_str()), Some("Forbidden"));
        assert!(ConnectorError::NotConnected.detail().is_none());
    }
}
