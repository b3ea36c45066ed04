//! Connector configuration.

use crate::error::{ConnectorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Namespace applied to event names unless configured otherwise.
pub const DEFAULT_NAMESPACE: &str = "App.Events";

fn default_namespace() -> Option<String> {
    Some(DEFAULT_NAMESPACE.to_string())
}

fn default_true() -> bool {
    true
}

/// Configuration for a [`crate::Connector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connection endpoint. Required unless a pre-built transport is supplied.
    #[serde(default)]
    pub client_access_uri: Option<String>,
    /// Namespace prefixed to bare event names. `None` disables namespacing.
    #[serde(default = "default_namespace")]
    pub namespace: Option<String>,
    /// Options passed through to the transport.
    #[serde(default)]
    pub client: ClientOptions,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            client_access_uri: None,
            namespace: default_namespace(),
            client: ClientOptions::default(),
        }
    }
}

impl ConnectorConfig {
    /// Create a configuration pointing at the given endpoint.
    pub fn with_uri(client_access_uri: impl Into<String>) -> Self {
        Self {
            client_access_uri: Some(client_access_uri.into()),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse the client access URI, if one is set.
    pub fn parsed_uri(&self) -> Result<Option<Url>> {
        self.client_access_uri
            .as_deref()
            .map(|uri| {
                Url::parse(uri)
                    .map_err(|e| ConnectorError::InvalidClientAccessUri(format!("{uri}: {e}")))
            })
            .transpose()
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.parsed_uri().map(|_| ())
    }
}

/// Wire protocol negotiated with the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// JSON subprotocol with sequence acks and reconnect recovery.
    #[default]
    JsonReliable,
    /// Plain JSON subprotocol.
    Json,
}

impl Protocol {
    /// Subprotocol name as sent during negotiation.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::JsonReliable => "json.reliable.webpubsub.azure.v1",
            Protocol::Json => "json.webpubsub.azure.v1",
        }
    }
}

/// Transport-level client options. Opaque to the connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Wire protocol.
    #[serde(default)]
    pub protocol: Protocol,
    /// Reconnect when the connection drops.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Rejoin previously joined groups after reconnecting.
    #[serde(default = "default_true")]
    pub auto_rejoin_groups: bool,
    /// Retry policy for outbound messages.
    #[serde(default)]
    pub message_retry_options: RetryOptions,
    /// Retry policy for reconnection.
    #[serde(default = "RetryOptions::reconnect")]
    pub reconnect_retry_options: RetryOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            auto_reconnect: true,
            auto_rejoin_groups: true,
            message_retry_options: RetryOptions::default(),
            reconnect_retry_options: RetryOptions::reconnect(),
        }
    }
}

/// Backoff mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Same delay between every attempt.
    #[default]
    Fixed,
    /// Delay doubles with each attempt.
    Exponential,
}

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOptions {
    /// Maximum number of retries.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub retry_delay_ms: u64,
    /// Upper bound for the delay.
    pub max_retry_delay_ms: u64,
    /// Backoff mode.
    #[serde(default)]
    pub mode: RetryMode,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            mode: RetryMode::Fixed,
        }
    }
}

impl RetryOptions {
    /// Defaults for reconnection.
    pub fn reconnect() -> Self {
        Self {
            max_retries: 10,
            ..Self::default()
        }
    }

    /// Delay before the given retry attempt (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = match self.mode {
            RetryMode::Fixed => self.retry_delay_ms,
            RetryMode::Exponential => self
                .retry_delay_ms
                .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX)),
        };
        Duration::from_millis(millis.min(self.max_retry_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectorConfig::default();
        assert_eq!(config.namespace.as_deref(), Some(DEFAULT_NAMESPACE));
        assert!(config.client_access_uri.is_none());
        assert!(config.client.auto_reconnect);
        assert!(config.client.auto_rejoin_groups);
        assert_eq!(config.client.protocol, Protocol::JsonReliable);
    }

    #[test]
    fn test_from_json_partial() {
        let config = ConnectorConfig::from_json(
            r#"{"client_access_uri": "local://hub?user_id=alice", "client": {"auto_reconnect": false}}"#,
        )
        .unwrap();

        assert_eq!(config.namespace.as_deref(), Some(DEFAULT_NAMESPACE));
        assert!(!config.client.auto_reconnect);
        assert!(config.client.auto_rejoin_groups);
        assert_eq!(config.client.reconnect_retry_options, RetryOptions::reconnect());
    }

    #[test]
    fn test_from_json_null_namespace() {
        let config = ConnectorConfig::from_json(r#"{"namespace": null}"#).unwrap();
        assert!(config.namespace.is_none());
    }

    #[test]
    fn test_validate_uri() {
        assert!(ConnectorConfig::with_uri("wss://example.org/client/hubs/chat")
            .validate()
            .is_ok());
        assert!(ConnectorConfig::default().validate().is_ok());
        assert!(matches!(
            ConnectorConfig::with_uri("not a uri").validate(),
            Err(ConnectorError::InvalidClientAccessUri(_))
        ));
    }

    #[test]
    fn test_retry_delays() {
        let fixed = RetryOptions::default();
        assert_eq!(fixed.delay_for(0), Duration::from_millis(1000));
        assert_eq!(fixed.delay_for(5), Duration::from_millis(1000));

        let exponential = RetryOptions {
            mode: RetryMode::Exponential,
            ..RetryOptions::default()
        };
        assert_eq!(exponential.delay_for(0), Duration::from_millis(1000));
        assert_eq!(exponential.delay_for(2), Duration::from_millis(4000));
        assert_eq!(exponential.delay_for(10), Duration::from_millis(30_000));
        assert_eq!(exponential.delay_for(200), Duration::from_millis(30_000));
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!(Protocol::JsonReliable.name(), "json.reliable.webpubsub.azure.v1");
        assert_eq!(Protocol::Json.name(), "json.webpubsub.azure.v1");
    }
}
