//! The transport contract consumed by channels and the connector.
//!
//! A transport owns the physical connection to the group-messaging service.
//! Connecting, reconnecting, retrying and wire framing all live behind this
//! trait; the connector only starts and stops it, joins and leaves groups,
//! sends, and observes its event stream.

use crate::config::ClientOptions;
use crate::error::Result;
use crate::message::{AckResult, DataType, GroupDataMessage, SendEventOptions, ServerDataMessage};
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// Identifier returned by [`Transport::on`], used to deregister a handler.
pub type HandlerId = u64;

/// Callback invoked for transport events.
pub type EventHandler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Kinds of events a transport emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
    /// Connection established.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Transport stopped for good.
    Stopped,
    /// A group could not be rejoined after reconnecting.
    RejoinGroupFailed,
    /// A message arrived for a joined group.
    GroupMessage,
    /// A message arrived from the service itself.
    ServerMessage,
}

impl TransportEventKind {
    /// Every event kind.
    pub const ALL: [TransportEventKind; 6] = [
        TransportEventKind::Connected,
        TransportEventKind::Disconnected,
        TransportEventKind::Stopped,
        TransportEventKind::RejoinGroupFailed,
        TransportEventKind::GroupMessage,
        TransportEventKind::ServerMessage,
    ];
}

impl std::fmt::Display for TransportEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEventKind::Connected => write!(f, "connected"),
            TransportEventKind::Disconnected => write!(f, "disconnected"),
            TransportEventKind::Stopped => write!(f, "stopped"),
            TransportEventKind::RejoinGroupFailed => write!(f, "rejoin-group-failed"),
            TransportEventKind::GroupMessage => write!(f, "group-message"),
            TransportEventKind::ServerMessage => write!(f, "server-message"),
        }
    }
}

/// An event emitted by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection established.
    Connected {
        /// Service-assigned connection id.
        connection_id: String,
        /// Authenticated user id, if any.
        user_id: Option<String>,
    },
    /// Connection lost.
    Disconnected {
        /// Id of the lost connection, if it was established.
        connection_id: Option<String>,
        /// Reason given for the disconnect.
        message: String,
    },
    /// Transport stopped.
    Stopped,
    /// A group could not be rejoined after reconnecting.
    RejoinGroupFailed {
        /// Group name.
        group: String,
        /// Failure reason.
        error: String,
    },
    /// A message arrived for a joined group.
    GroupMessage(GroupDataMessage),
    /// A message arrived from the service.
    ServerMessage(ServerDataMessage),
}

impl TransportEvent {
    /// The kind of this event.
    pub fn kind(&self) -> TransportEventKind {
        match self {
            TransportEvent::Connected { .. } => TransportEventKind::Connected,
            TransportEvent::Disconnected { .. } => TransportEventKind::Disconnected,
            TransportEvent::Stopped => TransportEventKind::Stopped,
            TransportEvent::RejoinGroupFailed { .. } => TransportEventKind::RejoinGroupFailed,
            TransportEvent::GroupMessage(_) => TransportEventKind::GroupMessage,
            TransportEvent::ServerMessage(_) => TransportEventKind::ServerMessage,
        }
    }
}

/// A bidirectional group-messaging connection.
///
/// Handlers registered with [`Transport::on`] must receive every later event
/// of their kind, in registration order, until removed with
/// [`Transport::off`].
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Open the connection.
    async fn start(&self) -> Result<()>;

    /// Close the connection. Safe to call when stopped or never started.
    async fn stop(&self) -> Result<()>;

    /// Register a handler for one kind of event.
    fn on(&self, kind: TransportEventKind, handler: EventHandler) -> HandlerId;

    /// Remove a handler. Returns false if it was not registered.
    fn off(&self, kind: TransportEventKind, id: HandlerId) -> bool;

    /// Join a group.
    async fn join_group(&self, group: &str, ack_id: Option<u64>) -> Result<AckResult>;

    /// Leave a group.
    async fn leave_group(&self, group: &str, ack_id: Option<u64>) -> Result<()>;

    /// Send content to every member of a group.
    async fn send_to_group(
        &self,
        group: &str,
        content: serde_json::Value,
        data_type: DataType,
    ) -> Result<AckResult>;

    /// Send an event to the service.
    async fn send_event(
        &self,
        event_name: &str,
        content: serde_json::Value,
        data_type: DataType,
        options: SendEventOptions,
    ) -> Result<AckResult>;
}

/// Builds transports from a client access URI.
pub trait TransportFactory: Send + Sync + std::fmt::Debug {
    /// Create an unstarted transport for the endpoint.
    fn create(&self, client_access_uri: &Url, options: &ClientOptions) -> Result<Arc<dyn Transport>>;
}
