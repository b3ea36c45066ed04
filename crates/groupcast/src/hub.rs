//! In-process group-messaging service.
//!
//! `LocalHub` plays the role of the remote service for [`LocalTransport`]
//! clients: it tracks connections and group membership, stamps sequence ids
//! on group messages and fans them out to members. It backs the tests and
//! the CLI demo.
//!
//! [`LocalTransport`]: crate::client::LocalTransport

use crate::client::LocalTransportFactory;
use crate::error::{ConnectorError, ErrorDetail, Result};
use crate::message::{AckResult, DataType, EventEnvelope, GroupDataMessage, ServerDataMessage};
use crate::transport::TransportEvent;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// Capacity of the client event broadcast channel.
const BROADCAST_CAPACITY: usize = 1024;

/// Maximum number of concurrent connections.
pub const MAX_CONNECTIONS: usize = 10000;

/// Unique identifier of a hub connection.
pub type ConnectionId = String;

/// Receiving end of a connection's event stream.
pub type ConnectionReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// A connection held by the hub.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// User the connection authenticated as.
    pub user_id: Option<String>,
    sender: mpsc::UnboundedSender<TransportEvent>,
}

impl Connection {
    fn new(id: ConnectionId, user_id: Option<String>) -> (Arc<Self>, ConnectionReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id,
            user_id,
            sender,
        });
        (connection, receiver)
    }

    /// Queue an event on this connection's stream.
    pub(crate) fn send(&self, event: TransportEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| ConnectorError::NotConnected)
    }
}

/// An event a client sent to the service with `send_event`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEvent {
    /// Sending connection.
    pub connection_id: ConnectionId,
    /// Sending user, if authenticated.
    pub user_id: Option<String>,
    /// Event name.
    pub event: String,
    /// Content encoding.
    pub data_type: DataType,
    /// Content.
    pub data: serde_json::Value,
}

/// The in-process service.
#[derive(Debug)]
pub struct LocalHub {
    /// Open connections indexed by ID.
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    /// Group name to member connections.
    groups: RwLock<HashMap<String, BTreeSet<ConnectionId>>>,
    /// Groups whose joins are rejected.
    denied: RwLock<HashMap<String, ErrorDetail>>,
    /// Broadcast channel for client events.
    event_tx: broadcast::Sender<ClientEvent>,
    sequence: AtomicU64,
    stats: RwLock<HubStats>,
}

impl LocalHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            connections: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            denied: RwLock::new(HashMap::new()),
            event_tx,
            sequence: AtomicU64::new(0),
            stats: RwLock::new(HubStats::default()),
        }
    }

    /// A transport factory for `local://` URIs served by this hub.
    pub fn factory(self: &Arc<Self>) -> LocalTransportFactory {
        LocalTransportFactory::new(self.clone())
    }

    /// Open a connection. The `connected` event is already queued on the
    /// returned receiver.
    pub fn connect(&self, user_id: Option<String>) -> Result<(Arc<Connection>, ConnectionReceiver)> {
        let mut connections = self.connections.write();
        if connections.len() >= MAX_CONNECTIONS {
            return Err(ConnectorError::ConnectionLimit(MAX_CONNECTIONS));
        }

        let connection_id = uuid::Uuid::new_v4().to_string();
        let (connection, receiver) = Connection::new(connection_id.clone(), user_id.clone());
        connections.insert(connection_id.clone(), connection.clone());
        drop(connections);

        self.stats.write().total_connections += 1;
        connection.send(TransportEvent::Connected {
            connection_id: connection_id.clone(),
            user_id,
        })?;

        info!(connection_id = %connection_id, "Connection opened");
        Ok((connection, receiver))
    }

    /// Close a connection, dropping its group memberships. The connection
    /// receives a `disconnected` event carrying `reason`.
    pub fn disconnect(&self, connection_id: &str, reason: &str) -> bool {
        let Some(connection) = self.connections.write().remove(connection_id) else {
            return false;
        };

        self.groups.write().retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });

        let _ = connection.send(TransportEvent::Disconnected {
            connection_id: Some(connection_id.to_string()),
            message: reason.to_string(),
        });

        info!(connection_id = %connection_id, reason = %reason, "Connection closed");
        true
    }

    fn connection(&self, connection_id: &str) -> Result<Arc<Connection>> {
        self.connections
            .read()
            .get(connection_id)
            .cloned()
            .ok_or(ConnectorError::NotConnected)
    }

    /// Reject every future join of `group` with the given detail.
    pub fn deny_group(&self, group: &str, detail: ErrorDetail) {
        self.denied.write().insert(group.to_string(), detail);
    }

    /// Lift a rejection installed with [`LocalHub::deny_group`].
    pub fn allow_group(&self, group: &str) {
        self.denied.write().remove(group);
    }

    /// Add a connection to a group. Joining twice is acknowledged as a
    /// duplicate.
    pub fn join_group(&self, connection_id: &str, group: &str) -> Result<AckResult> {
        self.connection(connection_id)?;

        if let Some(detail) = self.denied.read().get(group) {
            return Err(ConnectorError::SendFailed {
                ack_id: None,
                message: format!("join group {group} rejected"),
                detail: Some(detail.clone()),
            });
        }

        let inserted = self
            .groups
            .write()
            .entry(group.to_string())
            .or_default()
            .insert(connection_id.to_string());

        if inserted {
            self.stats.write().total_joins += 1;
            debug!(connection_id = %connection_id, group = %group, "Joined group");
        }

        Ok(AckResult {
            ack_id: None,
            is_duplicated: !inserted,
        })
    }

    /// Remove a connection from a group.
    pub fn leave_group(&self, connection_id: &str, group: &str) -> Result<()> {
        self.connection(connection_id)?;

        let mut groups = self.groups.write();
        if let Some(members) = groups.get_mut(group) {
            if members.remove(connection_id) {
                debug!(connection_id = %connection_id, group = %group, "Left group");
            }
            if members.is_empty() {
                groups.remove(group);
            }
        }
        Ok(())
    }

    /// Members of a group.
    pub fn group_members(&self, group: &str) -> Vec<ConnectionId> {
        self.groups
            .read()
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Send content from a client to every member of a group, the sender
    /// included. Returns the number of recipients.
    pub fn send_to_group(
        &self,
        connection_id: &str,
        group: &str,
        data_type: DataType,
        data: serde_json::Value,
    ) -> Result<usize> {
        let sender = self.connection(connection_id)?;
        Ok(self.deliver(group, data_type, data, sender.user_id.clone()))
    }

    /// Publish a server-originated event to a group.
    pub fn publish(&self, group: &str, envelope: &EventEnvelope) -> usize {
        self.deliver(group, DataType::Json, envelope.to_value(), None)
    }

    fn deliver(
        &self,
        group: &str,
        data_type: DataType,
        data: serde_json::Value,
        from_user_id: Option<String>,
    ) -> usize {
        let message = GroupDataMessage {
            group: group.to_string(),
            data_type,
            data,
            sequence_id: Some(self.sequence.fetch_add(1, Ordering::SeqCst) + 1),
            from_user_id,
        };

        let members = self.group_members(group);
        let connections = self.connections.read();
        let mut recipient_count = 0;
        for member in &members {
            if let Some(connection) = connections.get(member) {
                if connection
                    .send(TransportEvent::GroupMessage(message.clone()))
                    .is_ok()
                {
                    recipient_count += 1;
                }
            }
        }
        drop(connections);

        self.stats.write().total_group_messages += 1;

        debug!(
            group = %group,
            sequence_id = ?message.sequence_id,
            recipients = recipient_count,
            "Group message delivered"
        );
        recipient_count
    }

    /// Accept an event sent by a client and re-broadcast it to
    /// [`LocalHub::subscribe_events`] receivers.
    pub fn send_event(
        &self,
        connection_id: &str,
        event: &str,
        data_type: DataType,
        data: serde_json::Value,
    ) -> Result<()> {
        let sender = self.connection(connection_id)?;
        let _ = self.event_tx.send(ClientEvent {
            connection_id: sender.id.clone(),
            user_id: sender.user_id.clone(),
            event: event.to_string(),
            data_type,
            data,
        });
        self.stats.write().total_events += 1;
        debug!(connection_id = %connection_id, event = %event, "Client event received");
        Ok(())
    }

    /// Subscribe to events sent by clients.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Send a server message to one connection.
    pub fn send_to_connection(
        &self,
        connection_id: &str,
        data_type: DataType,
        data: serde_json::Value,
    ) -> Result<()> {
        let connection = self.connection(connection_id)?;
        connection.send(TransportEvent::ServerMessage(ServerDataMessage {
            data_type,
            data,
            sequence_id: Some(self.sequence.fetch_add(1, Ordering::SeqCst) + 1),
        }))
    }

    /// Send a server message to every connection (for announcements).
    pub fn broadcast_all(&self, data_type: DataType, data: serde_json::Value) {
        let connections = self.connections.read();
        for connection in connections.values() {
            let _ = connection.send(TransportEvent::ServerMessage(ServerDataMessage {
                data_type,
                data: data.clone(),
                sequence_id: None,
            }));
        }
    }

    /// Get current connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Get hub statistics.
    pub fn stats(&self) -> HubStats {
        let mut stats = self.stats.read().clone();
        stats.current_connections = self.connection_count();
        stats.current_groups = self.groups.read().len();
        stats
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    /// Current number of connections.
    pub current_connections: usize,
    /// Current number of non-empty groups.
    pub current_groups: usize,
    /// Total connections since start.
    pub total_connections: u64,
    /// Total successful (non-duplicate) joins since start.
    pub total_joins: u64,
    /// Total group messages delivered since start.
    pub total_group_messages: u64,
    /// Total client events received since start.
    pub total_events: u64,
}
