//! The connection manager.
//!
//! A [`Connector`] owns one transport and a registry of channels keyed by
//! their qualified name. Every channel shares the transport's single
//! connection; asking twice for the same name returns the same channel.

use crate::channel::{Channel, ChannelKind};
use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};
use crate::formatter::EventFormatter;
use crate::message::{AckResult, DataType, SendEventOptions};
use crate::subscription::EventCallback;
use crate::transport::{
    EventHandler, HandlerId, Transport, TransportEvent, TransportEventKind, TransportFactory,
};
use crate::variants::{PresenceChannel, PrivateChannel};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection state as observed from transport events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// `connect` has not been called.
    #[default]
    Idle,
    /// The transport is starting.
    Connecting,
    /// A connection is established.
    Connected {
        /// Service-assigned connection id.
        connection_id: String,
        /// Authenticated user id, if any.
        user_id: Option<String>,
    },
    /// The connection was lost. The transport may reconnect.
    Disconnected {
        /// Reason given for the disconnect.
        message: String,
    },
    /// The transport stopped.
    Stopped,
}

/// The installed transport and the observers registered on it.
struct Installed {
    transport: Arc<dyn Transport>,
    runtime: Handle,
    observers: Vec<(TransportEventKind, HandlerId)>,
}

/// Multiplexes channels over a single transport connection.
pub struct Connector {
    config: ConnectorConfig,
    client: Option<Arc<dyn Transport>>,
    factory: Option<Arc<dyn TransportFactory>>,
    formatter: EventFormatter,
    installed: RwLock<Option<Installed>>,
    /// Background stop from the last `disconnect`, awaited by the next start.
    stopping: Mutex<Option<JoinHandle<()>>>,
    /// Channels indexed by qualified name.
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    user_id: Arc<RwLock<Option<String>>>,
}

impl Connector {
    /// Create a connector. Nothing connects until [`Connector::connect`].
    pub fn new(config: ConnectorConfig) -> Self {
        let formatter = EventFormatter::new(config.namespace.clone());
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            config,
            client: None,
            factory: None,
            formatter,
            installed: RwLock::new(None),
            stopping: Mutex::new(None),
            channels: RwLock::new(HashMap::new()),
            state: Arc::new(state),
            user_id: Arc::new(RwLock::new(None)),
        }
    }

    /// Use a pre-built transport instead of building one from the client
    /// access URI.
    pub fn with_client(mut self, client: Arc<dyn Transport>) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the transport from the client access URI with this factory.
    pub fn with_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// The connector configuration.
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// The event formatter shared by every channel.
    pub fn formatter(&self) -> &EventFormatter {
        &self.formatter
    }

    /// Install the transport, register the lifecycle observers and start it.
    ///
    /// Must be called inside a tokio runtime. The start itself runs in the
    /// background; its outcome is visible through [`Connector::state`].
    /// Calling `connect` while a transport is installed does nothing. A start
    /// that follows [`Connector::disconnect`] waits for the stop to finish.
    pub fn connect(&self) -> Result<()> {
        let mut installed = self.installed.write();
        if installed.is_some() {
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| ConnectorError::NoRuntime)?;
        let transport = self.build_transport()?;

        let observer = self.observer();
        let observers = TransportEventKind::ALL
            .iter()
            .map(|kind| (*kind, transport.on(*kind, observer.clone())))
            .collect();

        self.state.send_replace(ConnectionState::Connecting);

        let starting = transport.clone();
        let state = self.state.clone();
        let stopping = self.stopping.lock().take();
        runtime.spawn(async move {
            if let Some(stopping) = stopping {
                if let Err(e) = stopping.await {
                    warn!(error = %e, "Stop task failed");
                }
            }
            if let Err(e) = starting.start().await {
                warn!(error = %e, "Failed to start transport");
                state.send_replace(ConnectionState::Disconnected {
                    message: e.to_string(),
                });
            }
        });

        *installed = Some(Installed {
            transport,
            runtime,
            observers,
        });

        info!("Connector started");
        Ok(())
    }

    fn build_transport(&self) -> Result<Arc<dyn Transport>> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        let uri = self
            .config
            .parsed_uri()?
            .ok_or(ConnectorError::MissingClientAccessUri)?;
        let factory = self
            .factory
            .as_ref()
            .ok_or(ConnectorError::MissingTransportFactory)?;
        factory.create(&uri, &self.config.client)
    }

    /// Handler that mirrors transport lifecycle events into the connection
    /// state and the log.
    fn observer(&self) -> EventHandler {
        let state = self.state.clone();
        let user_id = self.user_id.clone();

        Arc::new(move |event: &TransportEvent| match event {
            TransportEvent::Connected {
                connection_id,
                user_id: user,
            } => {
                info!(connection_id = %connection_id, user_id = ?user, "Connected");
                *user_id.write() = user.clone();
                state.send_replace(ConnectionState::Connected {
                    connection_id: connection_id.clone(),
                    user_id: user.clone(),
                });
            }
            TransportEvent::Disconnected {
                connection_id,
                message,
            } => {
                info!(connection_id = ?connection_id, message = %message, "Disconnected");
                state.send_replace(ConnectionState::Disconnected {
                    message: message.clone(),
                });
            }
            TransportEvent::Stopped => {
                info!("Transport stopped");
                state.send_replace(ConnectionState::Stopped);
            }
            TransportEvent::RejoinGroupFailed { group, error } => {
                warn!(group = %group, error = %error, "Failed to rejoin group");
            }
            TransportEvent::GroupMessage(message) => {
                debug!(
                    group = %message.group,
                    data_type = %message.data_type,
                    sequence_id = ?message.sequence_id,
                    "Group message"
                );
            }
            TransportEvent::ServerMessage(message) => {
                debug!(
                    data_type = %message.data_type,
                    sequence_id = ?message.sequence_id,
                    "Server message"
                );
            }
        })
    }

    /// Stop the transport in the background.
    ///
    /// Channels stay registered; they keep pointing at the stopped transport.
    /// A later [`Connector::connect`] installs a fresh transport.
    pub fn disconnect(&self) {
        let mut guard = self.installed.write();
        let Some(installed) = guard.take() else {
            return;
        };

        for (kind, id) in &installed.observers {
            installed.transport.off(*kind, *id);
        }

        let transport = installed.transport;
        let state = self.state.clone();
        let stopping = installed.runtime.spawn(async move {
            if let Err(e) = transport.stop().await {
                warn!(error = %e, "Failed to stop transport");
            }
            state.send_replace(ConnectionState::Stopped);
        });
        *self.stopping.lock() = Some(stopping);
        drop(guard);

        info!("Connector disconnecting");
    }

    /// The installed transport.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.installed
            .read()
            .as_ref()
            .map(|installed| installed.transport.clone())
    }

    /// Get or create a public channel.
    pub fn channel(&self, name: &str) -> Result<Arc<Channel>> {
        self.channel_of_kind(name, ChannelKind::Public)
    }

    /// Get or create a private channel (`private-<name>`).
    pub fn private_channel(&self, name: &str) -> Result<PrivateChannel> {
        self.channel_of_kind(name, ChannelKind::Private)
            .map(PrivateChannel::new)
    }

    /// Get or create an encrypted private channel (`private-encrypted-<name>`).
    pub fn encrypted_private_channel(&self, name: &str) -> Result<PrivateChannel> {
        self.channel_of_kind(name, ChannelKind::EncryptedPrivate)
            .map(PrivateChannel::new)
    }

    /// Get or create a presence channel (`presence-<name>`).
    pub fn presence_channel(&self, name: &str) -> Result<PresenceChannel> {
        self.channel_of_kind(name, ChannelKind::Presence)
            .map(PresenceChannel::new)
    }

    fn channel_of_kind(&self, name: &str, kind: ChannelKind) -> Result<Arc<Channel>> {
        let qualified = kind.qualify(name);
        if let Some(existing) = self.channels.read().get(&qualified) {
            return Self::matching(existing, kind);
        }

        let installed = self.installed.read();
        let installed = installed.as_ref().ok_or(ConnectorError::NotConnected)?;

        let mut channels = self.channels.write();
        let channel = channels.entry(qualified).or_insert_with_key(|qualified| {
            debug!(channel = %qualified, kind = ?kind, "Creating channel");
            Channel::new(
                installed.transport.clone(),
                installed.runtime.clone(),
                qualified.clone(),
                kind,
                self.formatter.clone(),
            )
        });
        Self::matching(channel, kind)
    }

    fn matching(channel: &Arc<Channel>, kind: ChannelKind) -> Result<Arc<Channel>> {
        if channel.kind() != kind {
            return Err(ConnectorError::ChannelKindMismatch {
                name: channel.name().to_string(),
                existing: channel.kind(),
            });
        }
        Ok(channel.clone())
    }

    /// Listen for an event on a public channel, creating it if needed.
    pub fn listen(&self, name: &str, event: &str, callback: EventCallback) -> Result<Arc<Channel>> {
        let channel = self.channel(name)?;
        channel.listen(event, callback);
        Ok(channel)
    }

    /// Leave every variant of a channel name: public, private, encrypted
    /// private and presence.
    pub fn leave(&self, name: &str) {
        for kind in ChannelKind::ALL {
            self.leave_channel(&kind.qualify(name));
        }
    }

    /// Unsubscribe and forget the channel registered under the qualified
    /// name. Unknown names are ignored.
    pub fn leave_channel(&self, name: &str) {
        let removed = self.channels.write().remove(name);
        if let Some(channel) = removed {
            debug!(channel = %name, "Leaving channel");
            channel.unsubscribe();
        }
    }

    /// Whether a channel is registered under the qualified name.
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    /// Qualified names of the registered channels, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Id of the live connection, or an empty string when not connected.
    pub fn socket_id(&self) -> String {
        match &*self.state.borrow() {
            ConnectionState::Connected { connection_id, .. } => connection_id.clone(),
            _ => String::new(),
        }
    }

    /// User id of the most recent connection.
    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Send an event to the service through the transport.
    pub async fn send_event(
        &self,
        event_name: &str,
        content: serde_json::Value,
        data_type: DataType,
        options: SendEventOptions,
    ) -> Result<AckResult> {
        let transport = self.transport().ok_or(ConnectorError::NotConnected)?;
        transport
            .send_event(event_name, content, data_type, options)
            .await
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("namespace", &self.formatter.namespace())
            .field("state", &*self.state.borrow())
            .field("channels", &self.channel_names())
            .finish()
    }
}
