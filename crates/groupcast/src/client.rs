//! Transport client for the in-process hub.

use crate::config::ClientOptions;
use crate::error::{ConnectorError, Result};
use crate::hub::{Connection, ConnectionReceiver, LocalHub};
use crate::message::{AckResult, DataType, SendEventOptions};
use crate::transport::{
    EventHandler, HandlerId, Transport, TransportEvent, TransportEventKind, TransportFactory,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// URI scheme served by [`LocalTransportFactory`].
pub const LOCAL_SCHEME: &str = "local";

/// How long requests wait for a pending start or reconnect.
const CONNECT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Link {
    /// Never started, or between a dropped connection and its replacement.
    Idle,
    Connected(Arc<Connection>),
    Stopped,
}

struct Registration {
    id: HandlerId,
    kind: TransportEventKind,
    handler: EventHandler,
}

struct Inner {
    hub: Arc<LocalHub>,
    user_id: Option<String>,
    options: ClientOptions,
    link: watch::Sender<Link>,
    handlers: RwLock<Vec<Registration>>,
    next_handler: AtomicU64,
    next_ack: AtomicU64,
    /// Groups to rejoin after a reconnect.
    groups: RwLock<BTreeSet<String>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Inner {
    fn dispatch(&self, event: &TransportEvent) {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .iter()
            .filter(|registration| registration.kind == kind)
            .map(|registration| registration.handler.clone())
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    fn is_stopped(&self) -> bool {
        matches!(*self.link.borrow(), Link::Stopped)
    }

    fn next_ack_id(&self) -> u64 {
        self.next_ack.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Rejoin remembered groups. Failures are queued on the connection so
    /// they arrive after its `connected` event.
    fn rejoin_groups(&self, connection: &Connection) {
        if !self.options.auto_rejoin_groups {
            return;
        }

        let groups: Vec<String> = self.groups.read().iter().cloned().collect();
        for group in groups {
            if let Err(e) = self.hub.join_group(&connection.id, &group) {
                let _ = connection.send(TransportEvent::RejoinGroupFailed {
                    group,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Open a connection and install it unless the transport was stopped
    /// meanwhile.
    fn open(&self) -> Result<Option<ConnectionReceiver>> {
        let (connection, receiver) = self.hub.connect(self.user_id.clone())?;
        let installed = self.link.send_if_modified(|link| {
            if matches!(link, Link::Stopped) {
                return false;
            }
            *link = Link::Connected(connection.clone());
            true
        });

        if !installed {
            self.hub.disconnect(&connection.id, "connection stopped");
            return Ok(None);
        }

        self.rejoin_groups(&connection);
        Ok(Some(receiver))
    }
}

/// A [`Transport`] connected to a [`LocalHub`].
pub struct LocalTransport {
    inner: Arc<Inner>,
}

impl LocalTransport {
    /// Create an unstarted transport for the hub.
    pub fn new(hub: Arc<LocalHub>, user_id: Option<String>, options: ClientOptions) -> Self {
        let (link, _) = watch::channel(Link::Idle);
        Self {
            inner: Arc::new(Inner {
                hub,
                user_id,
                options,
                link,
                handlers: RwLock::new(Vec::new()),
                next_handler: AtomicU64::new(0),
                next_ack: AtomicU64::new(0),
                groups: RwLock::new(BTreeSet::new()),
                pump: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Id of the live connection, if any.
    pub fn connection_id(&self) -> Option<String> {
        match &*self.inner.link.borrow() {
            Link::Connected(connection) => Some(connection.id.clone()),
            _ => None,
        }
    }

    /// Wait for a live connection. Requests issued while a start or
    /// reconnect is pending wait for it.
    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut link = self.inner.link.subscribe();
        let waited = tokio::time::timeout(
            CONNECT_WAIT,
            link.wait_for(|link| !matches!(link, Link::Idle)),
        )
        .await;

        match waited {
            Ok(Ok(link)) => match &*link {
                Link::Connected(connection) => Ok(connection.clone()),
                Link::Stopped => Err(ConnectorError::TransportStopped),
                Link::Idle => Err(ConnectorError::NotConnected),
            },
            _ => Err(ConnectorError::NotConnected),
        }
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("user_id", &self.inner.user_id)
            .field("link", &*self.inner.link.borrow())
            .field("handlers", &self.inner.handlers.read().len())
            .finish()
    }
}

/// Deliver a connection's events to the registered handlers, reconnecting
/// when the hub drops the connection.
async fn run_pump(inner: Weak<Inner>, mut receiver: ConnectionReceiver) {
    while let Some(event) = receiver.recv().await {
        let Some(transport) = inner.upgrade() else {
            return;
        };

        transport.dispatch(&event);

        let TransportEvent::Disconnected { .. } = event else {
            continue;
        };

        if transport.is_stopped() {
            return;
        }

        transport
            .link
            .send_if_modified(|link| match link {
                Link::Connected(_) => {
                    *link = Link::Idle;
                    true
                }
                _ => false,
            });

        if !transport.options.auto_reconnect {
            transport.link.send_replace(Link::Stopped);
            transport.dispatch(&TransportEvent::Stopped);
            return;
        }
        drop(transport);

        match reconnect(&inner).await {
            Some(next) => receiver = next,
            None => return,
        }
    }
}

async fn reconnect(inner: &Weak<Inner>) -> Option<ConnectionReceiver> {
    let retry = inner.upgrade()?.options.reconnect_retry_options.clone();

    for attempt in 0..retry.max_retries {
        tokio::time::sleep(retry.delay_for(attempt)).await;

        let transport = inner.upgrade()?;
        if transport.is_stopped() {
            return None;
        }

        match transport.open() {
            Ok(Some(receiver)) => {
                info!(attempt = attempt + 1, "Reconnected");
                return Some(receiver);
            }
            Ok(None) => return None,
            Err(e) => warn!(attempt = attempt + 1, error = %e, "Reconnect failed"),
        }
    }

    let transport = inner.upgrade()?;
    warn!(retries = retry.max_retries, "Giving up reconnecting");
    transport.link.send_replace(Link::Stopped);
    transport.dispatch(&TransportEvent::Stopped);
    None
}

#[async_trait]
impl Transport for LocalTransport {
    async fn start(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if matches!(*self.inner.link.borrow(), Link::Connected(_)) {
            return Ok(());
        }

        // A restart after `stop` must not be blocked by the stopped marker.
        self.inner.link.send_replace(Link::Idle);
        let Some(receiver) = self.inner.open()? else {
            return Err(ConnectorError::TransportStopped);
        };

        let pump = tokio::spawn(run_pump(Arc::downgrade(&self.inner), receiver));
        if let Some(previous) = self.inner.pump.lock().replace(pump) {
            previous.abort();
        }

        debug!(
            user_id = ?self.inner.user_id,
            protocol = self.inner.options.protocol.name(),
            "Transport started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        let previous = self.inner.link.send_replace(Link::Stopped);
        let pump = self.inner.pump.lock().take();

        match previous {
            Link::Stopped => return Ok(()),
            Link::Connected(connection) => {
                self.inner.hub.disconnect(&connection.id, "connection stopped");
                if let Some(pump) = pump {
                    // Drains the queued `disconnected` event, then exits.
                    let _ = pump.await;
                }
            }
            Link::Idle => {
                if let Some(pump) = pump {
                    pump.abort();
                }
            }
        }

        self.inner.dispatch(&TransportEvent::Stopped);
        debug!(user_id = ?self.inner.user_id, "Transport stopped");
        Ok(())
    }

    fn on(&self, kind: TransportEventKind, handler: EventHandler) -> HandlerId {
        let id = self.inner.next_handler.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .handlers
            .write()
            .push(Registration { id, kind, handler });
        id
    }

    fn off(&self, kind: TransportEventKind, id: HandlerId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let before = handlers.len();
        handlers.retain(|registration| !(registration.id == id && registration.kind == kind));
        handlers.len() != before
    }

    async fn join_group(&self, group: &str, ack_id: Option<u64>) -> Result<AckResult> {
        let ack_id = ack_id.unwrap_or_else(|| self.inner.next_ack_id());
        let connection = self.connection().await?;

        let ack = self
            .inner
            .hub
            .join_group(&connection.id, group)
            .map_err(|e| match e {
                ConnectorError::SendFailed { message, detail, .. } => ConnectorError::SendFailed {
                    ack_id: Some(ack_id),
                    message,
                    detail,
                },
                other => other,
            })?;

        self.inner.groups.write().insert(group.to_string());
        Ok(AckResult {
            ack_id: Some(ack_id),
            ..ack
        })
    }

    async fn leave_group(&self, group: &str, _ack_id: Option<u64>) -> Result<()> {
        self.inner.groups.write().remove(group);
        let connection = self.connection().await?;
        self.inner.hub.leave_group(&connection.id, group)
    }

    async fn send_to_group(
        &self,
        group: &str,
        content: serde_json::Value,
        data_type: DataType,
    ) -> Result<AckResult> {
        let ack_id = self.inner.next_ack_id();
        let connection = self.connection().await?;
        self.inner
            .hub
            .send_to_group(&connection.id, group, data_type, content)?;
        Ok(AckResult {
            ack_id: Some(ack_id),
            is_duplicated: false,
        })
    }

    async fn send_event(
        &self,
        event_name: &str,
        content: serde_json::Value,
        data_type: DataType,
        options: SendEventOptions,
    ) -> Result<AckResult> {
        let ack_id = options.ack_id.unwrap_or_else(|| self.inner.next_ack_id());
        let connection = self.connection().await?;
        self.inner
            .hub
            .send_event(&connection.id, event_name, data_type, content)?;
        Ok(AckResult {
            ack_id: (!options.fire_and_forget).then_some(ack_id),
            is_duplicated: false,
        })
    }
}

/// Builds [`LocalTransport`]s for `local://` URIs.
///
/// The `user_id` query parameter selects the user the connection
/// authenticates as: `local://hub?user_id=alice`.
#[derive(Debug, Clone)]
pub struct LocalTransportFactory {
    hub: Arc<LocalHub>,
}

impl LocalTransportFactory {
    /// Create a factory for the hub.
    pub fn new(hub: Arc<LocalHub>) -> Self {
        Self { hub }
    }
}

impl TransportFactory for LocalTransportFactory {
    fn create(&self, client_access_uri: &url::Url, options: &ClientOptions) -> Result<Arc<dyn Transport>> {
        if client_access_uri.scheme() != LOCAL_SCHEME {
            return Err(ConnectorError::InvalidClientAccessUri(format!(
                "unsupported scheme: {}",
                client_access_uri.scheme()
            )));
        }

        let user_id = client_access_uri
            .query_pairs()
            .find(|(key, _)| key == "user_id")
            .map(|(_, value)| value.into_owned());

        Ok(Arc::new(LocalTransport::new(
            self.hub.clone(),
            user_id,
            options.clone(),
        )))
    }
}
