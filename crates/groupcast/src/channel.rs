//! Channels: one group subscription with its listeners.
//!
//! Every channel registers its own hook on the transport's shared
//! `group-message` stream and discards messages addressed to other groups.
//! Messages for this channel are decoded from the `{event, payload}` envelope,
//! handed to the global listeners under their display name, and then to the
//! listeners bound to the raw wire event name.

use crate::error::ConnectorError;
use crate::formatter::EventFormatter;
use crate::message::{AckResult, ChannelMessage, DataType, EventEnvelope, GroupDataMessage};
use crate::subscription::{
    ErrorCallback, EventCallback, GlobalCallback, ListenerTable, SubscribedCallback,
};
use crate::transport::{EventHandler, HandlerId, Transport, TransportEvent, TransportEventKind};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Variant of a channel. Decides the registry prefix and which extra
/// capabilities the typed handles expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Plain channel.
    Public,
    /// Private channel, supports whispers.
    Private,
    /// Encrypted private channel. Only the name differs from `Private`.
    EncryptedPrivate,
    /// Presence channel. Membership tracking is not implemented.
    Presence,
}

impl ChannelKind {
    /// Every kind, in the order `leave` tears them down.
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Public,
        ChannelKind::Private,
        ChannelKind::EncryptedPrivate,
        ChannelKind::Presence,
    ];

    /// Literal prefix of registry names of this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            ChannelKind::Public => "",
            ChannelKind::Private => "private-",
            ChannelKind::EncryptedPrivate => "private-encrypted-",
            ChannelKind::Presence => "presence-",
        }
    }

    /// Registry (and group) name for a bare channel name.
    pub fn qualify(&self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }
}

/// Subscription state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Built, not yet subscribed.
    Constructed,
    /// Join request in flight.
    Joining,
    /// Group joined.
    Joined,
    /// Join rejected.
    JoinFailed,
    /// Unsubscribed.
    Left,
}

struct Lifecycle {
    state: ChannelState,
    /// Bumped on every subscribe and unsubscribe so stale join results are ignored.
    attempt: u64,
    hook: Option<HandlerId>,
    ack: Option<AckResult>,
    error: Option<Arc<ConnectorError>>,
    subscribe_handlers: Vec<SubscribedCallback>,
    error_handlers: Vec<ErrorCallback>,
}

/// A named channel multiplexed over a shared transport.
pub struct Channel {
    name: String,
    kind: ChannelKind,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    formatter: EventFormatter,
    table: RwLock<ListenerTable>,
    lifecycle: Mutex<Lifecycle>,
    this: Weak<Channel>,
}

impl Channel {
    /// Create a channel and immediately subscribe it.
    ///
    /// The join request runs on `runtime`; its outcome reaches the
    /// [`Channel::subscribed`] and [`Channel::error`] callbacks.
    pub fn new(
        transport: Arc<dyn Transport>,
        runtime: Handle,
        name: impl Into<String>,
        kind: ChannelKind,
        formatter: EventFormatter,
    ) -> Arc<Self> {
        let channel = Arc::new_cyclic(|this| Channel {
            name: name.into(),
            kind,
            transport,
            runtime,
            formatter,
            table: RwLock::new(ListenerTable::new()),
            lifecycle: Mutex::new(Lifecycle {
                state: ChannelState::Constructed,
                attempt: 0,
                hook: None,
                ack: None,
                error: None,
                subscribe_handlers: Vec::new(),
                error_handlers: Vec::new(),
            }),
            this: this.clone(),
        });
        channel.subscribe();
        channel
    }

    /// Channel (and group) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel variant.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Current subscription state.
    pub fn state(&self) -> ChannelState {
        self.lifecycle.lock().state
    }

    /// The event formatter used by [`Channel::listen`].
    pub fn formatter(&self) -> &EventFormatter {
        &self.formatter
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Hook this channel into the message stream and join its group.
    ///
    /// Does nothing while already subscribed.
    pub fn subscribe(&self) {
        let attempt = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.hook.is_some() {
                debug!(channel = %self.name, "Channel already subscribed");
                return;
            }

            let this = self.this.clone();
            let hook: EventHandler = Arc::new(move |event: &TransportEvent| {
                if let TransportEvent::GroupMessage(message) = event {
                    if let Some(channel) = this.upgrade() {
                        channel.handle_group_message(message);
                    }
                }
            });
            lifecycle.hook = Some(self.transport.on(TransportEventKind::GroupMessage, hook));
            lifecycle.attempt += 1;
            lifecycle.state = ChannelState::Joining;
            lifecycle.ack = None;
            lifecycle.error = None;
            lifecycle.attempt
        };

        debug!(channel = %self.name, "Subscribing");

        let this = self.this.clone();
        let transport = self.transport.clone();
        let name = self.name.clone();
        self.runtime.spawn(async move {
            let outcome = transport.join_group(&name, None).await;
            match this.upgrade() {
                Some(channel) => channel.complete_join(attempt, outcome),
                None => debug!(channel = %name, "Join resolved for a dropped channel"),
            }
        });
    }

    fn complete_join(&self, attempt: u64, outcome: crate::Result<AckResult>) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.attempt != attempt || lifecycle.state != ChannelState::Joining {
            debug!(channel = %self.name, "Ignoring stale join result");
            return;
        }

        match outcome {
            Ok(ack) => {
                lifecycle.state = ChannelState::Joined;
                lifecycle.ack = Some(ack.clone());
                let handlers = lifecycle.subscribe_handlers.clone();
                drop(lifecycle);

                debug!(
                    channel = %self.name,
                    ack_id = ?ack.ack_id,
                    is_duplicated = ack.is_duplicated,
                    "Joined group"
                );
                for handler in handlers {
                    handler(&ack);
                }
            }
            Err(error) => {
                warn!(channel = %self.name, error = %error, "Failed to join group");
                if let Some(detail) = error.detail() {
                    debug!(name = %detail.name, message = %detail.message, "Join failure detail");
                }

                let error = Arc::new(error);
                lifecycle.state = ChannelState::JoinFailed;
                lifecycle.error = Some(error.clone());
                let handlers = lifecycle.error_handlers.clone();
                drop(lifecycle);

                for handler in handlers {
                    handler(&error);
                }
            }
        }
    }

    /// Drop every event binding, unhook from the message stream and leave
    /// the group. Safe before the join has resolved.
    pub fn unsubscribe(&self) {
        self.unbind();

        let hook = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.attempt += 1;
            lifecycle.state = ChannelState::Left;
            lifecycle.hook.take()
        };

        let Some(hook) = hook else {
            return;
        };

        debug!(channel = %self.name, "Unsubscribing");
        self.transport.off(TransportEventKind::GroupMessage, hook);

        let transport = self.transport.clone();
        let name = self.name.clone();
        self.runtime.spawn(async move {
            if let Err(e) = transport.leave_group(&name, None).await {
                warn!(channel = %name, error = %e, "Failed to leave group");
            }
        });
    }

    /// Listen for a namespaced event.
    pub fn listen(&self, event: &str, callback: EventCallback) -> &Self {
        self.on(&self.formatter.format(event), callback)
    }

    /// Listen for every event on the channel.
    pub fn listen_to_all(&self, callback: GlobalCallback) -> &Self {
        self.table.write().bind_global(callback);
        self
    }

    /// Stop listening for a namespaced event. Without a callback, every
    /// callback for the event is removed.
    pub fn stop_listening(&self, event: &str, callback: Option<&EventCallback>) -> &Self {
        self.unbind_event(&self.formatter.format(event), callback);
        self
    }

    /// Remove one global listener, or all of them.
    pub fn stop_listening_to_all(&self, callback: Option<&GlobalCallback>) -> &Self {
        self.table.write().unbind_global(callback);
        self
    }

    /// Register a callback for a successful join.
    ///
    /// Fires immediately when the channel has already joined.
    pub fn subscribed(&self, callback: SubscribedCallback) -> &Self {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.subscribe_handlers.push(callback.clone());
        let ack = match lifecycle.state {
            ChannelState::Joined => lifecycle.ack.clone(),
            _ => None,
        };
        drop(lifecycle);

        if let Some(ack) = ack {
            callback(&ack);
        }
        self
    }

    /// Register a callback for a failed join.
    ///
    /// Fires immediately when the join has already failed.
    pub fn error(&self, callback: ErrorCallback) -> &Self {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.error_handlers.push(callback.clone());
        let error = match lifecycle.state {
            ChannelState::JoinFailed => lifecycle.error.clone(),
            _ => None,
        };
        drop(lifecycle);

        if let Some(error) = error {
            callback(&error);
        }
        self
    }

    /// Bind a callback to an exact wire event name.
    pub fn on(&self, event: &str, callback: EventCallback) -> &Self {
        debug!(channel = %self.name, event = %event, "Binding event");
        self.table.write().bind(event, callback);
        self
    }

    fn unbind(&self) {
        self.table.write().unbind_all_events();
    }

    fn unbind_event(&self, event: &str, callback: Option<&EventCallback>) {
        if self.table.write().unbind(event, callback) {
            debug!(channel = %self.name, event = %event, "Event unbound");
        }
    }

    /// Whether any callback is bound to the exact wire event name.
    pub fn has_listeners(&self, event: &str) -> bool {
        self.table.read().is_bound(event)
    }

    /// Number of callbacks bound to the exact wire event name.
    pub fn listener_count(&self, event: &str) -> usize {
        self.table.read().count(event)
    }

    /// Number of global listeners.
    pub fn global_listener_count(&self) -> usize {
        self.table.read().global_count()
    }

    /// Route one message from the shared group-message stream.
    ///
    /// Messages for other groups, non-JSON messages and undecodable
    /// envelopes are dropped silently.
    pub fn handle_group_message(&self, message: &GroupDataMessage) {
        if message.group != self.name {
            return;
        }

        if message.data_type != DataType::Json {
            debug!(channel = %self.name, data_type = %message.data_type, "Skipping non-json message");
            return;
        }

        let envelope: EventEnvelope = match serde_json::from_value(message.data.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(channel = %self.name, error = %e, "Discarding malformed message");
                return;
            }
        };

        let display_event = self.formatter.display_name(&envelope.event);
        let message = ChannelMessage {
            event: envelope.event,
            payload: envelope.payload,
            sequence_id: message.sequence_id,
            from_user_id: message.from_user_id.clone(),
        };

        let global = self.table.read().global_snapshot();
        for callback in global {
            callback(&display_event, &message);
        }

        let callbacks = self.table.read().snapshot(&message.event);
        for callback in callbacks {
            callback(&message);
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("listeners", &*self.table.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDetail;
    use crate::hub::LocalHub;
    use crate::client::LocalTransport;
    use crate::config::ClientOptions;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    async fn started_transport(hub: &Arc<LocalHub>) -> Arc<dyn Transport> {
        let transport = LocalTransport::new(hub.clone(), Some("alice".to_string()), ClientOptions::default());
        transport.start().await.unwrap();
        Arc::new(transport)
    }

    fn formatter() -> EventFormatter {
        EventFormatter::new(Some("App.Events".to_string()))
    }

    fn json_message(group: &str, event: &str, payload: serde_json::Value) -> GroupDataMessage {
        GroupDataMessage {
            group: group.to_string(),
            data_type: DataType::Json,
            data: json!({"event": event, "payload": payload}),
            sequence_id: Some(1),
            from_user_id: Some("bob".to_string()),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, EventCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let callback: EventCallback = Arc::new(move |_: &ChannelMessage| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_kind_prefixes() {
        assert_eq!(ChannelKind::Public.qualify("room"), "room");
        assert_eq!(ChannelKind::Private.qualify("room"), "private-room");
        assert_eq!(
            ChannelKind::EncryptedPrivate.qualify("room"),
            "private-encrypted-room"
        );
        assert_eq!(ChannelKind::Presence.qualify("room"), "presence-room");
    }

    #[tokio::test]
    async fn test_listen_formats_event_name() {
        let hub = Arc::new(LocalHub::new());
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        let (_, callback) = counter();
        channel.listen("OrderCreated", callback);

        assert!(channel.has_listeners("App.Events.OrderCreated"));
        assert!(!channel.has_listeners("OrderCreated"));
    }

    #[tokio::test]
    async fn test_routing_by_raw_event_name() {
        let hub = Arc::new(LocalHub::new());
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        channel.listen(
            "OrderCreated",
            Arc::new(move |message: &ChannelMessage| sink.lock().push(message.clone())),
        );

        channel.handle_group_message(&json_message(
            "orders",
            "App.Events.OrderCreated",
            json!({"id": 1}),
        ));

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event, "App.Events.OrderCreated");
        assert_eq!(received[0].payload, json!({"id": 1}));
        assert_eq!(received[0].sequence_id, Some(1));
        assert_eq!(received[0].from_user_id.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_routing_discards_other_groups_and_bad_data() {
        let hub = Arc::new(LocalHub::new());
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        let (count, callback) = counter();
        channel.on("created", callback);
        let global_hits = Arc::new(AtomicUsize::new(0));
        let hits = global_hits.clone();
        channel.listen_to_all(Arc::new(move |_: &str, _: &ChannelMessage| {
            hits.fetch_add(1, Ordering::SeqCst);
        }));

        channel.handle_group_message(&json_message("users", "created", json!({})));

        let mut text = json_message("orders", "created", json!({}));
        text.data_type = DataType::Text;
        channel.handle_group_message(&text);

        let mut malformed = json_message("orders", "created", json!({}));
        malformed.data = json!("not an envelope");
        channel.handle_group_message(&malformed);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(global_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_global_listeners_receive_display_names() {
        let hub = Arc::new(LocalHub::new());
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        channel.listen_to_all(Arc::new(move |event: &str, message: &ChannelMessage| {
            sink.lock().push((event.to_string(), message.event.clone()));
        }));

        channel.handle_group_message(&json_message("orders", "App.Events.OrderCreated", json!({})));
        channel.handle_group_message(&json_message("orders", "Other.Thing", json!({})));

        assert_eq!(
            *names.lock(),
            vec![
                ("OrderCreated".to_string(), "App.Events.OrderCreated".to_string()),
                (".Other.Thing".to_string(), "Other.Thing".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_listening_removes_dispatch_entry() {
        let hub = Arc::new(LocalHub::new());
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        let (count, callback) = counter();
        channel.listen("created", callback.clone());
        channel.stop_listening("created", Some(&callback));
        assert!(!channel.has_listeners("App.Events.created"));

        let message = json_message("orders", "App.Events.created", json!({}));
        channel.handle_group_message(&message);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        channel.listen("created", callback);
        channel.handle_group_message(&message);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_listening_to_all() {
        let hub = Arc::new(LocalHub::new());
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        let first: GlobalCallback = Arc::new(|_: &str, _: &ChannelMessage| {});
        let second: GlobalCallback = Arc::new(|_: &str, _: &ChannelMessage| {});
        channel.listen_to_all(first.clone()).listen_to_all(second);

        channel.stop_listening_to_all(Some(&first));
        assert_eq!(channel.global_listener_count(), 1);

        channel.stop_listening_to_all(None);
        assert_eq!(channel.global_listener_count(), 0);
    }

    #[tokio::test]
    async fn test_callback_may_unbind_during_dispatch() {
        let hub = Arc::new(LocalHub::new());
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        let (count, second) = counter();
        let weak = Arc::downgrade(&channel);
        let first: EventCallback = Arc::new(move |_: &ChannelMessage| {
            if let Some(channel) = weak.upgrade() {
                channel.stop_listening("created", None);
            }
        });
        channel.listen("created", first).listen("created", second);

        let message = json_message("orders", "App.Events.created", json!({}));
        channel.handle_group_message(&message);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        channel.handle_group_message(&message);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_join_success_fires_subscribed_once() {
        let hub = Arc::new(LocalHub::new());
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let errors = Arc::new(AtomicUsize::new(0));
        let error_count = errors.clone();
        channel
            .subscribed(Arc::new(move |ack: &AckResult| {
                let _ = tx.send(ack.clone());
            }))
            .error(Arc::new(move |_: &ConnectorError| {
                error_count.fetch_add(1, Ordering::SeqCst);
            }));

        let ack = rx.recv().await.unwrap();
        assert!(!ack.is_duplicated);
        assert_eq!(channel.state(), ChannelState::Joined);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(hub.group_members("orders").len(), 1);
    }

    #[tokio::test]
    async fn test_late_subscribed_callback_fires_immediately() {
        let hub = Arc::new(LocalHub::new());
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.subscribed(Arc::new(move |_: &AckResult| {
            let _ = tx.send(());
        }));
        rx.recv().await.unwrap();

        let late = Arc::new(AtomicUsize::new(0));
        let hits = late.clone();
        channel.subscribed(Arc::new(move |_: &AckResult| {
            hits.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_join_failure_fires_error_handlers() {
        let hub = Arc::new(LocalHub::new());
        hub.deny_group(
            "secret",
            ErrorDetail {
                name: "Forbidden".to_string(),
                message: "not allowed".to_string(),
            },
        );
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "secret",
            ChannelKind::Public,
            formatter(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let joined = Arc::new(AtomicUsize::new(0));
        let joined_count = joined.clone();
        channel
            .subscribed(Arc::new(move |_: &AckResult| {
                joined_count.fetch_add(1, Ordering::SeqCst);
            }))
            .error(Arc::new(move |error: &ConnectorError| {
                let _ = tx.send(error.detail().cloned());
            }));

        let detail = rx.recv().await.unwrap();
        assert_eq!(detail.map(|d| d.name), Some("Forbidden".to_string()));
        assert_eq!(channel.state(), ChannelState::JoinFailed);
        assert_eq!(joined.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_before_join_resolves() {
        let hub = Arc::new(LocalHub::new());
        let channel = Channel::new(
            started_transport(&hub).await,
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        let joined = Arc::new(AtomicUsize::new(0));
        let joined_count = joined.clone();
        channel.subscribed(Arc::new(move |_: &AckResult| {
            joined_count.fetch_add(1, Ordering::SeqCst);
        }));
        let (_, callback) = counter();
        channel.listen("created", callback);

        channel.unsubscribe();
        assert_eq!(channel.state(), ChannelState::Left);
        assert!(!channel.has_listeners("App.Events.created"));

        // Let the pending join and leave requests run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(joined.load(Ordering::SeqCst), 0);
        assert_eq!(channel.state(), ChannelState::Left);
    }

    #[tokio::test]
    async fn test_subscribe_twice_registers_one_hook() {
        let hub = Arc::new(LocalHub::new());
        let transport = started_transport(&hub).await;
        let channel = Channel::new(
            transport.clone(),
            Handle::current(),
            "orders",
            ChannelKind::Public,
            formatter(),
        );

        channel.subscribe();

        let (joined_tx, mut joined_rx) = mpsc::unbounded_channel();
        channel.subscribed(Arc::new(move |_: &AckResult| {
            let _ = joined_tx.send(());
        }));
        joined_rx.recv().await.unwrap();

        let (count, callback) = counter();
        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.on("created", callback).on(
            "done",
            Arc::new(move |_: &ChannelMessage| {
                let _ = tx.send(());
            }),
        );

        for event in ["created", "done"] {
            transport
                .send_to_group(
                    "orders",
                    EventEnvelope::new(event, json!({})).to_value(),
                    DataType::Json,
                )
                .await
                .unwrap();
        }
        rx.recv().await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
