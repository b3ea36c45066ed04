//! Typed handles exposing the extra capabilities of channel variants.

use crate::channel::Channel;
use crate::error::Result;
use crate::formatter::CLIENT_EVENT_PREFIX;
use crate::message::{AckResult, DataType, EventEnvelope};
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

/// Callback for presence membership changes.
pub type PresenceCallback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Handle to a private or encrypted private channel.
#[derive(Debug, Clone)]
pub struct PrivateChannel {
    channel: Arc<Channel>,
}

impl PrivateChannel {
    pub(crate) fn new(channel: Arc<Channel>) -> Self {
        Self { channel }
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Unwrap into the underlying channel.
    pub fn into_inner(self) -> Arc<Channel> {
        self.channel
    }

    /// Send a `client-` prefixed event to the other members of the channel.
    ///
    /// Local listeners are not invoked. Send failures are returned to the
    /// caller.
    pub async fn whisper(&self, event_name: &str, data: serde_json::Value) -> Result<AckResult> {
        whisper(&self.channel, event_name, data).await
    }
}

impl Deref for PrivateChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

/// Handle to a presence channel.
///
/// Membership tracking is not implemented: `here`, `joining`, `leaving` and
/// `whisper` accept their arguments and do nothing.
#[derive(Debug, Clone)]
pub struct PresenceChannel {
    channel: Arc<Channel>,
}

impl PresenceChannel {
    pub(crate) fn new(channel: Arc<Channel>) -> Self {
        Self { channel }
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Unwrap into the underlying channel.
    pub fn into_inner(self) -> Arc<Channel> {
        self.channel
    }

    /// Register a callback for the current member list. Not implemented.
    pub fn here(&self, _callback: PresenceCallback) -> &Self {
        self.unsupported("here");
        self
    }

    /// Register a callback for members joining. Not implemented.
    pub fn joining(&self, _callback: PresenceCallback) -> &Self {
        self.unsupported("joining");
        self
    }

    /// Register a callback for members leaving. Not implemented.
    pub fn leaving(&self, _callback: PresenceCallback) -> &Self {
        self.unsupported("leaving");
        self
    }

    /// Whisper on a presence channel. Not implemented; nothing is sent.
    pub fn whisper(&self, _event_name: &str, _data: serde_json::Value) -> &Self {
        self.unsupported("whisper");
        self
    }

    fn unsupported(&self, operation: &str) {
        debug!(
            channel = %self.channel.name(),
            operation = %operation,
            "Presence operation is not implemented"
        );
    }
}

impl Deref for PresenceChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

async fn whisper(channel: &Channel, event_name: &str, data: serde_json::Value) -> Result<AckResult> {
    let envelope = EventEnvelope::new(format!("{CLIENT_EVENT_PREFIX}{event_name}"), data);
    debug!(channel = %channel.name(), event = %envelope.event, "Whisper");
    channel
        .transport()
        .send_to_group(channel.name(), envelope.to_value(), DataType::Json)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelKind, ChannelState};
    use crate::client::LocalTransport;
    use crate::config::ClientOptions;
    use crate::formatter::EventFormatter;
    use crate::hub::LocalHub;
    use crate::message::ChannelMessage;
    use crate::transport::Transport;
    use serde_json::json;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    async fn channel(hub: &Arc<LocalHub>, user: &str, name: &str, kind: ChannelKind) -> Arc<Channel> {
        let transport = LocalTransport::new(hub.clone(), Some(user.to_string()), ClientOptions::default());
        transport.start().await.unwrap();
        let channel = Channel::new(
            Arc::new(transport),
            Handle::current(),
            kind.qualify(name),
            kind,
            EventFormatter::new(Some("App.Events".to_string())),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.subscribed(Arc::new(move |_: &AckResult| {
            let _ = tx.send(());
        }));
        rx.recv().await.unwrap();
        channel
    }

    #[tokio::test]
    async fn test_whisper_reaches_other_members() {
        let hub = Arc::new(LocalHub::new());
        let alice = PrivateChannel::new(channel(&hub, "alice", "room", ChannelKind::Private).await);
        let bob = channel(&hub, "bob", "room", ChannelKind::Private).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        bob.listen(
            "client-typing",
            Arc::new(move |message: &ChannelMessage| {
                let _ = tx.send(message.clone());
            }),
        );

        let ack = alice.whisper("typing", json!({"name": "alice"})).await.unwrap();
        assert!(ack.ack_id.is_some());

        let message = rx.recv().await.unwrap();
        assert_eq!(message.event, "client-typing");
        assert_eq!(message.payload, json!({"name": "alice"}));
        assert_eq!(message.from_user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_encrypted_whisper_uses_prefixed_group() {
        let hub = Arc::new(LocalHub::new());
        let alice = PrivateChannel::new(
            channel(&hub, "alice", "vault", ChannelKind::EncryptedPrivate).await,
        );

        assert_eq!(alice.name(), "private-encrypted-vault");
        alice.whisper("ping", json!(null)).await.unwrap();
        assert_eq!(hub.stats().total_group_messages, 1);
    }

    #[tokio::test]
    async fn test_whisper_failure_is_returned() {
        let hub = Arc::new(LocalHub::new());
        let transport = LocalTransport::new(hub.clone(), None, ClientOptions::default());
        transport.start().await.unwrap();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let alice = PrivateChannel::new(Channel::new(
            transport.clone(),
            Handle::current(),
            "private-room",
            ChannelKind::Private,
            EventFormatter::default(),
        ));

        transport.stop().await.unwrap();
        assert!(alice.whisper("typing", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_presence_stubs_are_noops() {
        let hub = Arc::new(LocalHub::new());
        let presence = PresenceChannel::new(channel(&hub, "alice", "lobby", ChannelKind::Presence).await);
        let callback: PresenceCallback = Arc::new(|_: &serde_json::Value| {});

        presence
            .here(callback.clone())
            .joining(callback.clone())
            .leaving(callback)
            .whisper("typing", json!({}));

        assert_eq!(presence.name(), "presence-lobby");
        assert_eq!(presence.state(), ChannelState::Joined);
        assert_eq!(hub.stats().total_group_messages, 0);
    }
}
