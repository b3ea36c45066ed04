//! # Groupcast
//!
//! Channel multiplexing and event dispatch over a single group-messaging
//! connection.
//!
//! Many independent subscribers listen for named, namespaced events on named
//! channels while only one physical connection, and one group subscription
//! per channel, exists underneath.
//!
//! ## Features
//!
//! - **Connector**: owns the transport and a memoized registry of channels
//! - **Channels**: group join/leave lifecycle, per-event and global listeners
//! - **Variants**: private channels can whisper; presence channels are stubs
//! - **Event Formatting**: namespacing of outbound and inbound event names
//! - **Local Hub**: an in-process service and transport for tests and demos
//!
//! ## Channel Names
//!
//! - `orders` - Public channel
//! - `private-orders` - Private channel
//! - `private-encrypted-orders` - Encrypted private channel (naming only)
//! - `presence-orders` - Presence channel
//!
//! ## Example
//!
//! ```rust
//! use groupcast::{ChannelMessage, ClientOptions, Connector, ConnectorConfig, LocalHub, LocalTransport};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> groupcast::Result<()> {
//! let hub = Arc::new(LocalHub::new());
//! let transport = LocalTransport::new(hub.clone(), Some("alice".to_string()), ClientOptions::default());
//!
//! let connector = Connector::new(ConnectorConfig::default()).with_client(Arc::new(transport));
//! connector.connect()?;
//!
//! connector.listen(
//!     "orders",
//!     "OrderShipped",
//!     Arc::new(|message: &ChannelMessage| println!("shipped: {}", message.payload)),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Wire Envelope
//!
//! Channel events travel as JSON group messages:
//!
//! ```json
//! {"event": "App.Events.OrderShipped", "payload": {"id": 1}}
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Connector                   │
//! │  ┌─────────────────────────────────┐    │
//! │  │         Channel Registry         │    │
//! │  │  qualified name -> Channel       │    │
//! │  │    └─> listener table            │    │
//! │  │    └─> join lifecycle            │    │
//! │  └─────────────────────────────────┘    │
//! │                  │                       │
//! │  ┌───────────────▼───────────────────┐  │
//! │  │     Transport (one connection)    │  │
//! │  │  group-message hook per channel   │  │
//! │  └───────────────────────────────────┘  │
//! └─────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod formatter;
pub mod hub;
pub mod message;
pub mod subscription;
pub mod transport;
pub mod variants;

// Re-export main types
pub use channel::{Channel, ChannelKind, ChannelState};
pub use client::{LocalTransport, LocalTransportFactory};
pub use config::{ClientOptions, ConnectorConfig, Protocol, RetryMode, RetryOptions};
pub use connector::{ConnectionState, Connector};
pub use error::{ConnectorError, ErrorDetail, Result};
pub use formatter::EventFormatter;
pub use hub::{ClientEvent, HubStats, LocalHub};
pub use message::{
    AckResult, ChannelMessage, DataType, EventEnvelope, GroupDataMessage, SendEventOptions,
    ServerDataMessage,
};
pub use subscription::{ErrorCallback, EventCallback, GlobalCallback, SubscribedCallback};
pub use transport::{
    EventHandler, HandlerId, Transport, TransportEvent, TransportEventKind, TransportFactory,
};
pub use variants::{PresenceCallback, PresenceChannel, PrivateChannel};
