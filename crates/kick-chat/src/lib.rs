//! Resilient chat subscriber for Pusher-protocol brokers.
//!
//! Joins chatroom channels over WebSocket and delivers decoded chat messages
//! as an ordered stream.
//!
//! # Features
//! - Idempotent chatroom joins
//! - Automatic reconnect with replay of every joined chatroom
//! - Protocol keepalive (`pusher:ping` is answered with `pusher:pong`)
//! - Malformed frames are skipped without interrupting the stream
//! - Pluggable [`Transport`] for proxies and tests
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), kick_chat::Error> {
//! use kick_chat::{Client, ClientConfig};
//!
//! let client = Client::connect(ClientConfig::default()).await?;
//! client.join(668).await?;
//!
//! let mut messages = client.listen().await?;
//! while let Some(msg) = messages.next().await {
//!     println!("{}: {}", msg.sender.username, msg.content);
//! }
//! # Ok(())
//! # }
//! ```

/// Connection lifecycle trace line, emitted only while debug output is on.
macro_rules! lifecycle {
    ($debug:expr, $($arg:tt)+) => {
        if $debug.load(::std::sync::atomic::Ordering::Relaxed) {
            ::tracing::info!($($arg)+);
        }
    };
}

mod client;
mod connection;
pub mod protocol;
mod registry;
mod stream;
pub mod transport;
mod types;

pub use client::Client;
pub use protocol::{DEFAULT_ENDPOINT, endpoint_url};
pub use stream::MessageStream;
pub use transport::{Connection, Transport, WsConnection, WsTransport};
pub use types::{
    Badge, BoxError, ChatMessage, ChatroomId, ClientConfig, ClientStats, DeliveryPolicy, Error,
    Identity, ReconnectPolicy, Sender,
};
