//! Public types for the kick-chat crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite;

use crate::protocol::DEFAULT_ENDPOINT;

/// Numeric chatroom identifier; also identifies the broker channel.
pub type ChatroomId = u64;

/// A boxed error type for custom transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A chat message decoded from a chatroom channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chatroom_id: ChatroomId,
    pub content: String,
    /// Message type as sent by the broker (e.g. `"message"`, `"reply"`).
    #[serde(rename = "type")]
    pub message_type: String,
    pub created_at: DateTime<Utc>,
    pub sender: Sender,
}

/// Author of a [`ChatMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: u64,
    /// Display name.
    pub username: String,
    pub slug: String,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub color: String,
    /// Badges in the order the broker lists them.
    pub badges: Vec<Badge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    #[serde(rename = "type")]
    pub badge_type: String,
    pub text: String,
    /// Only subscriber-style badges carry a count.
    #[serde(default)]
    pub count: u32,
}

/// How the background task hands messages to a slow consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Wait for the consumer. Frame ingestion stalls until there is room in
    /// the stream buffer.
    #[default]
    Block,
    /// Never wait: when the stream buffer is full the new message is dropped
    /// and counted in [`ClientStats::dropped_messages`].
    DropNewest,
}

/// Retry behaviour after a transport read failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay between a failed reconnect and the next attempt. The first
    /// attempt after a read failure is immediate.
    pub backoff: Duration,
    /// Consecutive failed attempts tolerated before the stream is ended.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

/// Configuration for [`Client::connect`](crate::Client::connect).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full WebSocket URL of the broker, including the protocol query
    /// parameters. Defaults to the public chat broker.
    pub endpoint: String,
    pub reconnect: ReconnectPolicy,
    pub delivery: DeliveryPolicy,
    /// Buffer size of the [`MessageStream`](crate::MessageStream). Values
    /// below 1 are treated as 1.
    pub channel_capacity: usize,
    /// Emit connect / reconnect / join trace lines. Can be changed later with
    /// [`Client::set_debug`](crate::Client::set_debug).
    pub debug: bool,
}

pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 64;

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect: ReconnectPolicy::default(),
            delivery: DeliveryPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            debug: false,
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at a different broker URL.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}

/// Snapshot of the client's diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Messages handed to the consumer.
    pub delivered: u64,
    /// Inbound frames discarded because they did not decode.
    pub dropped_frames: u64,
    /// Decoded messages discarded by [`DeliveryPolicy::DropNewest`].
    pub dropped_messages: u64,
    /// Successful reconnects.
    pub reconnects: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub delivered: AtomicU64,
    pub dropped_frames: AtomicU64,
    pub dropped_messages: AtomicU64,
    pub reconnects: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> ClientStats {
        ClientStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("transport error: {0}")]
    Transport(BoxError),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("no usable connection")]
    NotConnected,

    #[error("client is closed")]
    Closed,

    #[error("marshal error: {0}")]
    Marshal(#[from] serde_json::Error),

    #[error("error joining chatroom {chatroom_id}: {source}")]
    Join {
        chatroom_id: ChatroomId,
        source: Box<Error>,
    },

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("listen() was already called on this client")]
    AlreadyListening,
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}
