//! Pusher wire protocol: constants, frame encoders, and the inbound decoder.

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::types::{ChatMessage, ChatroomId};

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

pub const DEFAULT_HOST: &str = "ws-us2.pusher.com";
pub const DEFAULT_APP_KEY: &str = "32cbd69e4b950bf97679";
const PROTOCOL_VERSION: &str = "7";
const CLIENT_NAME: &str = "js";
const CLIENT_VERSION: &str = "8.4.0-rc2";

/// Broker URL used when [`ClientConfig::endpoint`](crate::ClientConfig) is left
/// at its default.
pub const DEFAULT_ENDPOINT: &str = "wss://ws-us2.pusher.com/app/32cbd69e4b950bf97679?protocol=7&client=js&version=8.4.0-rc2&flash=false";

/// Build a broker URL for an app key on the given host.
///
/// `host` may carry a scheme (`ws://127.0.0.1:6001`); `wss://` is assumed
/// otherwise.
pub fn endpoint_url(host: &str, app_key: &str) -> Result<String, Error> {
    let base = if host.contains("://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("wss://{host}")
    };
    let mut u = url::Url::parse(&format!("{base}/app/{app_key}"))?;
    u.query_pairs_mut()
        .append_pair("protocol", PROTOCOL_VERSION)
        .append_pair("client", CLIENT_NAME)
        .append_pair("version", CLIENT_VERSION)
        .append_pair("flash", "false");
    Ok(u.to_string())
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub mod event {
    pub const SUBSCRIBE: &str = "pusher:subscribe";
    pub const PING: &str = "pusher:ping";
    pub const PONG: &str = "pusher:pong";
    pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
    pub const ERROR: &str = "pusher:error";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
    /// Event name the broker uses for chat messages.
    pub const CHAT_MESSAGE: &str = r"App\Events\ChatMessageEvent";
}

/// Canonical channel name for a chatroom.
pub fn channel_name(chatroom_id: ChatroomId) -> String {
    format!("chatrooms.{chatroom_id}.v2")
}

// ---------------------------------------------------------------------------
// Outbound frames
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OutboundFrame<'a, D> {
    event: &'a str,
    data: D,
}

#[derive(Debug, Serialize)]
struct SubscribeData {
    channel: String,
    // Private-channel auth is not issued; the broker accepts an empty string
    // for public chatrooms.
    auth: String,
}

#[derive(Debug, Serialize)]
struct Empty {}

/// `{"event":"pusher:subscribe","data":{"channel":"chatrooms.<id>.v2","auth":""}}`
pub fn subscribe_frame(chatroom_id: ChatroomId) -> Result<String, Error> {
    let frame = OutboundFrame {
        event: event::SUBSCRIBE,
        data: SubscribeData {
            channel: channel_name(chatroom_id),
            auth: String::new(),
        },
    };
    Ok(serde_json::to_string(&frame)?)
}

pub fn pong_frame() -> Result<String, Error> {
    let frame = OutboundFrame {
        event: event::PONG,
        data: Empty {},
    };
    Ok(serde_json::to_string(&frame)?)
}

// ---------------------------------------------------------------------------
// Inbound decoding
// ---------------------------------------------------------------------------

/// Outer structure of every inbound frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    pub event: String,
    /// Application events carry a JSON-encoded string here; some protocol
    /// events carry an object.
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub channel: Option<String>,
}

impl Envelope {
    /// `pusher:` and `pusher_internal:` events belong to the connection, not
    /// to a chatroom.
    pub fn is_protocol_event(&self) -> bool {
        self.event.starts_with("pusher:") || self.event.starts_with("pusher_internal:")
    }
}

/// Why an inbound frame was discarded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event {event} carries no JSON-encoded payload")]
    UnexpectedData { event: String },
}

pub fn decode_envelope(frame: &str) -> Result<Envelope, DecodeError> {
    Ok(serde_json::from_str(frame)?)
}

pub fn decode_chat_message(envelope: &Envelope) -> Result<ChatMessage, DecodeError> {
    let serde_json::Value::String(ref payload) = envelope.data else {
        return Err(DecodeError::UnexpectedData {
            event: envelope.event.clone(),
        });
    };
    Ok(serde_json::from_str(payload)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
