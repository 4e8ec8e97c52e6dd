//! Print chat messages from one or more chatrooms.
//!
//! ```sh
//! cargo run -p kick-chat --example listen -- <CHATROOM_ID>...
//! ```
//!
//! Set `KICK_CHAT_ENDPOINT` to point at a different broker and
//! `KICK_CHAT_DEBUG=1` for connection lifecycle logs. Messages are printed to
//! stdout as JSON lines (pipe to `jq` for formatting). Ctrl-C closes the client.

use kick_chat::{ChatroomId, Client, ClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let chatrooms = std::env::args()
        .skip(1)
        .map(|arg| arg.parse::<ChatroomId>())
        .collect::<Result<Vec<_>, _>>()?;
    if chatrooms.is_empty() {
        return Err("usage: listen <CHATROOM_ID>...".into());
    }

    let mut config = match std::env::var("KICK_CHAT_ENDPOINT") {
        Ok(endpoint) => ClientConfig::with_endpoint(endpoint),
        Err(_) => ClientConfig::default(),
    };
    config.debug = std::env::var("KICK_CHAT_DEBUG").is_ok_and(|v| v == "1");

    let client = Client::connect(config).await?;
    for id in &chatrooms {
        client.join(*id).await?;
        eprintln!("[joined] chatroom {id}");
    }

    let mut messages = client.listen().await?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("[closing]");
                break;
            }
            msg = messages.next() => match msg {
                Some(msg) => {
                    eprintln!("[message] chatroom={} from={}", msg.chatroom_id, msg.sender.username);
                    println!("{}", serde_json::to_string(&msg)?);
                }
                None => {
                    eprintln!("[stream ended]");
                    break;
                }
            },
        }
    }

    let stats = client.stats();
    client.close().await;
    eprintln!(
        "[stats] delivered={} dropped_frames={} dropped_messages={} reconnects={}",
        stats.delivered, stats.dropped_frames, stats.dropped_messages, stats.reconnects
    );
    Ok(())
}
