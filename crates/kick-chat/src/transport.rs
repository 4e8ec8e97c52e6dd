//! Duplex text-frame transport used by the connection manager.
//!
//! [`WsTransport`] is the production implementation on top of
//! `tokio-tungstenite`. Other transports (proxies, recorders, test doubles)
//! plug in through [`Transport`] and [`Connection`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::Error;

/// Dials the broker.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Conn: Connection;

    async fn connect(&self, url: &str) -> Result<Self::Conn, Error>;
}

/// One established duplex connection (a transport generation).
#[async_trait]
pub trait Connection: Send + 'static {
    async fn send(&mut self, frame: String) -> Result<(), Error>;

    /// Next inbound text frame. A clean close by the peer is reported as
    /// [`Error::ConnectionClosed`].
    ///
    /// Must be cancel-safe: the event loop races it against other work.
    async fn receive(&mut self) -> Result<String, Error>;

    async fn close(&mut self) -> Result<(), Error>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

pub struct WsConnection {
    ws: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    type Conn = WsConnection;

    async fn connect(&self, url: &str) -> Result<WsConnection, Error> {
        let (ws, _resp) = tokio_tungstenite::connect_async(url).await?;
        Ok(WsConnection { ws })
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: String) -> Result<(), Error> {
        self.ws.send(tungstenite::Message::Text(frame.into())).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, Error> {
        loop {
            match self.ws.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    tracing::debug!(?frame, "Peer sent close frame");
                    return Err(Error::ConnectionClosed);
                }
                Some(Ok(_)) => {
                    // Binary, ping and pong frames; tungstenite answers pings itself
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(Error::ConnectionClosed),
            }
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.ws.close(None).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted in-memory transport for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{Connection, Transport};
    use crate::Error;

    /// Test-side view of one dialed connection.
    struct Peer {
        sent: Arc<Mutex<Vec<String>>>,
        inbound: mpsc::UnboundedSender<Option<String>>,
        closed: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct Script {
        dial_failures: u32,
        send_failures: Vec<(usize, String)>,
        peers: Vec<Peer>,
    }

    /// Every successful dial creates a new generation, numbered from 0.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        script: Arc<Mutex<Script>>,
    }

    impl MockTransport {
        pub fn fail_next_dials(&self, count: u32) {
            self.script.lock().unwrap().dial_failures = count;
        }

        /// Writes on `generation` whose frame contains `needle` will fail.
        pub fn fail_sends_containing(&self, generation: usize, needle: &str) {
            self.script
                .lock()
                .unwrap()
                .send_failures
                .push((generation, needle.to_string()));
        }

        pub fn generations(&self) -> usize {
            self.script.lock().unwrap().peers.len()
        }

        pub fn sent(&self, generation: usize) -> Vec<String> {
            self.with_peer(generation, |peer| peer.sent.lock().unwrap().clone())
        }

        pub fn push(&self, generation: usize, frame: impl Into<String>) {
            let frame = frame.into();
            self.with_peer(generation, |peer| {
                let _ = peer.inbound.send(Some(frame));
            });
        }

        /// Make the next read on `generation` fail.
        pub fn break_connection(&self, generation: usize) {
            self.with_peer(generation, |peer| {
                let _ = peer.inbound.send(None);
            });
        }

        pub fn is_closed(&self, generation: usize) -> bool {
            self.with_peer(generation, |peer| peer.closed.load(Ordering::SeqCst))
        }

        fn with_peer<R>(&self, generation: usize, f: impl FnOnce(&Peer) -> R) -> R {
            let script = self.script.lock().unwrap();
            f(script.peers.get(generation).unwrap())
        }
    }

    pub(crate) struct MockConnection {
        sent: Arc<Mutex<Vec<String>>>,
        inbound: mpsc::UnboundedReceiver<Option<String>>,
        fail_needles: Vec<String>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        type Conn = MockConnection;

        async fn connect(&self, _url: &str) -> Result<MockConnection, Error> {
            let mut script = self.script.lock().unwrap();
            if script.dial_failures > 0 {
                script.dial_failures -= 1;
                return Err(Error::Transport("connection refused".into()));
            }
            let generation = script.peers.len();
            let fail_needles = script
                .send_failures
                .iter()
                .filter(|(g, _)| *g == generation)
                .map(|(_, needle)| needle.clone())
                .collect();
            let (tx, rx) = mpsc::unbounded_channel();
            let sent = Arc::new(Mutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            script.peers.push(Peer {
                sent: sent.clone(),
                inbound: tx,
                closed: closed.clone(),
            });
            Ok(MockConnection {
                sent,
                inbound: rx,
                fail_needles,
                closed,
            })
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn send(&mut self, frame: String) -> Result<(), Error> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::ConnectionClosed);
            }
            if self.fail_needles.iter().any(|n| frame.contains(n.as_str())) {
                return Err(Error::Transport("write failed".into()));
            }
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn receive(&mut self) -> Result<String, Error> {
            match self.inbound.recv().await {
                Some(Some(frame)) => Ok(frame),
                Some(None) | None => Err(Error::ConnectionClosed),
            }
        }

        async fn close(&mut self) -> Result<(), Error> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
