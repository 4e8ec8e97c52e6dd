//! Public entry point: [`Client`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionManager;
use crate::stream::{Command, EventLoop, MessageStream};
use crate::transport::{Transport, WsTransport};
use crate::types::{ChatroomId, ClientConfig, ClientStats, Error, StatsCounters};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Handle to a chat connection.
///
/// A background task owns the connection; the methods here send it requests.
/// Call [`listen`](Client::listen) to receive messages and
/// [`close`](Client::close) to shut down. Dropping the client also shuts the
/// background task down, which ends the [`MessageStream`].
pub struct Client {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    debug: Arc<AtomicBool>,
    stats: Arc<StatsCounters>,
    listening: AtomicBool,
    channel_capacity: usize,
}

impl Client {
    /// Dial the broker over WebSocket.
    pub async fn connect(config: ClientConfig) -> Result<Self, Error> {
        Self::connect_with(config, WsTransport).await
    }

    /// Dial the broker through a custom [`Transport`].
    pub async fn connect_with<T: Transport>(config: ClientConfig, transport: T) -> Result<Self, Error> {
        let debug = Arc::new(AtomicBool::new(config.debug));
        let manager = ConnectionManager::connect(transport, config.endpoint, debug.clone()).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(COMMAND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let stats = Arc::new(StatsCounters::default());

        let task = tokio::spawn(
            EventLoop::new(
                manager,
                cmd_rx,
                cancel.clone(),
                config.reconnect,
                config.delivery,
                stats.clone(),
                debug.clone(),
            )
            .run(),
        );

        Ok(Self {
            commands: cmd_tx,
            cancel,
            task: Some(task),
            debug,
            stats,
            listening: AtomicBool::new(false),
            channel_capacity: config.channel_capacity.max(1),
        })
    }

    /// Subscribe to a chatroom. Joining the same chatroom twice sends a single
    /// subscribe request.
    pub async fn join(&self, chatroom_id: ChatroomId) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Join { chatroom_id, reply }).await?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Start delivering messages. Only one stream exists per client.
    pub async fn listen(&self) -> Result<MessageStream, Error> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyListening);
        }
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        if let Err(e) = self.send(Command::Listen { tx }).await {
            self.listening.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(MessageStream::new(rx))
    }

    /// Chatrooms subscribed on the current connection, ascending.
    pub async fn subscriptions(&self) -> Result<Vec<ChatroomId>, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscriptions { reply }).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Toggle connect / reconnect / join trace lines.
    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ClientStats {
        self.stats.snapshot()
    }

    /// Whether the background task has stopped (closed, or gave up
    /// reconnecting).
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the background task and close the connection. Any
    /// [`MessageStream`] ends once this returns.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!("Event loop task failed: {e}");
        }
    }

    async fn send(&self, cmd: Command) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        self.commands.send(cmd).await.map_err(|_| Error::Closed)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
