//! Background event loop: reads frames, decodes chat messages, delivers them,
//! and heals the connection after read failures.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;
use crate::connection::ConnectionManager;
use crate::protocol::{self, DecodeError, Envelope, event};
use crate::transport::Transport;
use crate::types::{ChatMessage, ChatroomId, DeliveryPolicy, ReconnectPolicy, StatsCounters};

/// Requests from a [`Client`](crate::Client) to its event loop.
pub(crate) enum Command {
    Join {
        chatroom_id: ChatroomId,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Subscriptions {
        reply: oneshot::Sender<Vec<ChatroomId>>,
    },
    Listen {
        tx: mpsc::Sender<ChatMessage>,
    },
}

/// Decoded chat messages, in the order their frames arrived.
///
/// Ends (`None`) once the client is closed or reconnecting was given up.
pub struct MessageStream {
    rx: mpsc::Receiver<ChatMessage>,
}

impl MessageStream {
    pub(crate) fn new(rx: mpsc::Receiver<ChatMessage>) -> Self {
        Self { rx }
    }

    /// Receive the next message. Returns `None` once the event loop has exited.
    pub async fn next(&mut self) -> Option<ChatMessage> {
        self.rx.recv().await
    }
}

impl futures_util::Stream for MessageStream {
    type Item = ChatMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChatMessage>> {
        self.rx.poll_recv(cx)
    }
}

enum LoopAction {
    Continue,
    Stop,
}

pub(crate) struct EventLoop<T: Transport> {
    manager: ConnectionManager<T>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    reconnect: ReconnectPolicy,
    delivery: DeliveryPolicy,
    stats: Arc<StatsCounters>,
    debug: Arc<AtomicBool>,
    listener: Option<mpsc::Sender<ChatMessage>>,
    failed_attempts: u32,
    retry_at: Option<Instant>,
}

impl<T: Transport> EventLoop<T> {
    pub fn new(
        manager: ConnectionManager<T>,
        commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
        reconnect: ReconnectPolicy,
        delivery: DeliveryPolicy,
        stats: Arc<StatsCounters>,
        debug: Arc<AtomicBool>,
    ) -> Self {
        Self {
            manager,
            commands,
            cancel,
            reconnect,
            delivery,
            stats,
            debug,
            listener: None,
            failed_attempts: 0,
            retry_at: None,
        }
    }

    pub async fn run(mut self) {
        loop {
            // Frames are only pulled once someone listens, and never while a
            // reconnect backoff is pending.
            let reading =
                self.listener.is_some() && self.retry_at.is_none() && self.manager.is_connected();
            let retry_at = self.retry_at;

            let action = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    lifecycle!(self.debug, "Close requested");
                    LoopAction::Stop
                }

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => LoopAction::Stop,
                },

                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.recover().await
                }

                frame = self.manager.receive(), if reading => match frame {
                    Ok(frame) => self.handle_frame(&frame).await,
                    Err(e) => {
                        tracing::warn!("Error reading frame: {e}");
                        self.recover().await
                    }
                },
            };

            if let LoopAction::Stop = action {
                break;
            }
        }

        self.manager.shutdown().await;
        lifecycle!(self.debug, "Event loop stopped");
    }

    async fn handle_command(&mut self, cmd: Command) -> LoopAction {
        match cmd {
            Command::Join { chatroom_id, reply } => {
                let result = self.manager.join(chatroom_id).await;
                let _ = reply.send(result);
            }
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.manager.subscriptions());
            }
            Command::Listen { tx } => {
                lifecycle!(self.debug, "Listening for messages");
                self.listener = Some(tx);
            }
        }
        LoopAction::Continue
    }

    /// Reconnect after a read failure. On failure the next attempt is
    /// scheduled after the configured backoff.
    async fn recover(&mut self) -> LoopAction {
        if self.cancel.is_cancelled() {
            return LoopAction::Stop;
        }

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return LoopAction::Stop,
            result = self.manager.reconnect() => result,
        };

        match result {
            Ok(()) => {
                self.failed_attempts = 0;
                let total = StatsCounters::bump(&self.stats.reconnects);
                lifecycle!(self.debug, reconnects = total, "Reconnected");
                LoopAction::Continue
            }
            Err(e) => {
                self.failed_attempts += 1;
                tracing::warn!(attempt = self.failed_attempts, "Error reconnecting: {e}");
                if let Some(max) = self.reconnect.max_attempts
                    && self.failed_attempts >= max
                {
                    tracing::error!("Giving up after {max} failed reconnect attempts");
                    return LoopAction::Stop;
                }
                self.retry_at = Some(Instant::now() + self.reconnect.backoff);
                LoopAction::Continue
            }
        }
    }

    async fn handle_frame(&mut self, frame: &str) -> LoopAction {
        let envelope = match protocol::decode_envelope(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.record_drop(None, &e);
                return LoopAction::Continue;
            }
        };

        if envelope.is_protocol_event() {
            self.handle_protocol_event(&envelope).await;
            return LoopAction::Continue;
        }

        match protocol::decode_chat_message(&envelope) {
            Ok(message) => self.deliver(message).await,
            Err(e) => {
                self.record_drop(Some(&envelope.event), &e);
                LoopAction::Continue
            }
        }
    }

    async fn handle_protocol_event(&mut self, envelope: &Envelope) {
        match envelope.event.as_str() {
            event::PING => {
                let sent = match protocol::pong_frame() {
                    Ok(pong) => self.manager.send_frame(pong).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    // A dead connection surfaces on the next read
                    tracing::warn!("Failed to answer ping: {e}");
                }
            }
            event::CONNECTION_ESTABLISHED => {
                lifecycle!(self.debug, data = %envelope.data, "Connection established");
            }
            event::SUBSCRIPTION_SUCCEEDED => {
                lifecycle!(self.debug, channel = ?envelope.channel, "Subscription succeeded");
            }
            event::ERROR => {
                tracing::warn!(data = %envelope.data, "Broker reported an error");
            }
            other => {
                tracing::trace!(event = other, "Ignoring protocol event");
            }
        }
    }

    fn record_drop(&self, event: Option<&str>, err: &DecodeError) {
        let total = StatsCounters::bump(&self.stats.dropped_frames);
        tracing::debug!(?event, total_dropped = total, "Discarding frame: {err}");
    }

    async fn deliver(&mut self, message: ChatMessage) -> LoopAction {
        let Some(tx) = self.listener.clone() else {
            return LoopAction::Continue;
        };

        match self.delivery {
            DeliveryPolicy::Block => loop {
                // Commands are still served while the consumer is behind, so
                // a consumer that joins from its read loop never stalls us.
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return LoopAction::Stop,
                    permit = tx.reserve() => match permit {
                        Ok(permit) => {
                            permit.send(message);
                            break;
                        }
                        Err(_) => {
                            lifecycle!(self.debug, "Message stream dropped");
                            return LoopAction::Stop;
                        }
                    },
                    cmd = self.commands.recv() => match cmd {
                        Some(cmd) => {
                            if let LoopAction::Stop = self.handle_command(cmd).await {
                                return LoopAction::Stop;
                            }
                        }
                        None => return LoopAction::Stop,
                    },
                }
            },
            DeliveryPolicy::DropNewest => match tx.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let total = StatsCounters::bump(&self.stats.dropped_messages);
                    tracing::warn!(total_dropped = total, "Message stream full, dropping message");
                    return LoopAction::Continue;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    lifecycle!(self.debug, "Message stream dropped");
                    return LoopAction::Stop;
                }
            },
        }

        StatsCounters::bump(&self.stats.delivered);
        LoopAction::Continue
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
