//! Connection management: dialing, joining chatrooms, reconnect with replay.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::Error;
use crate::protocol;
use crate::registry::SubscriptionRegistry;
use crate::transport::{Connection, Transport};
use crate::types::ChatroomId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Connected,
    /// The previous generation is gone and either no new connection exists
    /// yet or the replay onto it has not completed.
    Reconnecting,
    Closed,
}

/// Owns the live connection and the set of joined chatrooms.
///
/// Only the event loop task holds a manager, so every mutation of connection
/// state is serialized through it.
pub(crate) struct ConnectionManager<T: Transport> {
    transport: T,
    endpoint: String,
    conn: Option<T::Conn>,
    generation: u64,
    registry: SubscriptionRegistry,
    /// Chatrooms from the last-known-good set that are not yet subscribed on
    /// the current generation. Replayed by the next reconnect.
    backlog: BTreeSet<ChatroomId>,
    state: ConnectionState,
    debug: Arc<AtomicBool>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Dial `endpoint`. A manager only exists once the first dial succeeded.
    pub async fn connect(
        transport: T,
        endpoint: String,
        debug: Arc<AtomicBool>,
    ) -> Result<Self, Error> {
        url::Url::parse(&endpoint)?;
        lifecycle!(debug, %endpoint, "Connecting");
        let conn = transport.connect(&endpoint).await?;
        lifecycle!(debug, "Connected");
        Ok(Self {
            transport,
            endpoint,
            conn: Some(conn),
            generation: 1,
            registry: SubscriptionRegistry::default(),
            backlog: BTreeSet::new(),
            state: ConnectionState::Connected,
            debug,
        })
    }

    /// Subscribe to a chatroom on the current connection.
    ///
    /// Joining a chatroom that is already in the registry sends nothing. The
    /// registry only records the id once the subscribe frame was written.
    pub async fn join(&mut self, chatroom_id: ChatroomId) -> Result<(), Error> {
        lifecycle!(self.debug, chatroom_id, "Joining chatroom");
        if self.state == ConnectionState::Closed {
            return Err(Error::Closed);
        }
        if self.registry.contains(chatroom_id) {
            return Ok(());
        }

        let frame = protocol::subscribe_frame(chatroom_id)?;
        let conn = self.conn.as_mut().ok_or(Error::NotConnected)?;
        conn.send(frame).await.map_err(|e| Error::Join {
            chatroom_id,
            source: Box::new(e),
        })?;
        self.registry.insert(chatroom_id);
        Ok(())
    }

    /// Replace the connection with a fresh one and replay every joined
    /// chatroom onto it.
    ///
    /// On a dial failure there is no usable connection afterwards. On a replay
    /// failure the registry holds exactly the chatrooms replayed before the
    /// failing one; the rest stay in the backlog for the next attempt.
    pub async fn reconnect(&mut self) -> Result<(), Error> {
        if self.state == ConnectionState::Closed {
            return Err(Error::Closed);
        }
        lifecycle!(self.debug, generation = self.generation, "Reconnecting");
        self.state = ConnectionState::Reconnecting;

        if let Some(mut conn) = self.conn.take()
            && let Err(e) = conn.close().await
        {
            tracing::debug!("Ignoring close error on stale connection: {e}");
        }
        let mut previous = self.registry.take();
        self.backlog.append(&mut previous);

        let conn = self.transport.connect(&self.endpoint).await?;
        self.conn = Some(conn);
        self.generation += 1;

        let mut pending = std::mem::take(&mut self.backlog);
        let ids: Vec<ChatroomId> = pending.iter().copied().collect();
        for chatroom_id in ids {
            if let Err(e) = self.join(chatroom_id).await {
                self.backlog = pending.split_off(&chatroom_id);
                tracing::warn!(
                    chatroom_id,
                    replayed = self.registry.len(),
                    remaining = self.backlog.len(),
                    "Replay join failed"
                );
                return Err(e);
            }
        }

        self.state = ConnectionState::Connected;
        lifecycle!(
            self.debug,
            generation = self.generation,
            chatrooms = self.registry.len(),
            "Reconnected"
        );
        Ok(())
    }

    /// Close the connection. Further joins fail with [`Error::Closed`].
    pub async fn shutdown(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        lifecycle!(self.debug, "Shutting down");
        if let Some(mut conn) = self.conn.take()
            && let Err(e) = conn.close().await
        {
            tracing::debug!("Ignoring close error during shutdown: {e}");
        }
    }

    pub async fn receive(&mut self) -> Result<String, Error> {
        match self.conn.as_mut() {
            Some(conn) => conn.receive().await,
            None => Err(Error::NotConnected),
        }
    }

    pub async fn send_frame(&mut self, frame: String) -> Result<(), Error> {
        match self.conn.as_mut() {
            Some(conn) => conn.send(frame).await,
            None => Err(Error::NotConnected),
        }
    }

    /// A connection exists that frames can be read from.
    pub fn is_connected(&self) -> bool {
        self.state != ConnectionState::Closed && self.conn.is_some()
    }

    pub fn subscriptions(&self) -> Vec<ChatroomId> {
        self.registry.ids()
    }

    #[cfg(test)]
    pub fn backlog(&self) -> Vec<ChatroomId> {
        self.backlog.iter().copied().collect()
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
