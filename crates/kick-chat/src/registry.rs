//! The set of chatrooms joined on the current connection generation.

use std::collections::BTreeSet;

use crate::types::ChatroomId;

/// Chatroom ids whose subscribe frame was written on the live connection.
///
/// Iteration is in ascending id order, so replays are deterministic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct SubscriptionRegistry {
    channels: BTreeSet<ChatroomId>,
}

impl SubscriptionRegistry {
    pub fn contains(&self, chatroom_id: ChatroomId) -> bool {
        self.channels.contains(&chatroom_id)
    }

    /// Returns `false` if the id was already present.
    pub fn insert(&mut self, chatroom_id: ChatroomId) -> bool {
        self.channels.insert(chatroom_id)
    }

    /// Swap the registry to empty and return what it held.
    pub fn take(&mut self) -> BTreeSet<ChatroomId> {
        std::mem::take(&mut self.channels)
    }

    pub fn ids(&self) -> Vec<ChatroomId> {
        self.channels.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }
}
