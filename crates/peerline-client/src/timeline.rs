//! Caller-facing conversation view.
//!
//! History arrives newest first from the channel client; the timeline keeps
//! it oldest first, drops duplicates by message id and holds optimistic
//! local echoes until the network copy shows up.

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use peerline_shared::{Address, Content, Message, MessageOrigin};

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    message: Message,
}

/// Messages of one conversation, ordered by timestamp ascending. Ties keep
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<Entry>,
    ids: HashSet<String>,
    next_seq: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a newest-first history listing.
    pub fn from_history(newest_first: Vec<Message>) -> Self {
        let mut timeline = Self::new();
        for message in newest_first.into_iter().rev() {
            timeline.insert(message);
        }
        timeline
    }

    /// Add a message. Returns `false` if one with the same id is already
    /// present.
    ///
    /// A network message from the same sender with the same content as a
    /// pending local echo replaces that echo.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }

        if message.origin == MessageOrigin::Network {
            let echo = self.entries.iter().position(|e| {
                e.message.origin == MessageOrigin::LocalEcho
                    && e.message.sender == message.sender
                    && e.message.content == message.content
            });
            if let Some(pos) = echo {
                let removed = self.entries.remove(pos);
                self.ids.remove(&removed.message.id);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let at = self
            .entries
            .partition_point(|e| e.message.sent_at <= message.sent_at);
        self.ids.insert(message.id.clone());
        self.entries.insert(at, Entry { seq, message });
        true
    }

    /// Show a just-sent message right away, stamped with the local clock.
    pub fn push_local_echo(&mut self, sender: Address, content: impl Into<Content>) -> Message {
        let content = content.into();
        let message = Message {
            id: format!("local-{}", Uuid::new_v4()),
            sender,
            display_content: content.display(),
            content,
            sent_at: Utc::now(),
            origin: MessageOrigin::LocalEcho,
        };
        self.insert(message.clone());
        message
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn last(&self) -> Option<&Message> {
        self.entries.last().map(|e| &e.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending local echoes, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.messages()
            .filter(|m| m.origin == MessageOrigin::LocalEcho)
    }

    /// Insertion sequence numbers in display order.
    #[cfg(test)]
    fn seqs(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.seq).collect()
    }
}
