//! Deduplicated local message list.

use reef_protocol::{Message, MessageId};
use std::collections::HashSet;

/// Messages known to the client, keyed by id.
///
/// A message id is stored at most once no matter how many times it arrives
/// through history pages or the live stream.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
}

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a history page, skipping known ids.
    ///
    /// The log is re-sorted by `(created_at, id)` when anything was added.
    /// Returns the number of messages added.
    pub fn hydrate(&mut self, page: impl IntoIterator<Item = Message>) -> usize {
        let before = self.messages.len();
        for message in page {
            if self.seen.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }

        let added = self.messages.len() - before;
        if added > 0 {
            self.messages.sort_by(Message::chronological_cmp);
        }
        added
    }

    /// Append a live message in receipt order.
    ///
    /// Returns `false` if the id was already present.
    pub fn append(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Newest message, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}
