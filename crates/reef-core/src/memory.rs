//! In-memory message store and channel registry.
//!
//! Used by the server when no external database is configured, and by tests.
//! Contents are lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reef_protocol::model::validate_slug;
use reef_protocol::{Channel, ChannelId, Message, MessageId, NewMessage};
use tracing::debug;

use crate::error::StoreError;
use crate::store::{ChannelRegistry, MessageStore};

/// A channel and its messages, kept sorted by `(created_at, id)`.
#[derive(Debug)]
struct ChannelRecord {
    channel: Channel,
    messages: Vec<Message>,
}

/// Memory-backed [`MessageStore`] and [`ChannelRegistry`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    channels: DashMap<ChannelId, ChannelRecord>,
    /// Slug to channel id. A slug is reserved here before its channel is
    /// inserted.
    slugs: DashMap<String, ChannelId>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with channels.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel is invalid or duplicated.
    pub fn with_channels(channels: impl IntoIterator<Item = Channel>) -> Result<Self, StoreError> {
        let store = Self::new();
        for channel in channels {
            store.create_channel(channel)?;
        }
        Ok(store)
    }

    /// Add a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the slug is invalid or the id or slug is taken.
    pub fn create_channel(&self, mut channel: Channel) -> Result<(), StoreError> {
        validate_slug(&channel.slug).map_err(StoreError::InvalidChannel)?;
        if channel.id.is_empty() {
            return Err(StoreError::InvalidChannel("Channel id cannot be empty"));
        }
        // Lock order is slugs then channels
        let slug_slot = match self.slugs.entry(channel.slug.clone()) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateSlug(channel.slug)),
            Entry::Vacant(slot) => slot,
        };

        match self.channels.entry(channel.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateChannel(channel.id)),
            Entry::Vacant(slot) => {
                debug!(channel = %channel.id, slug = %channel.slug, "Channel created");
                slug_slot.insert(channel.id.clone());
                channel.message_count = 0;
                slot.insert(ChannelRecord {
                    channel,
                    messages: Vec::new(),
                });
                Ok(())
            }
        }
    }

    /// Remove a channel and its messages.
    ///
    /// Live subscribers are not notified here; pair this with
    /// `Broadcaster::close_channel`.
    pub fn delete_channel(&self, channel_id: &str) -> Option<Channel> {
        let removed = self.channels.remove(channel_id).map(|(_, record)| record.channel);
        if let Some(channel) = &removed {
            self.slugs.remove(&channel.slug);
            debug!(channel = %channel_id, "Channel deleted");
        }
        removed
    }

    /// Number of messages stored for a channel.
    #[must_use]
    pub fn message_count(&self, channel_id: &str) -> usize {
        self.channels
            .get(channel_id)
            .map(|record| record.messages.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut record = self
            .channels
            .get_mut(&message.channel_id)
            .ok_or_else(|| StoreError::ChannelNotFound(message.channel_id.clone()))?;

        // Keep the per-channel order total even if the wall clock steps back
        let now = Utc::now();
        let created_at = record
            .messages
            .last()
            .map_or(now, |last| last.created_at.max(now));

        let stored = Message {
            id: MessageId::generate(),
            channel_id: message.channel_id,
            user_id: message.user_id,
            user_name: message.user_name,
            content: message.content,
            created_at,
        };

        record.messages.push(stored.clone());
        record.channel.message_count += 1;

        Ok(stored)
    }

    async fn list_recent(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError> {
        let record = self
            .channels
            .get(channel_id)
            .ok_or_else(|| StoreError::ChannelNotFound(channel_id.to_string()))?;

        let messages = &record.messages;
        let end = before.map_or(messages.len(), |cutoff| {
            messages.partition_point(|m| m.created_at < cutoff)
        });
        let start = end.saturating_sub(limit);

        Ok(messages[start..end].to_vec())
    }
}

#[async_trait]
impl ChannelRegistry for InMemoryStore {
    async fn exists(&self, channel_id: &str) -> Result<bool, StoreError> {
        Ok(self.channels.contains_key(channel_id))
    }

    async fn get(&self, channel_id: &str) -> Result<Option<Channel>, StoreError> {
        Ok(self
            .channels
            .get(channel_id)
            .map(|record| record.channel.clone()))
    }

    async fn list(&self) -> Result<Vec<Channel>, StoreError> {
        let mut channels: Vec<Channel> = self
            .channels
            .iter()
            .map(|record| record.channel.clone())
            .collect();
        channels.sort_by(Channel::listing_cmp);
        Ok(channels)
    }
}
