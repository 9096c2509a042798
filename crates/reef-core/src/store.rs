//! Persistence interfaces consumed by the core.
//!
//! The durable message store and the channel registry live outside this
//! crate. The core only issues single-message inserts and bounded
//! chronological reads through these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reef_protocol::{Channel, Message, NewMessage};

use crate::error::StoreError;

/// Append-only message storage keyed by channel.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a validated submission, assigning its `id` and `created_at`.
    ///
    /// Once this returns, the message must be visible to `list_recent`.
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Get the most recent `limit` messages of a channel in chronological
    /// order, optionally restricted to messages strictly older than `before`.
    async fn list_recent(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError>;
}

/// Read-only view of the chat channels.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    /// Check if a channel exists.
    async fn exists(&self, channel_id: &str) -> Result<bool, StoreError>;

    /// Get a channel by id.
    async fn get(&self, channel_id: &str) -> Result<Option<Channel>, StoreError>;

    /// List all channels in picker order.
    async fn list(&self) -> Result<Vec<Channel>, StoreError>;
}
