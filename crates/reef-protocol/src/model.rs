//! Channel and message data contracts.
//!
//! These are the records exchanged between the store, the server, and clients.
//! JSON field names are camelCase to stay compatible with existing web clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum channel slug length.
pub const MAX_SLUG_LENGTH: usize = 64;

/// Icon used for channels seeded without one.
pub const DEFAULT_CHANNEL_ICON: &str = "💬";

/// A channel identifier.
pub type ChannelId = String;

/// Last issued message id, used to keep ids strictly increasing.
static LAST_MESSAGE_ID: AtomicU64 = AtomicU64::new(0);

/// A unique, never-reused message identifier.
///
/// Generated ids are fixed-width hex so that lexicographic order matches
/// issue order, which makes the id a usable tiebreaker for messages
/// sharing a `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or_default();
        // Strictly greater than the previous id even under clock skew
        let prev = match LAST_MESSAGE_ID.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        }) {
            Ok(prev) | Err(prev) => prev,
        };
        Self(format!("m{:016x}", now.max(prev + 1)))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Validate a channel slug.
///
/// # Errors
///
/// Returns an error message if the slug is invalid.
pub fn validate_slug(slug: &str) -> Result<(), &'static str> {
    if slug.is_empty() {
        return Err("Channel slug cannot be empty");
    }
    if slug.len() > MAX_SLUG_LENGTH {
        return Err("Channel slug too long");
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err("Channel slug may only contain a-z, 0-9, '-' and '_'");
    }
    Ok(())
}

/// A chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    /// URL-stable identifier, unique across channels.
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    /// Sort key for channel pickers.
    #[serde(default)]
    pub order: i32,
    /// Number of persisted messages. Never decreases.
    #[serde(default)]
    pub message_count: u64,
}

impl Channel {
    /// Create a channel with default display metadata.
    #[must_use]
    pub fn new(id: impl Into<ChannelId>, name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            slug: slug.into(),
            description: None,
            icon: Some(DEFAULT_CHANNEL_ICON.to_string()),
            color: None,
            is_private: false,
            order: 0,
            message_count: 0,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Picker order: `order` ascending, then name.
    #[must_use]
    pub fn listing_cmp(&self, other: &Self) -> CmpOrdering {
        self.order
            .cmp(&other.order)
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    /// Registered sender, `None` for guests.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Display name captured at send time.
    pub user_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Compare by `(created_at, id)`, the total order within a channel.
    #[must_use]
    pub fn chronological_cmp(&self, other: &Self) -> CmpOrdering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A message as submitted by a sender, before persistence.
///
/// This is also the body of the submit request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(default)]
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub content: String,
}

impl NewMessage {
    /// Create a guest submission.
    #[must_use]
    pub fn new(
        channel_id: impl Into<ChannelId>,
        user_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            user_id: None,
            user_name: user_name.into(),
            content: content.into(),
        }
    }

    /// Attach a registered user id.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
