//! Error taxonomy of the messaging core.

use reef_protocol::{ChannelId, ErrorCode};
use thiserror::Error;

/// Persistence layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The channel does not exist.
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// A channel with this id already exists.
    #[error("Channel already exists: {0}")]
    DuplicateChannel(ChannelId),

    /// A channel with this slug already exists.
    #[error("Channel with slug '{0}' already exists")]
    DuplicateSlug(String),

    /// Invalid channel definition.
    #[error("Invalid channel: {0}")]
    InvalidChannel(&'static str),
}

/// Reasons a submission is rejected before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Message content cannot be empty")]
    EmptyContent,

    #[error("Message content is {len} characters, maximum is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("User name is required")]
    MissingUserName,

    #[error("User name is {len} characters, maximum is {max}")]
    UserNameTooLong { len: usize, max: usize },

    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),
}

/// Errors surfaced by the messaging core.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Rejected submission. Never persisted, never published.
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] ValidationError),

    /// The message store failed during submit or history fetch.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),

    /// The live stream was dropped. Recoverable by reconnecting.
    #[error("Stream disconnected: {0}")]
    StreamDisconnected(String),

    /// The channel no longer exists. Terminal for the session.
    #[error("Channel gone: {0}")]
    ChannelGone(ChannelId),
}

impl ChatError {
    /// Whether retrying the same operation can succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::StorageUnavailable(_) | ChatError::StreamDisconnected(_)
        )
    }

    /// Wire error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::InvalidMessage(ValidationError::UnknownChannel(_)) => {
                ErrorCode::UnknownChannel
            }
            ChatError::InvalidMessage(_) => ErrorCode::InvalidMessage,
            ChatError::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            ChatError::StreamDisconnected(_) => ErrorCode::Unavailable,
            ChatError::ChannelGone(_) => ErrorCode::ChannelGone,
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            // The channel vanished between validation and the write
            StoreError::ChannelNotFound(id) => {
                ChatError::InvalidMessage(ValidationError::UnknownChannel(id))
            }
            other => ChatError::StorageUnavailable(other),
        }
    }
}
