//! Client-side errors.

use reef_core::{ChatError, ValidationError};
use reef_protocol::{ChannelId, ErrorBody, ErrorCode, ProtocolError};
use thiserror::Error;

/// Errors surfaced to client code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The submission was rejected. Retrying it unchanged will fail again.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The server's message store failed. Retry later.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The live stream dropped or went silent.
    #[error("Stream disconnected: {0}")]
    StreamDisconnected(String),

    /// The channel was deleted.
    #[error("Channel gone: {0}")]
    ChannelGone(ChannelId),

    /// The request never produced a usable response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server sent something that could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The subscription was closed.
    #[error("Subscription closed")]
    Closed,
}

impl ClientError {
    /// Whether the failure is expected to clear up on retry or reconnect.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::StorageUnavailable(_)
                | ClientError::StreamDisconnected(_)
                | ClientError::Transport(_)
                | ClientError::Protocol(_)
        )
    }

    /// Convert a structured error body returned by the server for a request
    /// about `channel_id`.
    ///
    /// `channel_gone` only maps to [`ClientError::ChannelGone`] when the
    /// request addressed a channel; otherwise it is a rejected request.
    #[must_use]
    pub fn from_body(body: ErrorBody, channel_id: Option<&str>) -> Self {
        match body.code {
            ErrorCode::BadRequest | ErrorCode::InvalidMessage | ErrorCode::UnknownChannel => {
                ClientError::InvalidMessage(body.error)
            }
            ErrorCode::ChannelGone => match channel_id {
                Some(id) => ClientError::ChannelGone(id.to_string()),
                None => ClientError::InvalidMessage(body.error),
            },
            ErrorCode::StorageUnavailable => ClientError::StorageUnavailable(body.error),
            ErrorCode::Unavailable => ClientError::StreamDisconnected(body.error),
        }
    }
}

impl From<ChatError> for ClientError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidMessage(e) => ClientError::InvalidMessage(e.to_string()),
            ChatError::StorageUnavailable(e) => ClientError::StorageUnavailable(e.to_string()),
            ChatError::StreamDisconnected(reason) => ClientError::StreamDisconnected(reason),
            ChatError::ChannelGone(id) => ClientError::ChannelGone(id),
        }
    }
}

impl From<ValidationError> for ClientError {
    fn from(err: ValidationError) -> Self {
        ClientError::InvalidMessage(err.to_string())
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Protocol(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_mapping() {
        let err = ClientError::from_body(
            ErrorBody::new(ErrorCode::UnknownChannel, "nope"),
            Some("general"),
        );
        assert_eq!(err, ClientError::InvalidMessage("nope".into()));
        assert!(!err.is_recoverable());

        let err = ClientError::from_body(
            ErrorBody::new(ErrorCode::StorageUnavailable, "down"),
            None,
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_channel_gone_body_carries_channel_id() {
        let body = ErrorBody::new(ErrorCode::ChannelGone, "Channel gone: general");

        let err = ClientError::from_body(body.clone(), Some("general"));
        assert_eq!(err, ClientError::ChannelGone("general".into()));

        let err = ClientError::from_body(body, None);
        assert_eq!(err, ClientError::InvalidMessage("Channel gone: general".into()));
    }

    #[test]
    fn test_chat_error_conversion() {
        let err: ClientError = ChatError::ChannelGone("general".into()).into();
        assert_eq!(err, ClientError::ChannelGone("general".into()));
        assert!(!err.is_recoverable());
    }
}
