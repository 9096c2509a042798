//! HTTP request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ChannelId;

/// Query string of the history endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Only return messages strictly older than this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    #[must_use]
    pub fn new(channel_id: impl Into<ChannelId>) -> Self {
        Self {
            channel_id: Some(channel_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }
}

/// Query string of the stream endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
}

/// Machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing or malformed request parameters.
    BadRequest,
    /// Content or user name failed validation.
    InvalidMessage,
    /// The referenced channel does not exist.
    UnknownChannel,
    /// The channel was deleted.
    ChannelGone,
    /// The message store could not be reached.
    StorageUnavailable,
    /// The server is shutting down.
    Unavailable,
}

/// Structured error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
}

impl ErrorBody {
    #[must_use]
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

/// Health check response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthBody {
    pub status: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_query_omits_unset_fields() {
        let query = HistoryQuery::new("general").with_limit(10);
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value, serde_json::json!({"channelId": "general", "limit": 10}));
    }

    #[test]
    fn test_error_body_code_is_snake_case() {
        let body = ErrorBody::new(ErrorCode::StorageUnavailable, "store down");
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["code"], "storage_unavailable");
        assert_eq!(value["error"], "store down");
    }
}
