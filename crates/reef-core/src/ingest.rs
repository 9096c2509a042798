//! Message ingestion: validate, persist, then publish.

use reef_protocol::{Message, NewMessage};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::broadcaster::{PublishReport, Publisher};
use crate::error::{ChatError, ValidationError};
use crate::store::{ChannelRegistry, MessageStore};

/// Default maximum message length, in characters.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 2000;

/// Default maximum user name length, in characters.
pub const DEFAULT_MAX_USER_NAME_LENGTH: usize = 64;

/// Submission limits.
#[derive(Debug, Clone)]
pub struct IngestLimits {
    /// Maximum trimmed content length, counted in characters.
    pub max_content_length: usize,
    /// Maximum trimmed user name length, counted in characters.
    pub max_user_name_length: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            max_user_name_length: DEFAULT_MAX_USER_NAME_LENGTH,
        }
    }
}

impl IngestLimits {
    /// Check the fields of a submission and normalize them.
    ///
    /// Content and user name are trimmed, and an empty user id is treated
    /// as absent. Channel existence is checked separately.
    ///
    /// # Errors
    ///
    /// Returns the first field that fails validation.
    pub fn validate(&self, message: NewMessage) -> Result<NewMessage, ValidationError> {
        if message.channel_id.trim().is_empty() {
            return Err(ValidationError::UnknownChannel(message.channel_id));
        }

        let content = message.content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        let len = content.chars().count();
        if len > self.max_content_length {
            return Err(ValidationError::ContentTooLong {
                len,
                max: self.max_content_length,
            });
        }

        let user_name = message.user_name.trim();
        if user_name.is_empty() {
            return Err(ValidationError::MissingUserName);
        }
        let len = user_name.chars().count();
        if len > self.max_user_name_length {
            return Err(ValidationError::UserNameTooLong {
                len,
                max: self.max_user_name_length,
            });
        }

        let user_id = message
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Ok(NewMessage {
            channel_id: message.channel_id,
            user_id,
            user_name: user_name.to_string(),
            content: content.to_string(),
        })
    }
}

/// A persisted message and the outcome of its publish.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub message: Message,
    /// `None` if the publish failed.
    pub report: Option<PublishReport>,
}

/// Accepts new messages for persistence and fan-out.
pub struct Ingestor {
    store: Arc<dyn MessageStore>,
    registry: Arc<dyn ChannelRegistry>,
    publisher: Arc<dyn Publisher>,
    limits: IngestLimits,
}

impl Ingestor {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<dyn ChannelRegistry>,
        publisher: Arc<dyn Publisher>,
        limits: IngestLimits,
    ) -> Self {
        Self {
            store,
            registry,
            publisher,
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &IngestLimits {
        &self.limits
    }

    /// Validate, persist, and publish a message.
    ///
    /// The message is visible to history reads before it is published. A
    /// failed publish is logged and the submit still succeeds, since the
    /// message can be recovered from history.
    ///
    /// # Errors
    ///
    /// - [`ChatError::InvalidMessage`] if validation fails or the channel is
    ///   unknown. Nothing is persisted or published.
    /// - [`ChatError::StorageUnavailable`] if the store fails. Nothing is
    ///   published.
    pub async fn submit(&self, message: NewMessage) -> Result<Message, ChatError> {
        self.ingest(message).await.map(|ingested| ingested.message)
    }

    /// Same as [`submit`](Self::submit), also reporting the fan-out.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub async fn ingest(&self, message: NewMessage) -> Result<Ingested, ChatError> {
        let message = self.limits.validate(message)?;

        if !self.registry.exists(&message.channel_id).await? {
            debug!(channel = %message.channel_id, "Rejected message for unknown channel");
            return Err(ValidationError::UnknownChannel(message.channel_id).into());
        }

        let stored = Arc::new(self.store.insert(message).await?);

        let report = match self.publisher.publish(&stored.channel_id, Arc::clone(&stored)) {
            Ok(report) => {
                debug!(
                    channel = %stored.channel_id,
                    message = %stored.id,
                    delivered = report.delivered,
                    dropped = report.dropped,
                    "Message ingested"
                );
                Some(report)
            }
            Err(e) => {
                warn!(
                    channel = %stored.channel_id,
                    message = %stored.id,
                    "Publish failed, message remains in history: {}",
                    e
                );
                None
            }
        };

        Ok(Ingested {
            message: Arc::try_unwrap(stored).unwrap_or_else(|shared| (*shared).clone()),
            report,
        })
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
