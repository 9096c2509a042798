//! The messaging hub: one explicitly constructed context that owns the
//! store handles, the broadcaster, and the ingestor.
//!
//! Servers build a `Hub` at startup and hand clones of it to every request
//! handler. Tearing it down is explicit through [`Hub::shutdown`].

use reef_protocol::{Channel, HistoryQuery, Message, NewMessage};
use std::sync::Arc;
use tracing::info;

use crate::broadcaster::{Broadcaster, BroadcasterConfig, DEFAULT_SINK_CAPACITY};
use crate::error::{ChatError, ValidationError};
use crate::ingest::{IngestLimits, Ingested, Ingestor};
use crate::memory::InMemoryStore;
use crate::session::{SessionConfig, StreamSession};
use crate::store::{ChannelRegistry, MessageStore};

/// Default history page size.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Largest history page a caller may request.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub limits: IngestLimits,
    /// Page size when a history request names none.
    pub default_history_limit: usize,
    /// Upper bound for requested page sizes.
    pub max_history_limit: usize,
    pub session: SessionConfig,
    /// Per-subscriber queue capacity.
    pub sink_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            limits: IngestLimits::default(),
            default_history_limit: DEFAULT_HISTORY_LIMIT,
            max_history_limit: MAX_HISTORY_LIMIT,
            session: SessionConfig::default(),
            sink_capacity: DEFAULT_SINK_CAPACITY,
        }
    }
}

/// Shared messaging context.
///
/// Cloning is cheap and every clone shares the same broadcaster.
#[derive(Clone)]
pub struct Hub {
    store: Arc<dyn MessageStore>,
    registry: Arc<dyn ChannelRegistry>,
    broadcaster: Broadcaster,
    ingestor: Arc<Ingestor>,
    config: Arc<HubConfig>,
}

impl Hub {
    /// Create a hub over external persistence.
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<dyn ChannelRegistry>,
        config: HubConfig,
    ) -> Self {
        let broadcaster = Broadcaster::with_config(BroadcasterConfig {
            sink_capacity: config.sink_capacity,
        });
        let ingestor = Ingestor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::new(broadcaster.clone()),
            config.limits.clone(),
        );

        Self {
            store,
            registry,
            broadcaster,
            ingestor: Arc::new(ingestor),
            config: Arc::new(config),
        }
    }

    /// Create a hub whose store and registry are one in-memory store.
    #[must_use]
    pub fn in_memory(store: Arc<InMemoryStore>, config: HubConfig) -> Self {
        Self::new(store.clone(), store, config)
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Submit a new message. See [`Ingestor::submit`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidMessage` or `StorageUnavailable`.
    pub async fn submit(&self, message: NewMessage) -> Result<Message, ChatError> {
        self.ingestor.submit(message).await
    }

    /// Submit a new message and report its fan-out. See [`Ingestor::ingest`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidMessage` or `StorageUnavailable`.
    pub async fn ingest(&self, message: NewMessage) -> Result<Ingested, ChatError> {
        self.ingestor.ingest(message).await
    }

    /// Fetch a chronological history page.
    ///
    /// The limit defaults to the configured page size and is clamped to
    /// `1..=max_history_limit`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMessage` for a missing or unknown channel, and
    /// `StorageUnavailable` if the store fails.
    pub async fn history(&self, query: &HistoryQuery) -> Result<Vec<Message>, ChatError> {
        let channel_id = query
            .channel_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ValidationError::UnknownChannel(String::new()))?;

        let limit = query
            .limit
            .unwrap_or(self.config.default_history_limit)
            .clamp(1, self.config.max_history_limit.max(1));

        Ok(self.store.list_recent(channel_id, limit, query.before).await?)
    }

    /// List channels in picker order.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the registry fails.
    pub async fn channels(&self) -> Result<Vec<Channel>, ChatError> {
        self.registry
            .list()
            .await
            .map_err(ChatError::StorageUnavailable)
    }

    /// Open a stream session for a channel.
    ///
    /// # Errors
    ///
    /// See [`StreamSession::open`].
    pub async fn open_session(&self, channel_id: &str) -> Result<StreamSession, ChatError> {
        StreamSession::open(
            &self.broadcaster,
            Arc::clone(&self.registry),
            channel_id,
            self.config.session.clone(),
        )
        .await
    }

    /// Notify live sessions that a channel was deleted.
    ///
    /// Returns the number of sessions notified.
    pub fn channel_deleted(&self, channel_id: &str) -> usize {
        self.broadcaster.close_channel(channel_id)
    }

    /// End every live session and refuse new ones.
    pub fn shutdown(&self) {
        info!("Shutting down messaging hub");
        self.broadcaster.shutdown();
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("broadcaster", &self.broadcaster)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_protocol::StreamEvent;

    fn hub() -> (Hub, Arc<InMemoryStore>) {
        let store = Arc::new(
            InMemoryStore::with_channels([
                Channel::new("general", "General", "general").with_order(0),
                Channel::new("sharks", "Sharks", "sharks").with_order(1),
            ])
            .unwrap(),
        );
        (Hub::in_memory(store.clone(), HubConfig::default()), store)
    }

    #[tokio::test]
    async fn test_history_limit_is_clamped() {
        let (hub, _store) = hub();
        for i in 0..120 {
            hub.submit(NewMessage::new("general", "Sam", format!("msg {i}")))
                .await
                .unwrap();
        }

        let page = hub.history(&HistoryQuery::new("general")).await.unwrap();
        assert_eq!(page.len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(page.last().unwrap().content, "msg 119");

        let page = hub
            .history(&HistoryQuery::new("general").with_limit(1000))
            .await
            .unwrap();
        assert_eq!(page.len(), MAX_HISTORY_LIMIT);

        let page = hub
            .history(&HistoryQuery::new("general").with_limit(0))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_history_unknown_channel() {
        let (hub, _store) = hub();

        let err = hub.history(&HistoryQuery::new("missing")).await.unwrap_err();
        assert_eq!(err.code(), reef_protocol::ErrorCode::UnknownChannel);

        let err = hub.history(&HistoryQuery::default()).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_channels_sorted() {
        let (hub, _store) = hub();
        let slugs: Vec<_> = hub
            .channels()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.slug)
            .collect();
        assert_eq!(slugs, ["general", "sharks"]);
    }

    #[tokio::test]
    async fn test_submit_fans_out_to_session() {
        let (hub, _store) = hub();
        let mut session = hub.open_session("general").await.unwrap();
        assert_eq!(
            session.next_event().await,
            Some(StreamEvent::connected("general"))
        );

        let sent = hub
            .submit(NewMessage::new("general", "Sam", "hi"))
            .await
            .unwrap();

        assert_eq!(session.next_event().await, Some(StreamEvent::message(sent)));
    }

    #[tokio::test]
    async fn test_channel_deleted_and_shutdown() {
        let (hub, store) = hub();
        let mut general = hub.open_session("general").await.unwrap();
        let mut sharks = hub.open_session("sharks").await.unwrap();
        general.next_event().await;
        sharks.next_event().await;

        store.delete_channel("general");
        assert_eq!(hub.channel_deleted("general"), 1);
        assert_eq!(
            general.next_event().await,
            Some(StreamEvent::channel_gone("general"))
        );

        hub.shutdown();
        assert_eq!(sharks.next_event().await, None);
        assert!(matches!(
            hub.open_session("sharks").await,
            Err(ChatError::StreamDisconnected(_))
        ));
    }
}
