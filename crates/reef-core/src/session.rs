//! Server-side stream sessions.
//!
//! A session bridges one client connection to one channel's broadcaster
//! feed. It produces the outbound event sequence: `connected` first, then
//! relayed messages interleaved with heartbeats, and finally either a
//! terminal `channelGone` or the end of the stream.
//!
//! Sessions keep no memory of earlier sessions. Reconnecting is the
//! client's job.

use futures_util::Stream;
use reef_protocol::{ChannelId, StreamEvent};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, CloseReason, Delivery, Subscription};
use crate::error::ChatError;
use crate::store::ChannelRegistry;

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a stream session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a session ID unique within this process.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let seq = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("sess_{timestamp:x}_{seq:x}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between heartbeat events.
    pub heartbeat_interval: Duration,
    /// Re-check that the channel still exists on every heartbeat.
    pub verify_channel_on_heartbeat: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            verify_channel_on_heartbeat: true,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Subscribed, `connected` not yet emitted.
    Connecting,
    /// Relaying events.
    Open,
    /// Unsubscribed. Emits nothing further.
    Closed,
}

enum Wake {
    Delivery(Option<Delivery>),
    Tick,
}

/// One client's live connection to one channel.
pub struct StreamSession {
    id: SessionId,
    channel_id: ChannelId,
    state: SessionState,
    subscription: Option<Subscription>,
    registry: Arc<dyn ChannelRegistry>,
    heartbeat: Interval,
    config: SessionConfig,
}

impl StreamSession {
    /// Validate the channel and subscribe to its feed.
    ///
    /// # Errors
    ///
    /// - [`ChatError::ChannelGone`] if the channel does not exist.
    /// - [`ChatError::StorageUnavailable`] if the registry cannot be reached.
    /// - [`ChatError::StreamDisconnected`] if the broadcaster is shut down.
    pub async fn open(
        broadcaster: &Broadcaster,
        registry: Arc<dyn ChannelRegistry>,
        channel_id: &str,
        config: SessionConfig,
    ) -> Result<Self, ChatError> {
        let exists = registry
            .exists(channel_id)
            .await
            .map_err(ChatError::StorageUnavailable)?;
        if !exists {
            return Err(ChatError::ChannelGone(channel_id.to_string()));
        }

        let subscription = broadcaster
            .subscribe(channel_id)
            .map_err(|err| ChatError::StreamDisconnected(err.to_string()))?;

        let period = config.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let id = SessionId::generate();
        info!(session = %id, channel = %channel_id, "Stream session opened");

        Ok(Self {
            id,
            channel_id: channel_id.to_string(),
            state: SessionState::Connecting,
            subscription: Some(subscription),
            registry,
            heartbeat,
            config,
        })
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Wait for the next outbound event.
    ///
    /// Returns `None` once the session is closed. A `channelGone` event is
    /// always followed by `None`.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        match self.state {
            SessionState::Closed => return None,
            SessionState::Connecting => {
                self.state = SessionState::Open;
                return Some(StreamEvent::connected(self.channel_id.clone()));
            }
            SessionState::Open => {}
        }

        let wake = {
            let subscription = self.subscription.as_mut()?;
            tokio::select! {
                delivery = subscription.recv() => Wake::Delivery(delivery),
                _ = self.heartbeat.tick() => Wake::Tick,
            }
        };

        match wake {
            Wake::Delivery(Some(Delivery::Message(message))) => {
                Some(StreamEvent::message((*message).clone()))
            }
            Wake::Delivery(Some(Delivery::Closed(CloseReason::ChannelClosed))) => {
                self.close();
                Some(StreamEvent::channel_gone(self.channel_id.clone()))
            }
            Wake::Delivery(Some(Delivery::Closed(CloseReason::ShuttingDown))) => {
                debug!(session = %self.id, "Broadcaster shutting down");
                self.close();
                None
            }
            Wake::Delivery(None) => {
                warn!(session = %self.id, channel = %self.channel_id, "Subscription dropped by broadcaster");
                self.close();
                None
            }
            Wake::Tick => {
                if self.config.verify_channel_on_heartbeat {
                    match self.registry.exists(&self.channel_id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            self.close();
                            return Some(StreamEvent::channel_gone(self.channel_id.clone()));
                        }
                        Err(e) => {
                            warn!(session = %self.id, channel = %self.channel_id, "Channel check failed: {}", e);
                        }
                    }
                }
                Some(StreamEvent::heartbeat())
            }
        }
    }

    /// Unsubscribe and stop emitting events. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        info!(session = %self.id, channel = %self.channel_id, "Stream session closed");
    }

    /// Turn the session into a stream of outbound events.
    ///
    /// Dropping the stream closes the session.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        futures_util::stream::unfold(self, |mut session| async move {
            let event = session.next_event().await?;
            Some((event, session))
        })
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("channel_id", &self.channel_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}
