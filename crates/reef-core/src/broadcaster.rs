//! In-process fan-out of newly persisted messages.
//!
//! The broadcaster keeps, per channel, a set of subscriber sinks. Each sink
//! is a bounded queue owned by one stream session. Publishing never waits
//! on a sink: a sink that is full or closed is removed on the spot, so one
//! stalled client cannot hold up delivery to the others.
//!
//! ```text
//! publish ──▶ channels[id] ──▶ Feed ─┬─▶ sink ──▶ Subscription (session A)
//!                                    ├─▶ sink ──▶ Subscription (session B)
//!                                    └─▶ sink ──▶ Subscription (session C)
//! ```
//!
//! Feeds are looked up through a `DashMap` and each feed has its own lock,
//! so publishes on different channels never contend with each other.

use dashmap::DashMap;
use reef_protocol::{ChannelId, Message};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

/// Default per-sink queue capacity.
pub const DEFAULT_SINK_CAPACITY: usize = 256;

/// Unique identifier of a subscription.
pub type SubscriptionId = u64;

/// Broadcaster errors.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The broadcaster was shut down.
    #[error("Broadcaster is shut down")]
    ShutDown,
}

/// Broadcaster configuration.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Events a sink may buffer before it is considered stalled.
    pub sink_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            sink_capacity: DEFAULT_SINK_CAPACITY,
        }
    }
}

/// Why a sink was closed by the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The channel was deleted.
    ChannelClosed,
    /// The process is shutting down.
    ShuttingDown,
}

/// An item delivered to a sink.
#[derive(Debug, Clone)]
pub enum Delivery {
    Message(Arc<Message>),
    /// Last item a sink receives when the broadcaster closes it.
    Closed(CloseReason),
}

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Sinks that accepted the message.
    pub delivered: usize,
    /// Sinks removed because they could not accept it.
    pub dropped: usize,
}

/// Broadcaster statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterStats {
    /// Channels with at least one sink.
    pub channel_count: usize,
    /// Total number of sinks.
    pub subscriber_count: usize,
}

/// Sinks subscribed to one channel.
#[derive(Debug, Default)]
struct Feed {
    sinks: Mutex<HashMap<SubscriptionId, mpsc::Sender<Delivery>>>,
}

impl Feed {
    fn lock_sinks(&self) -> MutexGuard<'_, HashMap<SubscriptionId, mpsc::Sender<Delivery>>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn len(&self) -> usize {
        self.lock_sinks().len()
    }

    fn is_empty(&self) -> bool {
        self.lock_sinks().is_empty()
    }

    /// Remove every sink, offering each a final close notice.
    fn close_all(&self, reason: CloseReason) -> usize {
        let sinks = std::mem::take(&mut *self.lock_sinks());
        let count = sinks.len();
        for sink in sinks.into_values() {
            // A full sink still observes the close once its queue drains
            let _ = sink.try_send(Delivery::Closed(reason));
        }
        count
    }
}

#[derive(Debug)]
struct Shared {
    // Lock order: map shard first, then the feed's sink lock.
    channels: DashMap<ChannelId, Arc<Feed>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    config: BroadcasterConfig,
}

impl Shared {
    fn remove_sink(&self, channel_id: &str, id: SubscriptionId) -> bool {
        let removed = self
            .channels
            .get(channel_id)
            .map(|feed| feed.lock_sinks().remove(&id).is_some())
            .unwrap_or(false);

        if removed {
            self.remove_if_empty(channel_id);
            debug!(channel = %channel_id, subscription = id, "Unsubscribed");
        }
        removed
    }

    fn remove_if_empty(&self, channel_id: &str) {
        if self
            .channels
            .remove_if(channel_id, |_, feed| feed.is_empty())
            .is_some()
        {
            trace!(channel = %channel_id, "Removed empty feed");
        }
    }
}

/// Per-channel pub/sub fan-out.
///
/// Cloning is cheap and every clone shares the same subscriber registry.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

impl Broadcaster {
    /// Create a new broadcaster with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BroadcasterConfig::default())
    }

    /// Create a new broadcaster with custom configuration.
    #[must_use]
    pub fn with_config(config: BroadcasterConfig) -> Self {
        info!("Creating broadcaster with config: {:?}", config);
        Self {
            shared: Arc::new(Shared {
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Register a new sink for a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the broadcaster was shut down.
    pub fn subscribe(&self, channel_id: &str) -> Result<Subscription, BroadcastError> {
        if self.is_shut_down() {
            return Err(BroadcastError::ShutDown);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.shared.config.sink_capacity.max(1));

        let subscribers = {
            let feed = self
                .shared
                .channels
                .entry(channel_id.to_string())
                .or_default();
            let mut sinks = feed.lock_sinks();
            sinks.insert(id, sender);
            sinks.len()
        };

        // Lost a race with shutdown(): it may have swept before our insert
        if self.is_shut_down() {
            self.shared.remove_sink(channel_id, id);
            return Err(BroadcastError::ShutDown);
        }

        debug!(channel = %channel_id, subscription = id, subscribers, "Subscribed");

        Ok(Subscription {
            id,
            channel_id: channel_id.to_string(),
            receiver,
            shared: Arc::downgrade(&self.shared),
            active: true,
        })
    }

    /// Remove a subscription. Safe to call repeatedly, and after the sink was
    /// already dropped by [`publish`](Self::publish).
    ///
    /// Returns `true` if the sink was still registered.
    pub fn unsubscribe(&self, subscription: &mut Subscription) -> bool {
        subscription.unsubscribe()
    }

    /// Deliver a message to every sink currently registered for a channel.
    ///
    /// Sinks that cannot accept the message immediately are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the broadcaster was shut down.
    pub fn publish(
        &self,
        channel_id: &str,
        message: Arc<Message>,
    ) -> Result<PublishReport, BroadcastError> {
        if self.is_shut_down() {
            return Err(BroadcastError::ShutDown);
        }

        let Some(feed) = self
            .shared
            .channels
            .get(channel_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            trace!(channel = %channel_id, "Publish with no subscribers");
            return Ok(PublishReport::default());
        };

        let mut report = PublishReport::default();
        {
            // Holding the feed lock for the whole pass keeps per-channel
            // delivery order identical to publish order.
            let mut sinks = feed.lock_sinks();
            sinks.retain(|id, sink| {
                match sink.try_send(Delivery::Message(Arc::clone(&message))) {
                    Ok(()) => {
                        report.delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(channel = %channel_id, subscription = *id, "Sink full, dropping subscriber");
                        report.dropped += 1;
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(channel = %channel_id, subscription = *id, "Sink closed, dropping subscriber");
                        report.dropped += 1;
                        false
                    }
                }
            });
        }

        if report.dropped > 0 {
            self.shared.remove_if_empty(channel_id);
        }

        trace!(
            channel = %channel_id,
            message = %message.id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Published message"
        );

        Ok(report)
    }

    /// Close every sink of a channel with [`CloseReason::ChannelClosed`].
    ///
    /// Called when the channel is deleted. Returns the number of sinks closed.
    pub fn close_channel(&self, channel_id: &str) -> usize {
        let Some((_, feed)) = self.shared.channels.remove(channel_id) else {
            return 0;
        };
        let closed = feed.close_all(CloseReason::ChannelClosed);
        info!(channel = %channel_id, closed, "Closed channel feed");
        closed
    }

    /// Close every sink and refuse further subscribes and publishes.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut closed = 0;
        self.shared.channels.retain(|_, feed| {
            closed += feed.close_all(CloseReason::ShuttingDown);
            false
        });
        info!(closed, "Broadcaster shut down");
    }

    /// Check if [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    /// Get the number of sinks registered for a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.shared
            .channels
            .get(channel_id)
            .map(|feed| feed.len())
            .unwrap_or(0)
    }

    /// Get broadcaster statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            channel_count: self.shared.channels.len(),
            subscriber_count: self.shared.channels.iter().map(|feed| feed.len()).sum(),
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Destination for freshly persisted messages.
///
/// Implemented by [`Broadcaster`]; the ingestion path depends on this trait
/// only, so tests can observe or fail publishes.
pub trait Publisher: Send + Sync {
    /// Fan a persisted message out to the channel's live subscribers.
    fn publish(
        &self,
        channel_id: &str,
        message: Arc<Message>,
    ) -> Result<PublishReport, BroadcastError>;
}

impl Publisher for Broadcaster {
    fn publish(
        &self,
        channel_id: &str,
        message: Arc<Message>,
    ) -> Result<PublishReport, BroadcastError> {
        Broadcaster::publish(self, channel_id, message)
    }
}

/// A registered sink and the receiving end of its queue.
///
/// Dropping the subscription unsubscribes it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    channel_id: ChannelId,
    receiver: mpsc::Receiver<Delivery>,
    shared: Weak<Shared>,
    active: bool,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Wait for the next delivery.
    ///
    /// Returns `None` once the broadcaster has dropped this sink and every
    /// queued delivery was received.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Take a queued delivery without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Remove this sink from the broadcaster. Idempotent.
    ///
    /// Returns `true` if the sink was still registered.
    pub fn unsubscribe(&mut self) -> bool {
        if !std::mem::replace(&mut self.active, false) {
            return false;
        }
        self.receiver.close();
        self.shared
            .upgrade()
            .map(|shared| shared.remove_sink(&self.channel_id, self.id))
            .unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reef_protocol::MessageId;

    fn message(channel: &str, content: &str) -> Arc<Message> {
        Arc::new(Message {
            id: MessageId::generate(),
            channel_id: channel.to_string(),
            user_id: None,
            user_name: "Sam".into(),
            content: content.into(),
            created_at: Utc::now(),
        })
    }

    fn drain(subscription: &mut Subscription) -> Vec<String> {
        let mut contents = Vec::new();
        while let Some(delivery) = subscription.try_recv() {
            if let Delivery::Message(msg) = delivery {
                contents.push(msg.content.clone());
            }
        }
        contents
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let broadcaster = Broadcaster::new();

        let mut sub = broadcaster.subscribe("general").unwrap();
        assert_eq!(broadcaster.subscriber_count("general"), 1);

        assert!(broadcaster.unsubscribe(&mut sub));
        assert!(!broadcaster.unsubscribe(&mut sub));
        assert_eq!(broadcaster.subscriber_count("general"), 0);
        // Empty feeds are removed
        assert_eq!(broadcaster.stats().channel_count, 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.subscribe("general").unwrap();
        let _other = broadcaster.subscribe("random").unwrap();
        drop(sub);

        let stats = broadcaster.stats();
        assert_eq!(stats.channel_count, 1);
        assert_eq!(stats.subscriber_count, 1);
    }

    #[test]
    fn test_publish_preserves_order_for_every_subscriber() {
        let broadcaster = Broadcaster::new();
        let mut subs: Vec<_> = (0..3)
            .map(|_| broadcaster.subscribe("general").unwrap())
            .collect();

        let expected: Vec<String> = (0..100).map(|i| format!("msg {i}")).collect();
        for content in &expected {
            let report = broadcaster
                .publish("general", message("general", content))
                .unwrap();
            assert_eq!(report.delivered, 3);
        }

        for sub in &mut subs {
            assert_eq!(drain(sub), expected);
        }
    }

    #[test]
    fn test_publish_is_scoped_to_channel() {
        let broadcaster = Broadcaster::new();
        let mut general = broadcaster.subscribe("general").unwrap();
        let mut random = broadcaster.subscribe("random").unwrap();

        broadcaster
            .publish("general", message("general", "hi"))
            .unwrap();

        assert_eq!(drain(&mut general), ["hi"]);
        assert!(drain(&mut random).is_empty());
    }

    #[test]
    fn test_late_subscriber_does_not_receive_earlier_publish() {
        let broadcaster = Broadcaster::new();
        let _early = broadcaster.subscribe("general").unwrap();

        broadcaster
            .publish("general", message("general", "before"))
            .unwrap();
        let mut late = broadcaster.subscribe("general").unwrap();

        assert!(late.try_recv().is_none());

        broadcaster
            .publish("general", message("general", "after"))
            .unwrap();
        assert_eq!(drain(&mut late), ["after"]);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let broadcaster = Broadcaster::new();
        let report = broadcaster
            .publish("general", message("general", "hi"))
            .unwrap();
        assert_eq!(report, PublishReport::default());
    }

    #[tokio::test]
    async fn test_stalled_sink_does_not_block_others() {
        let broadcaster = Broadcaster::with_config(BroadcasterConfig { sink_capacity: 2 });
        let mut stalled = broadcaster.subscribe("general").unwrap();
        let mut responsive = broadcaster.subscribe("general").unwrap();

        let mut dropped = 0;
        for i in 0..10 {
            let report = tokio::time::timeout(
                std::time::Duration::from_millis(100),
                async { broadcaster.publish("general", message("general", &format!("msg {i}"))) },
            )
            .await
            .expect("publish must not wait on a stalled sink")
            .unwrap();
            dropped += report.dropped;

            // The responsive sink keeps up
            assert_eq!(drain(&mut responsive), [format!("msg {i}")]);
        }

        assert_eq!(dropped, 1);
        assert_eq!(broadcaster.subscriber_count("general"), 1);

        // The stalled sink sees what it buffered, then the end of its queue
        assert_eq!(drain(&mut stalled), ["msg 0", "msg 1"]);
        assert!(stalled.recv().await.is_none());
        assert!(!stalled.unsubscribe());
    }

    #[tokio::test]
    async fn test_close_channel_notifies_sinks() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe("general").unwrap();

        assert_eq!(broadcaster.close_channel("general"), 1);
        assert!(matches!(
            sub.recv().await,
            Some(Delivery::Closed(CloseReason::ChannelClosed))
        ));
        assert!(sub.recv().await.is_none());
        assert_eq!(broadcaster.close_channel("general"), 0);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe("general").unwrap();

        broadcaster.shutdown();

        assert!(matches!(
            sub.recv().await,
            Some(Delivery::Closed(CloseReason::ShuttingDown))
        ));
        assert!(matches!(
            broadcaster.subscribe("general"),
            Err(BroadcastError::ShutDown)
        ));
        assert!(matches!(
            broadcaster.publish("general", message("general", "hi")),
            Err(BroadcastError::ShutDown)
        ));
        assert_eq!(broadcaster.stats().subscriber_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_churn_leaves_no_sinks() {
        let broadcaster = Broadcaster::new();
        let mut tasks = Vec::new();

        for t in 0..8 {
            let broadcaster = broadcaster.clone();
            tasks.push(tokio::spawn(async move {
                let channel = format!("channel-{}", t % 2);
                for i in 0..200 {
                    let mut sub = broadcaster.subscribe(&channel).unwrap();
                    broadcaster
                        .publish(&channel, message(&channel, &format!("{t}:{i}")))
                        .unwrap();
                    if i % 2 == 0 {
                        sub.unsubscribe();
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        let stats = broadcaster.stats();
        assert_eq!(stats.subscriber_count, 0);
        assert_eq!(stats.channel_count, 0);
    }
}
