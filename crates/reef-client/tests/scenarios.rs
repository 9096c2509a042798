//! End-to-end channel scenarios against an in-process hub.

use async_trait::async_trait;
use reef_client::{
    ChatBackend, ClientError, ConnectionStatus, EventStream, LocalBackend, ManagerConfig,
    SubscriptionManager,
};
use reef_core::{Hub, HubConfig, InMemoryStore, SessionConfig};
use reef_protocol::{Channel, HistoryQuery, Message, NewMessage, StreamEvent};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const WAIT: Duration = Duration::from_secs(5);

fn setup(config: HubConfig) -> (Hub, Arc<InMemoryStore>) {
    let store = Arc::new(
        InMemoryStore::with_channels([Channel::new("general", "General", "general")]).unwrap(),
    );
    (Hub::in_memory(store.clone(), config), store)
}

fn fast_reconnect() -> ManagerConfig {
    ManagerConfig {
        reconnect_delay: Duration::from_millis(50),
        ..ManagerConfig::default()
    }
}

async fn wait_for(
    manager: &SubscriptionManager,
    predicate: impl FnMut(&reef_client::Snapshot) -> bool,
) -> reef_client::Snapshot {
    tokio::time::timeout(WAIT, manager.wait_for(predicate))
        .await
        .expect("timed out waiting for subscription state")
        .unwrap()
}

/// Backend that can cut live streams and refuse new ones on demand.
struct FlakyBackend {
    inner: LocalBackend,
    offline: AtomicBool,
    reset: Arc<Notify>,
    opens: AtomicUsize,
}

impl FlakyBackend {
    fn new(hub: Hub) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalBackend::new(hub),
            offline: AtomicBool::new(false),
            reset: Arc::new(Notify::new()),
            opens: AtomicUsize::new(0),
        })
    }

    fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
        self.reset.notify_one();
    }

    fn go_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for FlakyBackend {
    async fn history(&self, query: HistoryQuery) -> Result<Vec<Message>, ClientError> {
        self.inner.history(query).await
    }

    async fn open_stream(&self, channel_id: &str) -> Result<Box<dyn EventStream>, ClientError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("connection refused".into()));
        }
        let inner = self.inner.open_stream(channel_id).await?;
        Ok(Box::new(FlakyStream {
            inner,
            reset: Arc::clone(&self.reset),
        }))
    }

    async fn submit(&self, message: NewMessage) -> Result<Message, ClientError> {
        self.inner.submit(message).await
    }

    async fn channels(&self) -> Result<Vec<Channel>, ClientError> {
        self.inner.channels().await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

struct FlakyStream {
    inner: Box<dyn EventStream>,
    reset: Arc<Notify>,
}

#[async_trait]
impl EventStream for FlakyStream {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, ClientError> {
        tokio::select! {
            event = self.inner.next_event() => event,
            () = self.reset.notified() => {
                Err(ClientError::StreamDisconnected("connection reset".into()))
            }
        }
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}

#[tokio::test]
async fn test_happy_path() {
    let (hub, _store) = setup(HubConfig::default());
    let backend = LocalBackend::new(hub.clone());

    // Client A, raw stream
    let mut stream = backend.open_stream("general").await.unwrap();
    assert_eq!(
        stream.next_event().await.unwrap(),
        Some(StreamEvent::connected("general"))
    );

    // Client A, managed subscription
    let manager = SubscriptionManager::open(
        Arc::new(backend.clone()),
        "general",
        ManagerConfig::default(),
    );
    wait_for(&manager, |s| s.status == ConnectionStatus::Open).await;

    // Client B
    let sent = backend
        .submit(NewMessage::new("general", "Sam", "hi"))
        .await
        .unwrap();

    match stream.next_event().await.unwrap() {
        Some(StreamEvent::Message { data }) => {
            assert_eq!(data.content, "hi");
            assert_eq!(data.user_name, "Sam");
            assert_eq!(data.id, sent.id);
        }
        other => panic!("expected a message event, got {other:?}"),
    }

    let snapshot = wait_for(&manager, |s| !s.messages.is_empty()).await;
    assert_eq!(snapshot.messages, [sent]);

    manager.close().await;
}

#[tokio::test]
async fn test_reconnect_heals_gap() {
    let (hub, _store) = setup(HubConfig::default());
    let backend = FlakyBackend::new(hub.clone());
    let manager = SubscriptionManager::open(backend.clone(), "general", fast_reconnect());
    wait_for(&manager, |s| s.status == ConnectionStatus::Open).await;

    hub.submit(NewMessage::new("general", "Sam", "before"))
        .await
        .unwrap();
    wait_for(&manager, |s| s.messages.len() == 1).await;

    backend.go_offline();
    let snapshot = wait_for(&manager, |s| s.status == ConnectionStatus::Reconnecting).await;
    assert!(snapshot.last_error.unwrap().is_recoverable());

    // Sent while client A has no stream
    let missed = hub
        .submit(NewMessage::new("general", "Riley", "missed"))
        .await
        .unwrap();

    backend.go_online();
    let snapshot = wait_for(&manager, |s| {
        s.status == ConnectionStatus::Open && s.messages.iter().any(|m| m.id == missed.id)
    })
    .await;
    assert!(snapshot.last_error.is_none());

    let after = hub
        .submit(NewMessage::new("general", "Sam", "after"))
        .await
        .unwrap();
    let snapshot = wait_for(&manager, |s| s.messages.iter().any(|m| m.id == after.id)).await;

    let contents: Vec<_> = snapshot.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["before", "missed", "after"]);
    assert!(backend.opens() >= 2);

    manager.close().await;
}

#[tokio::test]
async fn test_reconnect_without_refetch_needs_refresh() {
    let (hub, _store) = setup(HubConfig::default());
    let backend = FlakyBackend::new(hub.clone());
    let config = ManagerConfig {
        refetch_on_reconnect: false,
        ..fast_reconnect()
    };
    let manager = SubscriptionManager::open(backend.clone(), "general", config);
    wait_for(&manager, |s| s.status == ConnectionStatus::Open).await;

    backend.go_offline();
    wait_for(&manager, |s| s.status == ConnectionStatus::Reconnecting).await;
    hub.submit(NewMessage::new("general", "Riley", "missed"))
        .await
        .unwrap();
    backend.go_online();

    let snapshot = wait_for(&manager, |s| s.status == ConnectionStatus::Open).await;
    assert!(snapshot.messages.is_empty());

    assert_eq!(manager.refresh().await.unwrap(), 1);
    assert_eq!(manager.snapshot().messages[0].content, "missed");

    manager.close().await;
}

#[tokio::test]
async fn test_invalid_submission() {
    let (hub, _store) = setup(HubConfig::default());
    let backend = LocalBackend::new(hub);

    let result = backend
        .submit(NewMessage::new("general", "", "hi"))
        .await;
    assert!(matches!(result, Err(ClientError::InvalidMessage(_))));

    let history = backend
        .history(HistoryQuery::new("general"))
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_channel_deleted_mid_stream() {
    let (hub, store) = setup(HubConfig::default());
    let backend = FlakyBackend::new(hub.clone());
    let manager = SubscriptionManager::open(backend.clone(), "general", fast_reconnect());
    wait_for(&manager, |s| s.status == ConnectionStatus::Open).await;

    store.delete_channel("general");
    hub.channel_deleted("general");

    let snapshot = wait_for(&manager, |s| s.status == ConnectionStatus::Gone).await;
    assert_eq!(
        snapshot.last_error,
        Some(ClientError::ChannelGone("general".into()))
    );

    // Several reconnect delays later, still no new stream
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.opens(), 1);
    assert_eq!(manager.snapshot().status, ConnectionStatus::Gone);

    manager.close().await;
}

#[tokio::test]
async fn test_channel_deletion_found_by_heartbeat() {
    let config = HubConfig {
        session: SessionConfig {
            heartbeat_interval: Duration::from_millis(20),
            ..SessionConfig::default()
        },
        ..HubConfig::default()
    };
    let (hub, store) = setup(config);
    let backend = FlakyBackend::new(hub);
    let manager = SubscriptionManager::open(backend.clone(), "general", fast_reconnect());
    wait_for(&manager, |s| s.status == ConnectionStatus::Open).await;

    // No broadcaster notice, only the registry changes
    store.delete_channel("general");

    wait_for(&manager, |s| s.status == ConnectionStatus::Gone).await;
    assert_eq!(backend.opens(), 1);

    manager.close().await;
}

#[tokio::test]
async fn test_silent_stream_triggers_reconnect() {
    let config = HubConfig {
        session: SessionConfig {
            heartbeat_interval: Duration::from_secs(3600),
            ..SessionConfig::default()
        },
        ..HubConfig::default()
    };
    let (hub, _store) = setup(config);
    let backend = FlakyBackend::new(hub);
    let manager = SubscriptionManager::open(
        backend.clone(),
        "general",
        ManagerConfig {
            heartbeat_timeout: Duration::from_millis(100),
            ..fast_reconnect()
        },
    );

    wait_for(&manager, |s| {
        matches!(s.last_error, Some(ClientError::StreamDisconnected(_)))
    })
    .await;
    wait_for(&manager, |_| backend.opens() >= 2).await;

    manager.close().await;
}
