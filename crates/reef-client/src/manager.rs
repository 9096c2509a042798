//! Client subscription manager.
//!
//! The manager keeps a durable local view of one channel: it hydrates
//! history, follows the live stream, and reconnects after failures.
//!
//! All state lives in a driver task. The [`SubscriptionManager`] handle
//! talks to it through a command queue and observes it through a watch
//! channel of [`Snapshot`]s.
//!
//! ```text
//!            open ┌────────────┐ connected ┌──────┐
//!  ──────────────▶│ Connecting │──────────▶│ Open │
//!                 └────────────┘           └──────┘
//!                       ▲                     │ drop / silence
//!                 delay │  ┌──────────────┐   │
//!                       └──│ Reconnecting │◀──┘
//!                          └──────────────┘
//!  channelGone from any state ──▶ Gone      close() ──▶ Closed
//! ```

use reef_protocol::{ChannelId, HistoryQuery, Message, NewMessage, StreamEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace, warn};

use crate::error::ClientError;
use crate::log::MessageLog;
use crate::traits::{ChatBackend, EventStream};

/// Default history page fetched on open and on every catch-up.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Default delay before reopening a dropped stream.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default silence after which a stream is considered dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);

const COMMAND_QUEUE_SIZE: usize = 32;

/// Subscription manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Messages requested per history fetch.
    pub history_limit: usize,
    /// Fixed delay between a stream failure and the next attempt.
    pub reconnect_delay: Duration,
    /// Maximum silence tolerated on an open stream.
    pub heartbeat_timeout: Duration,
    /// Re-fetch history after every `connected` event.
    pub refetch_on_reconnect: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            refetch_on_reconnect: true,
        }
    }
}

/// Connection status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Opening the first stream.
    Connecting,
    /// Stream open and `connected` received.
    Open,
    /// Waiting to reopen a dropped stream.
    Reconnecting,
    /// The channel was deleted. No further reconnects.
    Gone,
    /// Closed by the owner.
    Closed,
}

/// Observable state of a subscription.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub channel_id: ChannelId,
    pub status: ConnectionStatus,
    /// Deduplicated messages, history first, then live arrivals.
    pub messages: Vec<Message>,
    /// Most recent failure. Cleared when a stream connects.
    pub last_error: Option<ClientError>,
}

enum Command {
    Send {
        message: NewMessage,
        reply: oneshot::Sender<Result<Message, ClientError>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<usize, ClientError>>,
    },
    Close,
}

/// Handle to a channel subscription.
///
/// Dropping the handle stops the driver task.
#[derive(Debug)]
pub struct SubscriptionManager {
    channel_id: ChannelId,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionManager {
    /// Start following a channel.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn open(
        backend: Arc<dyn ChatBackend>,
        channel_id: impl Into<ChannelId>,
        config: ManagerConfig,
    ) -> Self {
        let channel_id = channel_id.into();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot {
            channel_id: channel_id.clone(),
            status: ConnectionStatus::Connecting,
            messages: Vec::new(),
            last_error: None,
        });

        info!(channel = %channel_id, backend = backend.name(), "Opening subscription");

        let driver = Driver {
            backend,
            channel_id: channel_id.clone(),
            config,
            log: MessageLog::new(),
            status: ConnectionStatus::Connecting,
            last_error: None,
            commands: command_rx,
            snapshot: snapshot_tx,
        };

        Self {
            channel_id,
            commands: command_tx,
            snapshot: snapshot_rx,
            task: Some(tokio::spawn(driver.run())),
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Submit a message to the channel.
    ///
    /// Nothing is added locally; the message shows up once it arrives
    /// through the stream or a history fetch.
    ///
    /// # Errors
    ///
    /// Blank content is rejected locally with `InvalidMessage`. Other
    /// errors come from the backend, or `Closed` if the subscription ended.
    pub async fn send(
        &self,
        content: impl Into<String>,
        user_name: impl Into<String>,
        user_id: Option<String>,
    ) -> Result<Message, ClientError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(ClientError::InvalidMessage(
                "Message content cannot be empty".into(),
            ));
        }

        let mut message = NewMessage::new(self.channel_id.clone(), user_name, content);
        message.user_id = user_id;

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send { message, reply })
            .await
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)?
    }

    /// Fetch history now and merge it into the local view.
    ///
    /// Returns the number of messages that were new.
    ///
    /// # Errors
    ///
    /// Returns the history error, or `Closed` if the subscription ended.
    pub async fn refresh(&self) -> Result<usize, ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Refresh { reply })
            .await
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)?
    }

    /// Get the current state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Get a receiver that observes every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Wait until the state satisfies a predicate.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the driver stopped before the predicate held.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&Snapshot) -> bool,
    ) -> Result<Snapshot, ClientError> {
        let mut receiver = self.snapshot.clone();
        let snapshot = receiver
            .wait_for(predicate)
            .await
            .map_err(|_| ClientError::Closed)?;
        Ok(snapshot.clone())
    }

    /// Tear down the stream and stop the driver.
    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Close).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Why a stream stopped being pumped.
enum Exit {
    Closed,
    Gone,
    Dropped(ClientError),
}

enum Wake<T> {
    Ready(T),
    Command(Option<Command>),
}

struct Driver {
    backend: Arc<dyn ChatBackend>,
    channel_id: ChannelId,
    config: ManagerConfig,
    log: MessageLog,
    status: ConnectionStatus,
    last_error: Option<ClientError>,
    commands: mpsc::Receiver<Command>,
    snapshot: watch::Sender<Snapshot>,
}

impl Driver {
    async fn run(mut self) {
        // Initial hydration. A failure leaves the log empty and is recorded.
        let _ = self.catch_up().await;

        loop {
            let exit = match self.open_stream().await {
                None => Exit::Closed,
                Some(Ok(stream)) => self.pump(stream).await,
                Some(Err(ClientError::ChannelGone(_))) => Exit::Gone,
                Some(Err(err)) => Exit::Dropped(err),
            };

            match exit {
                Exit::Closed => break,
                Exit::Gone => {
                    self.gone().await;
                    break;
                }
                Exit::Dropped(err) => {
                    warn!(channel = %self.channel_id, "Stream lost: {}", err);
                    self.last_error = Some(err);
                    self.set_status(ConnectionStatus::Reconnecting);
                    if !self.wait_to_reconnect().await {
                        break;
                    }
                }
            }
        }

        self.set_status(ConnectionStatus::Closed);
        info!(channel = %self.channel_id, "Subscription closed");
    }

    /// Open a stream while still serving commands.
    ///
    /// Returns `None` if the subscription was closed meanwhile.
    async fn open_stream(&mut self) -> Option<Result<Box<dyn EventStream>, ClientError>> {
        let backend = Arc::clone(&self.backend);
        let channel_id = self.channel_id.clone();
        let open = backend.open_stream(&channel_id);
        tokio::pin!(open);

        loop {
            let wake = tokio::select! {
                result = &mut open => Wake::Ready(result),
                command = self.commands.recv() => Wake::Command(command),
            };
            match wake {
                Wake::Ready(result) => return Some(result),
                Wake::Command(command) => {
                    if !self.handle(command).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn pump(&mut self, mut stream: Box<dyn EventStream>) -> Exit {
        let silence = self.config.heartbeat_timeout;
        // Only stream events push the deadline back, commands do not
        let deadline = time::sleep(silence);
        tokio::pin!(deadline);

        let exit = loop {
            let wake = tokio::select! {
                event = stream.next_event() => Wake::Ready(Ok(event)),
                () = &mut deadline => Wake::Ready(Err(())),
                command = self.commands.recv() => Wake::Command(command),
            };

            let event = match wake {
                Wake::Command(command) => {
                    if self.handle(command).await {
                        continue;
                    }
                    break Exit::Closed;
                }
                Wake::Ready(Err(_)) => {
                    break Exit::Dropped(ClientError::StreamDisconnected(format!(
                        "no events for {}s",
                        silence.as_secs()
                    )));
                }
                Wake::Ready(Ok(Err(ClientError::ChannelGone(_)))) => break Exit::Gone,
                Wake::Ready(Ok(Err(err))) => break Exit::Dropped(err),
                Wake::Ready(Ok(Ok(None))) => {
                    break Exit::Dropped(ClientError::StreamDisconnected("stream ended".into()));
                }
                Wake::Ready(Ok(Ok(Some(event)))) => event,
            };
            deadline.as_mut().reset(time::Instant::now() + silence);

            match event {
                StreamEvent::Connected { .. } => {
                    debug!(channel = %self.channel_id, "Stream connected");
                    self.last_error = None;
                    self.set_status(ConnectionStatus::Open);
                    if self.config.refetch_on_reconnect {
                        let _ = self.catch_up().await;
                    }
                }
                StreamEvent::Message { data } => {
                    if self.log.append(data) {
                        self.publish();
                    }
                }
                StreamEvent::Heartbeat { .. } => {
                    trace!(channel = %self.channel_id, "Heartbeat");
                }
                StreamEvent::ChannelGone { .. } => break Exit::Gone,
            }
        };

        stream.close().await;
        exit
    }

    /// Sleep out the reconnect delay while serving commands.
    ///
    /// Returns `false` if the subscription was closed meanwhile.
    async fn wait_to_reconnect(&mut self) -> bool {
        let delay = time::sleep(self.config.reconnect_delay);
        tokio::pin!(delay);

        loop {
            let wake = tokio::select! {
                () = &mut delay => Wake::Ready(()),
                command = self.commands.recv() => Wake::Command(command),
            };
            match wake {
                Wake::Ready(()) => return true,
                Wake::Command(command) => {
                    if !self.handle(command).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Terminal state: keep answering commands until closed.
    async fn gone(&mut self) {
        warn!(channel = %self.channel_id, "Channel gone, not reconnecting");
        self.last_error = Some(ClientError::ChannelGone(self.channel_id.clone()));
        self.set_status(ConnectionStatus::Gone);

        while let Some(command) = self.commands.recv().await {
            let gone = ClientError::ChannelGone(self.channel_id.clone());
            match command {
                Command::Send { reply, .. } => {
                    let _ = reply.send(Err(gone));
                }
                Command::Refresh { reply } => {
                    let _ = reply.send(Err(gone));
                }
                Command::Close => break,
            }
        }
    }

    /// Serve one command. Returns `false` when the subscription should stop.
    async fn handle(&mut self, command: Option<Command>) -> bool {
        match command {
            None | Some(Command::Close) => false,
            Some(Command::Send { message, reply }) => {
                // Submits run beside the driver so the stream keeps flowing
                let backend = Arc::clone(&self.backend);
                tokio::spawn(async move {
                    let _ = reply.send(backend.submit(message).await);
                });
                true
            }
            Some(Command::Refresh { reply }) => {
                let _ = reply.send(self.catch_up().await);
                true
            }
        }
    }

    /// Fetch a history page and merge it into the log.
    async fn catch_up(&mut self) -> Result<usize, ClientError> {
        let query =
            HistoryQuery::new(self.channel_id.clone()).with_limit(self.config.history_limit);

        match self.backend.history(query).await {
            Ok(page) => {
                let added = self.log.hydrate(page);
                debug!(channel = %self.channel_id, added, "History merged");
                if added > 0 {
                    self.publish();
                }
                Ok(added)
            }
            Err(err) => {
                warn!(channel = %self.channel_id, "History fetch failed: {}", err);
                self.last_error = Some(err.clone());
                self.publish();
                Err(err)
            }
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(Snapshot {
            channel_id: self.channel_id.clone(),
            status: self.status,
            messages: self.log.messages().to_vec(),
            last_error: self.last_error.clone(),
        });
    }
}
