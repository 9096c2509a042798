//! Backend abstraction traits.
//!
//! A backend is whatever the client talks to: the hub in the same process,
//! or a server over HTTP. The subscription manager only sees these traits,
//! so it runs unchanged against either.

use async_trait::async_trait;
use reef_protocol::{Channel, HistoryQuery, Message, NewMessage, StreamEvent};

use crate::error::ClientError;

/// Request/response operations plus stream opening.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Fetch a chronological history page.
    async fn history(&self, query: HistoryQuery) -> Result<Vec<Message>, ClientError>;

    /// Open a live stream for a channel.
    ///
    /// Fails with [`ClientError::ChannelGone`] if the channel does not exist.
    async fn open_stream(&self, channel_id: &str) -> Result<Box<dyn EventStream>, ClientError>;

    /// Submit a new message.
    async fn submit(&self, message: NewMessage) -> Result<Message, ClientError>;

    /// List channels.
    async fn channels(&self) -> Result<Vec<Channel>, ClientError>;

    /// Get the backend name (e.g., "local", "sse").
    fn name(&self) -> &'static str;
}

/// An open live stream.
#[async_trait]
pub trait EventStream: Send {
    /// Receive the next event.
    ///
    /// Returns `None` if the stream ended without a terminal event.
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, ClientError>;

    /// Close the stream.
    async fn close(&mut self);
}
