//! In-process backend over a [`Hub`].

use async_trait::async_trait;
use reef_core::{Hub, StreamSession};
use reef_protocol::{Channel, HistoryQuery, Message, NewMessage, StreamEvent};

use crate::error::ClientError;
use crate::traits::{ChatBackend, EventStream};

/// Backend that calls a hub directly, with no network in between.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    hub: Hub,
}

impl LocalBackend {
    #[must_use]
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }
}

#[async_trait]
impl ChatBackend for LocalBackend {
    async fn history(&self, query: HistoryQuery) -> Result<Vec<Message>, ClientError> {
        Ok(self.hub.history(&query).await?)
    }

    async fn open_stream(&self, channel_id: &str) -> Result<Box<dyn EventStream>, ClientError> {
        let session = self.hub.open_session(channel_id).await?;
        Ok(Box::new(LocalStream { session }))
    }

    async fn submit(&self, message: NewMessage) -> Result<Message, ClientError> {
        Ok(self.hub.submit(message).await?)
    }

    async fn channels(&self) -> Result<Vec<Channel>, ClientError> {
        Ok(self.hub.channels().await?)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

struct LocalStream {
    session: StreamSession,
}

#[async_trait]
impl EventStream for LocalStream {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, ClientError> {
        Ok(self.session.next_event().await)
    }

    async fn close(&mut self) {
        self.session.close();
    }
}
