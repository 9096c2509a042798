//! HTTP backend for a remote reef server.
//!
//! Requests go through `reqwest`. Live streams use server-sent events by
//! default, or a WebSocket carrying MessagePack frames when the
//! `websocket` feature is enabled and selected.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reef_protocol::{
    Channel, ErrorBody, HistoryQuery, Message, NewMessage, ProtocolError, SseDecoder, StreamEvent,
};
use reqwest::StatusCode;
use std::pin::Pin;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::traits::{ChatBackend, EventStream};

/// Live stream transport used by [`HttpBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamTransport {
    /// `text/event-stream` with JSON payloads.
    #[default]
    Sse,
    /// Binary WebSocket frames.
    #[cfg(feature = "websocket")]
    WebSocket,
}

/// Backend that talks to a reef server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    transport: StreamTransport,
}

impl HttpBackend {
    /// Create a backend for a server, e.g. `http://localhost:8080`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a backend with a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            transport: StreamTransport::default(),
        }
    }

    /// Select the live stream transport.
    #[must_use]
    pub fn with_transport(mut self, transport: StreamTransport) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn open_sse(&self, channel_id: &str) -> Result<Box<dyn EventStream>, ClientError> {
        let response = self
            .client
            .get(self.url("/api/messages/stream"))
            .query(&[("channelId", channel_id)])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::ChannelGone(channel_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(error_from_response(response, Some(channel_id)).await);
        }

        debug!(channel = %channel_id, "SSE stream opened");
        Ok(Box::new(SseStream {
            body: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
        }))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn history(&self, query: HistoryQuery) -> Result<Vec<Message>, ClientError> {
        let response = self
            .client
            .get(self.url("/api/messages"))
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, query.channel_id.as_deref()).await);
        }
        Ok(response.json().await?)
    }

    async fn open_stream(&self, channel_id: &str) -> Result<Box<dyn EventStream>, ClientError> {
        match self.transport {
            StreamTransport::Sse => self.open_sse(channel_id).await,
            #[cfg(feature = "websocket")]
            StreamTransport::WebSocket => {
                let url = websocket_stream_url(&self.base_url, channel_id)?;
                crate::websocket::connect(url.as_str(), channel_id).await
            }
        }
    }

    async fn submit(&self, message: NewMessage) -> Result<Message, ClientError> {
        let response = self
            .client
            .post(self.url("/api/messages"))
            .json(&message)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, Some(&message.channel_id)).await);
        }
        Ok(response.json().await?)
    }

    async fn channels(&self) -> Result<Vec<Channel>, ClientError> {
        let response = self.client.get(self.url("/api/channels")).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, None).await);
        }
        Ok(response.json().await?)
    }

    fn name(&self) -> &'static str {
        match self.transport {
            StreamTransport::Sse => "sse",
            #[cfg(feature = "websocket")]
            StreamTransport::WebSocket => "websocket",
        }
    }
}

/// Turn a non-success response into an error, preferring the server's
/// structured body. `channel_id` is the channel the request addressed.
async fn error_from_response(
    response: reqwest::Response,
    channel_id: Option<&str>,
) -> ClientError {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => ClientError::from_body(body, channel_id),
        Err(_) if status.is_server_error() => {
            ClientError::StorageUnavailable(format!("server returned {status}"))
        }
        Err(_) => ClientError::Transport(format!("server returned {status}")),
    }
}

/// WebSocket stream URL with the channel id percent-encoded.
#[cfg(feature = "websocket")]
fn websocket_stream_url(base_url: &str, channel_id: &str) -> Result<reqwest::Url, ClientError> {
    let mut url = reqwest::Url::parse(&format!("{}/api/messages/ws", websocket_base(base_url)))
        .map_err(|e| ClientError::Transport(format!("invalid server url {base_url}: {e}")))?;
    url.query_pairs_mut().append_pair("channelId", channel_id);
    Ok(url)
}

#[cfg(feature = "websocket")]
fn websocket_base(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

struct SseStream {
    body: ByteStream,
    decoder: SseDecoder,
}

#[async_trait]
impl EventStream for SseStream {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, ClientError> {
        loop {
            match self.decoder.next_event() {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => {}
                // The bad frame was consumed, later frames are still usable
                Err(ProtocolError::Json(e)) => {
                    warn!("Skipping undecodable SSE event: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.decoder.push(&chunk),
                Some(Err(e)) => return Err(ClientError::StreamDisconnected(e.to_string())),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        self.body = Box::pin(futures_util::stream::empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse_stream(chunks: Vec<&'static str>) -> SseStream {
        let body = futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, reqwest::Error>(Bytes::from_static(chunk.as_bytes()))),
        );
        SseStream {
            body: Box::pin(body),
            decoder: SseDecoder::new(),
        }
    }

    #[tokio::test]
    async fn test_sse_stream_across_chunks() {
        let mut stream = sse_stream(vec![
            "event: connected\ndata: {\"type\":\"connected\",",
            "\"channelId\":\"general\"}\n\n: keep-alive\n\n",
            "event: heartbeat\ndata: {\"type\":\"heartbeat\"}\n\n",
        ]);

        assert_eq!(
            stream.next_event().await.unwrap(),
            Some(StreamEvent::connected("general"))
        );
        assert_eq!(
            stream.next_event().await.unwrap(),
            Some(StreamEvent::Heartbeat { timestamp: None })
        );
        assert_eq!(stream.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sse_stream_skips_bad_json() {
        let mut stream = sse_stream(vec![
            "data: {not json}\n\n",
            "data: {\"type\":\"channelGone\",\"channelId\":\"general\"}\n\n",
        ]);

        assert_eq!(
            stream.next_event().await.unwrap(),
            Some(StreamEvent::channel_gone("general"))
        );
    }

    #[test]
    fn test_base_url_is_normalized() {
        let backend = HttpBackend::new("http://localhost:8080/");
        assert_eq!(backend.base_url(), "http://localhost:8080");
        assert_eq!(backend.name(), "sse");
    }

    #[cfg(feature = "websocket")]
    #[test]
    fn test_websocket_base() {
        assert_eq!(websocket_base("http://localhost:8080"), "ws://localhost:8080");
        assert_eq!(websocket_base("https://chat.example.com"), "wss://chat.example.com");
    }

    #[cfg(feature = "websocket")]
    #[test]
    fn test_websocket_url_encodes_channel_id() {
        let url = websocket_stream_url("http://localhost:8080", "a&b#x").unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/api/messages/ws");

        let pairs: Vec<_> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, [("channelId".to_string(), "a&b#x".to_string())]);

        assert!(websocket_stream_url("not a url", "general").is_err());
    }
}
