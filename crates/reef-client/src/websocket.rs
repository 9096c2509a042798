//! WebSocket live streams.
//!
//! Each binary message carries one length-prefixed MessagePack event.

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use reef_protocol::{codec, StreamEvent};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::ClientError;
use crate::traits::EventStream;

/// Connect to a stream endpoint.
pub(crate) async fn connect(
    url: &str,
    channel_id: &str,
) -> Result<Box<dyn EventStream>, ClientError> {
    let (socket, _response) = connect_async(url).await.map_err(|e| match e {
        WsError::Http(response) if response.status().as_u16() == 404 => {
            ClientError::ChannelGone(channel_id.to_string())
        }
        other => ClientError::Transport(other.to_string()),
    })?;

    debug!(channel = %channel_id, "WebSocket stream opened");
    Ok(Box::new(WebSocketEventStream {
        socket,
        buf: BytesMut::new(),
    }))
}

struct WebSocketEventStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    buf: BytesMut,
}

#[async_trait]
impl EventStream for WebSocketEventStream {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, ClientError> {
        loop {
            if let Some(event) = codec::decode_from(&mut self.buf)? {
                return Ok(Some(event));
            }

            match self.socket.next().await {
                Some(Ok(Message::Binary(data))) => self.buf.extend_from_slice(&data),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed)) => return Ok(None),
                Some(Err(e)) => return Err(ClientError::StreamDisconnected(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}
