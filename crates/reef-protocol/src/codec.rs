//! Codecs for stream events.
//!
//! Two framings are supported:
//!
//! - **Binary** (WebSocket): a 4-byte big-endian length prefix followed by a
//!   MessagePack-encoded [`StreamEvent`].
//! - **SSE** (`text/event-stream`): `event:` and `data:` lines terminated by a
//!   blank line, the data being the JSON-encoded event.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::events::StreamEvent;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON error in an SSE payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode an event as a length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(event: &StreamEvent) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an event into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(event: &StreamEvent, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single binary frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<StreamEvent, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let event = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(event)
}

/// Try to decode a binary frame from a buffer, advancing it if successful.
///
/// Returns `Ok(None)` if more data is needed.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<StreamEvent>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let event = rmp_serde::from_slice(&payload)?;

    Ok(Some(event))
}

/// Encode an event as one SSE frame.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn encode_sse(event: &StreamEvent) -> Result<String, ProtocolError> {
    let data = serde_json::to_string(event)?;
    Ok(format!("event: {}\ndata: {}\n\n", event.kind().as_str(), data))
}

/// Try to decode the next SSE event from a buffer, advancing it past every
/// frame consumed.
///
/// Comment lines (keep-alives) and frames without `data:` are skipped.
/// Returns `Ok(None)` if more data is needed.
///
/// # Errors
///
/// Returns an error if a frame is too large, not UTF-8, or not a valid event.
pub fn decode_sse_from(buf: &mut BytesMut) -> Result<Option<StreamEvent>, ProtocolError> {
    loop {
        let Some((body_len, frame_len)) = find_sse_frame(buf) else {
            if buf.len() > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge(buf.len()));
            }
            return Ok(None);
        };

        let frame = buf.split_to(frame_len);
        let text = std::str::from_utf8(&frame[..body_len])
            .map_err(|e| ProtocolError::Invalid(e.to_string()))?;

        let mut data = String::new();
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            }
        }

        if data.is_empty() {
            continue;
        }

        return Ok(Some(serde_json::from_str(&data)?));
    }
}

/// Locate the end of the first SSE frame: `(body length, frame length)`.
fn find_sse_frame(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, i + 2));
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, i + 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Incremental SSE decoder for a chunked response body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete event, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffered frame is invalid.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>, ProtocolError> {
        decode_sse_from(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, MessageId};
    use chrono::Utc;

    fn sample_message() -> Message {
        Message {
            id: MessageId::generate(),
            channel_id: "general".into(),
            user_id: Some("u1".into()),
            user_name: "Sam".into(),
            content: "hi".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_binary_message_event() {
        let event = StreamEvent::message(sample_message());
        let encoded = encode(&event).unwrap();
        assert_eq!(decode(&encoded).unwrap(), event);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&StreamEvent::connected("general")).unwrap();

        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        match decode_from(&mut buf) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let first = StreamEvent::connected("general");
        let second = StreamEvent::message(sample_message());

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();

        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), first);
        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), second);
        assert!(buf.is_empty());
        assert!(decode_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_sse_frame_layout() {
        let text = encode_sse(&StreamEvent::connected("general")).unwrap();
        assert_eq!(
            text,
            "event: connected\ndata: {\"type\":\"connected\",\"channelId\":\"general\"}\n\n"
        );
    }

    #[test]
    fn test_sse_decoder_handles_split_chunks_and_comments() {
        let event = StreamEvent::message(sample_message());
        let frame = encode_sse(&event).unwrap();
        let (head, tail) = frame.split_at(frame.len() / 2);

        let mut decoder = SseDecoder::new();
        decoder.push(b": keep-alive\n\n");
        decoder.push(head.as_bytes());
        assert!(decoder.next_event().unwrap().is_none());

        decoder.push(tail.as_bytes());
        assert_eq!(decoder.next_event().unwrap(), Some(event));
        assert!(decoder.next_event().unwrap().is_none());
    }

    #[test]
    fn test_sse_decoder_accepts_crlf() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"event: heartbeat\r\ndata: {\"type\":\"heartbeat\"}\r\n\r\n");
        assert_eq!(
            decoder.next_event().unwrap(),
            Some(StreamEvent::Heartbeat { timestamp: None })
        );
    }

    #[test]
    fn test_sse_decoder_rejects_unknown_event() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"type\":\"bogus\"}\n\n");
        assert!(matches!(decoder.next_event(), Err(ProtocolError::Json(_))));
    }
}
