//! # reef-protocol
//!
//! Wire contracts for the reef channel messaging core.
//!
//! This crate defines what clients and the server exchange: the channel and
//! message records, the stream event union, HTTP bodies, and the codecs used
//! to frame stream events.
//!
//! ## Stream events
//!
//! - `connected` - Subscription established
//! - `message` - A newly persisted message
//! - `heartbeat` - Keepalive on a fixed interval
//! - `channelGone` - Terminal, the channel was deleted
//!
//! ## Example
//!
//! ```rust
//! use reef_protocol::{codec, StreamEvent};
//!
//! let event = StreamEvent::connected("general");
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod api;
pub mod codec;
pub mod events;
pub mod model;

pub use api::{ErrorBody, ErrorCode, HistoryQuery, StreamQuery};
pub use codec::{decode, encode, ProtocolError, SseDecoder};
pub use events::{EventKind, StreamEvent};
pub use model::{Channel, ChannelId, Message, MessageId, NewMessage};
