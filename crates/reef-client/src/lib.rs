//! # reef-client
//!
//! Client-side subscriptions for reef channels.
//!
//! A [`SubscriptionManager`] combines a history page with the live stream
//! into one deduplicated message list, and reopens the stream when it
//! drops. It runs against any [`ChatBackend`]:
//!
//! - **LocalBackend** - Calls a [`reef_core::Hub`] in the same process
//! - **HttpBackend** - Talks to a reef server over HTTP, with SSE or
//!   WebSocket live streams
//!
//! ```rust,ignore
//! use reef_client::{HttpBackend, ManagerConfig, SubscriptionManager};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(HttpBackend::new("http://localhost:8080"));
//! let manager = SubscriptionManager::open(backend, "general", ManagerConfig::default());
//!
//! manager.send("hi", "Sam", None).await?;
//! for message in manager.snapshot().messages {
//!     println!("{}: {}", message.user_name, message.content);
//! }
//! ```

pub mod error;
pub mod http;
pub mod local;
pub mod log;
pub mod manager;
pub mod traits;

#[cfg(feature = "websocket")]
mod websocket;

pub use error::ClientError;
pub use http::{HttpBackend, StreamTransport};
pub use local::LocalBackend;
pub use log::MessageLog;
pub use manager::{ConnectionStatus, ManagerConfig, Snapshot, SubscriptionManager};
pub use traits::{ChatBackend, EventStream};
