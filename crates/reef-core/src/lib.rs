//! # reef-core
//!
//! Real-time channel messaging for reef.
//!
//! This crate provides the server-side building blocks:
//!
//! - **Broadcaster** - Per-channel in-process fan-out to subscriber sinks
//! - **Ingestor** - Validate, persist, then publish new messages
//! - **StreamSession** - One client's live feed: `connected`, messages, heartbeats
//! - **Hub** - The explicit context tying them to a store and registry
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Ingestor   │────▶│ MessageStore│     │ChannelRegistry│
//! └─────────────┘     └─────────────┘     └──────────────┘
//!        │                                        ▲
//!        ▼                                        │
//! ┌─────────────┐     ┌─────────────┐             │
//! │ Broadcaster │────▶│StreamSession│─────────────┘
//! └─────────────┘     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use reef_core::{Hub, HubConfig, InMemoryStore};
//! use reef_protocol::{Channel, NewMessage};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryStore::with_channels([Channel::new("general", "General", "general")])?;
//! let hub = Hub::in_memory(Arc::new(store), HubConfig::default());
//!
//! let mut session = hub.open_session("general").await?;
//! hub.submit(NewMessage::new("general", "Sam", "hi")).await?;
//!
//! while let Some(event) = session.next_event().await {
//!     println!("{}", event.kind().as_str());
//! }
//! # Ok(())
//! # }
//! ```

pub mod broadcaster;
pub mod error;
pub mod hub;
pub mod ingest;
pub mod memory;
pub mod session;
pub mod store;

pub use broadcaster::{
    BroadcastError, Broadcaster, BroadcasterConfig, BroadcasterStats, Delivery, PublishReport,
    Publisher, Subscription,
};
pub use error::{ChatError, StoreError, ValidationError};
pub use hub::{Hub, HubConfig};
pub use ingest::{IngestLimits, Ingested, Ingestor};
pub use memory::InMemoryStore;
pub use session::{SessionConfig, SessionId, SessionState, StreamSession};
pub use store::{ChannelRegistry, MessageStore};
