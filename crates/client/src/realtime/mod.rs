//! Realtime subscriptions over the backend's Phoenix channel socket.
//!
//! This module provides:
//! - One shared socket with heartbeats and auto-reconnect
//! - A channel registry keyed by topic (one handle per channel)
//! - Typed row change feeds, presence and broadcast on top of it
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  RealtimeClient                     │
//! │   (socket, channel registry, join/leave routing)    │
//! └─────────────────────────────────────────────────────┘
//!                         │
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │ ChangeFeed │ │ Presence   │ │ Broadcast  │
//!   │ tools-...  │ │ viewers    │ │ room       │
//!   └────────────┘ └────────────┘ └────────────┘
//!          │              │              │
//!          ▼              ▼              ▼
//!   caller callbacks, gated by the owning ChannelSubscription
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let sub = realtime.on_new_review(tool_id, move |review| {
//!     reviews.update(|rows| rows.insert(0, review));
//! })?;
//! // Dropping `sub` leaves the channel; no callback runs afterwards.
//! ```

mod channel;
mod client;
mod connection;
mod feeds;
mod presence;

pub use channel::{ChannelStatus, ChannelSubscription};
pub use client::RealtimeClient;
pub use connection::{ConnectionState, ReconnectConfig, RealtimeError};
pub use feeds::{
    apply_change, reviews_feed, BroadcastChannel, ChangeHandlers, PresenceChannel, STATS_FEED,
    TOOLS_FEED,
};
pub use presence::{PresenceEvent, PresenceSet};
