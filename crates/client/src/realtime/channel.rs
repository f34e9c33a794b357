//! Channel registry entries and the subscription guard handed to callers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use toologist_shared::{ChannelEvent, JoinConfig, PhoenixMessage};

use super::client::RealtimeClient;
use super::connection::RealtimeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Join sent (or waiting for the socket), no reply yet.
    Joining,
    Subscribed,
    Closed,
    /// The server rejected or dropped the channel. Channels are not retried.
    Errored(String),
}

/// Receives decoded events for one channel.
pub(crate) trait ChannelHandler: Send + Sync {
    /// The join was confirmed.
    fn on_subscribed(&self, _outbox: &Outbox) {}

    /// `mounted` is cleared the moment the owning subscription is released;
    /// handlers check it again right before invoking user callbacks.
    fn on_event(&self, event: ChannelEvent, mounted: &AtomicBool);
}

/// Sends frames for one topic.
#[derive(Clone)]
pub(crate) struct Outbox {
    pub(crate) topic: String,
    pub(crate) client: RealtimeClient,
}

impl Outbox {
    pub(crate) fn send(&self, msg: PhoenixMessage) -> Result<(), RealtimeError> {
        self.client.send(msg.with_ref(self.client.make_ref()))
    }
}

pub(crate) struct ChannelEntry {
    pub(crate) topic: String,
    pub(crate) config: JoinConfig,
    pub(crate) mounted: AtomicBool,
    pub(crate) join_ref: Mutex<Option<String>>,
    pub(crate) status: watch::Sender<ChannelStatus>,
    pub(crate) handler: Box<dyn ChannelHandler>,
}

impl ChannelEntry {
    pub(crate) fn new(topic: String, config: JoinConfig, handler: Box<dyn ChannelHandler>) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Joining);
        Self {
            topic,
            config,
            mounted: AtomicBool::new(true),
            join_ref: Mutex::new(None),
            status,
            handler,
        }
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_status(&self, status: ChannelStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    pub(crate) fn join_ref(&self) -> Option<String> {
        self.join_ref.lock().ok().and_then(|r| r.clone())
    }
}

/// An open channel. Dropping it leaves the channel: the handler stops
/// receiving events immediately and a `phx_leave` is queued.
#[must_use = "the channel is left as soon as the subscription is dropped"]
pub struct ChannelSubscription {
    client: RealtimeClient,
    entry: Arc<ChannelEntry>,
}

impl ChannelSubscription {
    pub(crate) fn new(client: RealtimeClient, entry: Arc<ChannelEntry>) -> Self {
        Self { client, entry }
    }

    /// Full topic, e.g. `realtime:tools-changes`.
    pub fn topic(&self) -> &str {
        &self.entry.topic
    }

    pub fn status(&self) -> ChannelStatus {
        self.entry.status.borrow().clone()
    }

    pub fn status_changes(&self) -> watch::Receiver<ChannelStatus> {
        self.entry.status.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.entry.is_mounted()
    }

    /// Leave the channel now. Same as dropping the subscription.
    pub fn unsubscribe(self) {}

    /// Send a frame on this channel's topic.
    pub(crate) fn push(&self, msg: PhoenixMessage) -> Result<(), RealtimeError> {
        if !self.entry.is_mounted() || !self.client.connection_state().is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let mut msg = msg.with_ref(self.client.make_ref());
        if let Some(join_ref) = self.entry.join_ref() {
            msg = msg.with_join_ref(join_ref);
        }
        self.client.send(msg)
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.client.release(&self.entry);
    }
}

impl std::fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("topic", &self.entry.topic)
            .field("status", &self.status())
            .finish()
    }
}
