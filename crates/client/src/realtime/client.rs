//! Channel registry and frame routing for the realtime socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use serde_json::{json, Value};
use tokio::sync::watch;
use toologist_shared::{
    topic_for, ChannelEvent, JoinConfig, PhoenixMessage, ReplyStatus, EVENT_ACCESS_TOKEN,
    EVENT_JOIN, PHOENIX_TOPIC,
};

use super::channel::{ChannelEntry, ChannelHandler, ChannelStatus, ChannelSubscription, Outbox};
use super::connection::{ConnectionState, RealtimeError};
use crate::auth::SessionHandle;
#[cfg(not(target_arch = "wasm32"))]
use crate::config::ClientConfig;

struct Inner {
    channels: Mutex<HashMap<String, Arc<ChannelEntry>>>,
    outbox: UnboundedSender<PhoenixMessage>,
    state: watch::Sender<ConnectionState>,
    next_ref: AtomicU64,
    session: SessionHandle,
    anon_key: String,
}

/// Shared handle to the realtime socket. Clones share one socket and one
/// channel registry; the socket closes when the last clone is dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

/// Non-owning reference held by background tasks.
#[derive(Clone)]
pub(crate) struct WeakClient(Weak<Inner>);

impl WeakClient {
    pub(crate) fn upgrade(&self) -> Option<RealtimeClient> {
        self.0.upgrade().map(|inner| RealtimeClient { inner })
    }
}

impl RealtimeClient {
    fn with_state(
        session: SessionHandle,
        anon_key: String,
        state: ConnectionState,
    ) -> (Self, UnboundedReceiver<PhoenixMessage>) {
        let (outbox, receiver) = unbounded();
        let (state, _) = watch::channel(state);
        let client = Self {
            inner: Arc::new(Inner {
                channels: Mutex::new(HashMap::new()),
                outbox,
                state,
                next_ref: AtomicU64::new(0),
                session,
                anon_key,
            }),
        };
        (client, receiver)
    }

    /// Open the socket in the background and keep it open.
    ///
    /// Must be called from within a tokio runtime. Channels can be opened
    /// right away; their joins are sent once the socket connects and again
    /// after every reconnect.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn connect(config: &ClientConfig, session: SessionHandle) -> Self {
        let (client, receiver) = Self::with_state(
            session,
            config.anon_key.clone(),
            ConnectionState::Disconnected,
        );
        super::connection::spawn_transport(
            client.downgrade(),
            config.realtime_url(),
            receiver,
            config.reconnect.clone(),
        );
        client.spawn_token_sync();
        client
    }

    /// A client without a socket. Outgoing frames go to the returned
    /// receiver; incoming frames are fed in through [`dispatch`](Self::dispatch).
    pub fn detached(session: SessionHandle) -> (Self, UnboundedReceiver<PhoenixMessage>) {
        Self::with_state(session, String::new(), ConnectionState::Connected)
    }

    pub(crate) fn downgrade(&self) -> WeakClient {
        WeakClient(Arc::downgrade(&self.inner))
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn connection_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
    }

    pub fn session(&self) -> &SessionHandle {
        &self.inner.session
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.lock_channels().len()
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.lock_channels().contains_key(&topic_for(name))
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashMap<String, Arc<ChannelEntry>>> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn make_ref(&self) -> String {
        (self.inner.next_ref.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Queue a frame for the socket.
    pub(crate) fn send(&self, msg: PhoenixMessage) -> Result<(), RealtimeError> {
        self.inner
            .outbox
            .unbounded_send(msg)
            .map_err(|e| RealtimeError::Send(e.to_string()))
    }

    pub(crate) fn heartbeat(&self) -> PhoenixMessage {
        PhoenixMessage::heartbeat(self.make_ref())
    }

    /// Register a channel under `name` and join it.
    ///
    /// Only one channel per topic may be open at a time.
    pub(crate) fn open(
        &self,
        name: &str,
        config: JoinConfig,
        handler: Box<dyn ChannelHandler>,
    ) -> Result<ChannelSubscription, RealtimeError> {
        let topic = topic_for(name);
        let entry = Arc::new(ChannelEntry::new(topic.clone(), config, handler));
        {
            let mut channels = self.lock_channels();
            if channels.contains_key(&topic) {
                crate::log_warn!("Channel {} is already open", topic);
                return Err(RealtimeError::DuplicateChannel(name.to_string()));
            }
            channels.insert(topic.clone(), entry.clone());
        }

        crate::log_info!("Opening channel {}", topic);
        if self.connection_state().is_connected() {
            self.join(&entry);
        }
        Ok(ChannelSubscription::new(self.clone(), entry))
    }

    fn join(&self, entry: &ChannelEntry) {
        let join_ref = self.make_ref();
        if let Ok(mut current) = entry.join_ref.lock() {
            *current = Some(join_ref.clone());
        }
        entry.set_status(ChannelStatus::Joining);

        let token = self.inner.session.access_token();
        let msg = PhoenixMessage::new(
            entry.topic.clone(),
            EVENT_JOIN,
            entry.config.payload(token.as_deref()),
        )
        .with_ref(join_ref.clone())
        .with_join_ref(join_ref);

        if let Err(e) = self.send(msg) {
            crate::log_warn!("Could not queue join for {}: {}", entry.topic, e);
        }
    }

    /// Join every registered channel. Runs after each (re)connect.
    pub(crate) fn join_all(&self) {
        let entries: Vec<_> = self.lock_channels().values().cloned().collect();
        for entry in entries {
            if entry.is_mounted() {
                self.join(&entry);
            }
        }
    }

    /// The socket dropped; every channel has to be joined again.
    pub(crate) fn mark_all_joining(&self) {
        for entry in self.lock_channels().values() {
            entry.set_status(ChannelStatus::Joining);
        }
    }

    /// Stop routing events to `entry` and leave its topic.
    pub(crate) fn release(&self, entry: &Arc<ChannelEntry>) {
        entry.mounted.store(false, Ordering::SeqCst);

        let removed = {
            let mut channels = self.lock_channels();
            match channels.get(&entry.topic) {
                Some(current) if Arc::ptr_eq(current, entry) => {
                    channels.remove(&entry.topic);
                    true
                }
                _ => false,
            }
        };
        entry.set_status(ChannelStatus::Closed);
        if !removed {
            return;
        }

        crate::log_info!("Leaving channel {}", entry.topic);
        if self.connection_state().is_connected() {
            let mut leave = PhoenixMessage::leave(entry.topic.clone()).with_ref(self.make_ref());
            if let Some(join_ref) = entry.join_ref() {
                leave = leave.with_join_ref(join_ref);
            }
            if let Err(e) = self.send(leave) {
                crate::log_debug!("Leave for {} not sent: {}", entry.topic, e);
            }
        }
    }

    /// Push a new access token to every joined channel. Falls back to the
    /// public key when `token` is `None` (signed out).
    pub fn set_auth(&self, token: Option<&str>) {
        let token = token.unwrap_or(self.inner.anon_key.as_str()).to_string();
        let entries: Vec<_> = self.lock_channels().values().cloned().collect();
        for entry in entries {
            if *entry.status.borrow() != ChannelStatus::Subscribed {
                continue;
            }
            let mut msg = PhoenixMessage::new(
                entry.topic.clone(),
                EVENT_ACCESS_TOKEN,
                json!({ "access_token": token }),
            )
            .with_ref(self.make_ref());
            if let Some(join_ref) = entry.join_ref() {
                msg = msg.with_join_ref(join_ref);
            }
            if let Err(e) = self.send(msg) {
                crate::log_warn!("Could not push access token to {}: {}", entry.topic, e);
            }
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn spawn_token_sync(&self) {
        let client = self.downgrade();
        let mut changes = self.inner.session.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let token = changes
                    .borrow_and_update()
                    .as_ref()
                    .map(|s| s.access_token.clone());
                let Some(handle) = client.upgrade() else {
                    break;
                };
                handle.set_auth(token.as_deref());
            }
        });
    }

    /// Route one incoming frame to its channel.
    pub fn dispatch(&self, msg: PhoenixMessage) {
        if msg.topic == PHOENIX_TOPIC {
            return;
        }

        let entry = self.lock_channels().get(&msg.topic).cloned();
        let Some(entry) = entry else {
            crate::log_debug!("Frame for unknown topic {}: {}", msg.topic, msg.event);
            return;
        };
        if !entry.is_mounted() {
            return;
        }
        // Frames from an earlier join of the same topic.
        if let (Some(incoming), Some(current)) = (msg.join_ref.as_deref(), entry.join_ref()) {
            if incoming != current {
                return;
            }
        }

        match ChannelEvent::decode(&msg) {
            ChannelEvent::Reply {
                status,
                msg_ref,
                response,
            } => {
                if msg_ref.is_none() || msg_ref != entry.join_ref() {
                    return;
                }
                match status {
                    ReplyStatus::Ok => {
                        entry.set_status(ChannelStatus::Subscribed);
                        crate::log_info!("Subscribed to {}", entry.topic);
                        let outbox = Outbox {
                            topic: entry.topic.clone(),
                            client: self.clone(),
                        };
                        entry.handler.on_subscribed(&outbox);
                    }
                    ReplyStatus::Error | ReplyStatus::Timeout => {
                        let reason = reason_of(&response, status);
                        crate::log_warn!("Join of {} failed: {}", entry.topic, reason);
                        entry.set_status(ChannelStatus::Errored(reason));
                    }
                }
            }
            ChannelEvent::Closed => {
                crate::log_info!("Channel {} closed by server", entry.topic);
                entry.set_status(ChannelStatus::Closed);
            }
            ChannelEvent::Errored(payload) => {
                crate::log_warn!("Channel {} errored: {}", entry.topic, payload);
                entry.set_status(ChannelStatus::Errored(payload.to_string()));
            }
            ChannelEvent::System(payload) => {
                if payload.get("status").and_then(Value::as_str) == Some("error") {
                    let reason = payload
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("subscription error")
                        .to_string();
                    crate::log_warn!("Channel {} reported: {}", entry.topic, reason);
                    entry.set_status(ChannelStatus::Errored(reason));
                } else {
                    crate::log_debug!("Channel {} system message: {}", entry.topic, payload);
                }
            }
            event => entry.handler.on_event(event, &entry.mounted),
        }
    }
}

fn reason_of(response: &Value, status: ReplyStatus) -> String {
    response
        .get("reason")
        .or_else(|| response.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match status {
            ReplyStatus::Timeout => "join timed out".to_string(),
            _ => "join rejected".to_string(),
        })
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.connection_state())
            .field("channels", &self.channel_count())
            .finish()
    }
}
