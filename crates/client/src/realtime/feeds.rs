//! Typed feeds on top of the channel registry: row change feeds, presence
//! and broadcast.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::Value;
use toologist_shared::{
    BroadcastConfig, ChangeKind, ChannelEvent, Identified, JoinConfig, PhoenixMessage,
    PostgresBinding, PresenceConfig, Review, RowChange, Tool, ToolStats, REVIEWS_TABLE,
    TOOLS_TABLE, TOOL_STATS_TABLE,
};
use uuid::Uuid;

use super::channel::{ChannelHandler, ChannelStatus, ChannelSubscription, Outbox};
use super::client::RealtimeClient;
use super::connection::RealtimeError;
use super::presence::{PresenceEvent, PresenceSet};

pub const TOOLS_FEED: &str = "tools-changes";
pub const STATS_FEED: &str = "stats-changes";

/// Channel name of the review feed for one tool.
pub fn reviews_feed(tool_id: Uuid) -> String {
    format!("reviews-{tool_id}")
}

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Callbacks for a row change feed. Unset callbacks ignore their events.
pub struct ChangeHandlers<T> {
    insert: Option<Callback<T>>,
    update: Option<Callback<T>>,
    delete: Option<Callback<String>>,
}

impl<T> Default for ChangeHandlers<T> {
    fn default() -> Self {
        Self {
            insert: None,
            update: None,
            delete: None,
        }
    }
}

impl<T> ChangeHandlers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_insert(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.insert = Some(Box::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    /// Receives the deleted row's id.
    pub fn on_delete(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.delete = Some(Box::new(f));
        self
    }
}

struct ChangeFeed<T> {
    table: String,
    handlers: ChangeHandlers<T>,
}

impl<T: DeserializeOwned + Identified + 'static> ChannelHandler for ChangeFeed<T> {
    fn on_event(&self, event: ChannelEvent, mounted: &AtomicBool) {
        let ChannelEvent::Change(raw) = event else {
            return;
        };
        if !raw.table.is_empty() && raw.table != self.table {
            crate::log_debug!("Ignoring change on {} in {} feed", raw.table, self.table);
            return;
        }

        let change = match RowChange::<T>::from_raw(raw) {
            Ok(change) => change,
            Err(e) => {
                crate::log_warn!("Undecodable change on {}: {}", self.table, e);
                return;
            }
        };

        // The subscription may have been released while this event was decoded.
        if !mounted.load(Ordering::SeqCst) {
            return;
        }

        match change {
            RowChange::Insert { new } => {
                if let Some(f) = &self.handlers.insert {
                    f(new);
                }
            }
            RowChange::Update { new, .. } => {
                if let Some(f) = &self.handlers.update {
                    f(new);
                }
            }
            RowChange::Delete { id: Some(id), .. } => {
                if let Some(f) = &self.handlers.delete {
                    f(id);
                }
            }
            RowChange::Delete { id: None, .. } => {
                crate::log_debug!("Delete on {} without an id", self.table);
            }
        }
    }
}

/// Fold a change into a locally held list: inserts append, updates replace
/// the row with the same id, deletes remove it.
pub fn apply_change<T: Identified>(rows: &mut Vec<T>, change: RowChange<T>) {
    match change {
        RowChange::Insert { new } => {
            let id = new.row_id();
            if !rows.iter().any(|r| r.row_id() == id) {
                rows.push(new);
            }
        }
        RowChange::Update { new, .. } => {
            let id = new.row_id();
            match rows.iter_mut().find(|r| r.row_id() == id) {
                Some(row) => *row = new,
                None => rows.push(new),
            }
        }
        RowChange::Delete { id: Some(id), .. } => rows.retain(|r| r.row_id() != id),
        RowChange::Delete { id: None, .. } => {}
    }
}

struct PresenceFeed {
    state: Arc<Mutex<PresenceSet>>,
    meta: Arc<Mutex<Value>>,
    callback: Box<dyn Fn(PresenceEvent, &PresenceSet) + Send + Sync>,
}

impl ChannelHandler for PresenceFeed {
    fn on_subscribed(&self, outbox: &Outbox) {
        let meta = self.meta.lock().map(|m| m.clone()).unwrap_or(Value::Null);
        if let Err(e) = outbox.send(PhoenixMessage::track(outbox.topic.clone(), meta)) {
            crate::log_warn!("Could not track presence on {}: {}", outbox.topic, e);
        }
    }

    fn on_event(&self, event: ChannelEvent, mounted: &AtomicBool) {
        let (events, snapshot) = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let events = match event {
                ChannelEvent::PresenceState(map) => state.sync_state(map),
                ChannelEvent::PresenceDiff { joins, leaves } => state.sync_diff(joins, leaves),
                _ => return,
            };
            (events, state.clone())
        };

        for event in events {
            if !mounted.load(Ordering::SeqCst) {
                return;
            }
            (self.callback)(event, &snapshot);
        }
    }
}

/// Open presence channel.
#[derive(Debug)]
pub struct PresenceChannel {
    subscription: ChannelSubscription,
    state: Arc<Mutex<PresenceSet>>,
    meta: Arc<Mutex<Value>>,
}

impl PresenceChannel {
    /// Who is present right now.
    pub fn present(&self) -> PresenceSet {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Replace this client's presence metadata.
    pub fn track(&self, meta: Value) -> Result<(), RealtimeError> {
        if let Ok(mut current) = self.meta.lock() {
            *current = meta.clone();
        }
        self.subscription
            .push(PhoenixMessage::track(self.subscription.topic().to_string(), meta))
    }

    pub fn status(&self) -> ChannelStatus {
        self.subscription.status()
    }

    pub fn subscription(&self) -> &ChannelSubscription {
        &self.subscription
    }
}

struct BroadcastFeed {
    callback: Box<dyn Fn(String, Value) + Send + Sync>,
}

impl ChannelHandler for BroadcastFeed {
    fn on_event(&self, event: ChannelEvent, mounted: &AtomicBool) {
        if let ChannelEvent::Broadcast { event, payload } = event {
            if mounted.load(Ordering::SeqCst) {
                (self.callback)(event, payload);
            }
        }
    }
}

/// Open broadcast channel.
#[derive(Debug)]
pub struct BroadcastChannel {
    subscription: ChannelSubscription,
}

impl BroadcastChannel {
    /// Publish `payload` under `event` to everyone on the channel.
    pub fn send(&self, event: &str, payload: Value) -> Result<(), RealtimeError> {
        self.subscription.push(PhoenixMessage::broadcast(
            self.subscription.topic().to_string(),
            event,
            payload,
        ))
    }

    pub fn status(&self) -> ChannelStatus {
        self.subscription.status()
    }

    pub fn subscription(&self) -> &ChannelSubscription {
        &self.subscription
    }
}

impl RealtimeClient {
    /// Row changes of the table named in `binding`, on channel `name`.
    pub fn table_changes<T: DeserializeOwned + Identified + 'static>(
        &self,
        name: &str,
        binding: PostgresBinding,
        handlers: ChangeHandlers<T>,
    ) -> Result<ChannelSubscription, RealtimeError> {
        let feed = ChangeFeed {
            table: binding.table.clone(),
            handlers,
        };
        let config = JoinConfig {
            postgres_changes: vec![binding],
            ..Default::default()
        };
        self.open(name, config, Box::new(feed))
    }

    pub fn tools_changes(
        &self,
        handlers: ChangeHandlers<Tool>,
    ) -> Result<ChannelSubscription, RealtimeError> {
        self.table_changes(TOOLS_FEED, PostgresBinding::table(TOOLS_TABLE), handlers)
    }

    /// All review changes for one tool.
    pub fn review_changes(
        &self,
        tool_id: Uuid,
        handlers: ChangeHandlers<Review>,
    ) -> Result<ChannelSubscription, RealtimeError> {
        self.table_changes(
            &reviews_feed(tool_id),
            PostgresBinding::table(REVIEWS_TABLE).filter_eq("tool_id", tool_id),
            handlers,
        )
    }

    /// Calls `f` once per review inserted for `tool_id`.
    pub fn on_new_review(
        &self,
        tool_id: Uuid,
        f: impl Fn(Review) + Send + Sync + 'static,
    ) -> Result<ChannelSubscription, RealtimeError> {
        self.table_changes(
            &reviews_feed(tool_id),
            PostgresBinding::table(REVIEWS_TABLE)
                .event(ChangeKind::Insert)
                .filter_eq("tool_id", tool_id),
            ChangeHandlers::new().on_insert(f),
        )
    }

    pub fn stats_changes(
        &self,
        handlers: ChangeHandlers<ToolStats>,
    ) -> Result<ChannelSubscription, RealtimeError> {
        self.table_changes(STATS_FEED, PostgresBinding::table(TOOL_STATS_TABLE), handlers)
    }

    /// Join presence channel `name` as `key`, announcing `meta` once joined.
    pub fn presence(
        &self,
        name: &str,
        key: &str,
        meta: Value,
        on_event: impl Fn(PresenceEvent, &PresenceSet) + Send + Sync + 'static,
    ) -> Result<PresenceChannel, RealtimeError> {
        let state = Arc::new(Mutex::new(PresenceSet::new()));
        let meta = Arc::new(Mutex::new(meta));
        let feed = PresenceFeed {
            state: state.clone(),
            meta: meta.clone(),
            callback: Box::new(on_event),
        };
        let config = JoinConfig {
            presence: PresenceConfig {
                key: key.to_string(),
            },
            ..Default::default()
        };
        let subscription = self.open(name, config, Box::new(feed))?;
        Ok(PresenceChannel {
            subscription,
            state,
            meta,
        })
    }

    /// Join broadcast channel `name`. Own messages are not echoed back.
    pub fn broadcast(
        &self,
        name: &str,
        on_message: impl Fn(String, Value) + Send + Sync + 'static,
    ) -> Result<BroadcastChannel, RealtimeError> {
        let config = JoinConfig {
            broadcast: BroadcastConfig {
                echo_self: false,
                ack: false,
            },
            ..Default::default()
        };
        let feed = BroadcastFeed {
            callback: Box::new(on_message),
        };
        let subscription = self.open(name, config, Box::new(feed))?;
        Ok(BroadcastChannel { subscription })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;
    use serde_json::json;
    use toologist_shared::{RawChange, EVENT_POSTGRES_CHANGES, EVENT_PRESENCE};

    use super::*;
    use crate::auth::SessionHandle;
    use crate::realtime::client::tests::{drain, join_ok};

    fn review_json(tool_id: Uuid, rating: i32) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "tool_id": tool_id,
            "user_id": Uuid::new_v4(),
            "rating": rating,
            "content": "Does what it says",
            "created_at": Utc::now(),
        })
    }

    fn change(topic: &str, table: &str, kind: &str, record: Value, old: Value) -> PhoenixMessage {
        PhoenixMessage::new(
            topic,
            EVENT_POSTGRES_CHANGES,
            json!({
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": table,
                    "commit_timestamp": Utc::now(),
                    "type": kind,
                    "record": record,
                    "old_record": old,
                }
            }),
        )
    }

    #[test]
    fn new_review_callback_runs_once_per_insert() {
        let (client, mut rx) = RealtimeClient::detached(SessionHandle::default());
        let tool_id = Uuid::new_v4();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();

        let sub = client
            .on_new_review(tool_id, move |review| sink.lock().unwrap().push(review))
            .unwrap();
        let join = drain(&mut rx).remove(0);
        assert_eq!(sub.topic(), format!("realtime:reviews-{tool_id}"));
        assert_eq!(
            join.payload["config"]["postgres_changes"][0]["filter"],
            format!("tool_id=eq.{tool_id}")
        );
        assert_eq!(join.payload["config"]["postgres_changes"][0]["event"], "INSERT");
        client.dispatch(join_ok(&join));

        let record = review_json(tool_id, 4);
        client.dispatch(change(sub.topic(), "reviews", "INSERT", record.clone(), Value::Null));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].rating, 4);
        assert_eq!(received[0].id.to_string(), record["id"].as_str().unwrap());
    }

    #[test]
    fn change_handlers_route_by_kind() {
        let (client, mut rx) = RealtimeClient::detached(SessionHandle::default());
        let tool_id = Uuid::new_v4();
        let inserts = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));
        let deleted = Arc::new(Mutex::new(Vec::new()));

        let (i, u, d) = (inserts.clone(), updates.clone(), deleted.clone());
        let sub = client
            .review_changes(
                tool_id,
                ChangeHandlers::new()
                    .on_insert(move |_| {
                        i.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_update(move |_| {
                        u.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_delete(move |id| d.lock().unwrap().push(id)),
            )
            .unwrap();
        client.dispatch(join_ok(&drain(&mut rx)[0]));

        let topic = sub.topic().to_string();
        client.dispatch(change(&topic, "reviews", "INSERT", review_json(tool_id, 5), Value::Null));
        client.dispatch(change(&topic, "reviews", "UPDATE", review_json(tool_id, 3), json!({})));
        client.dispatch(change(&topic, "reviews", "DELETE", Value::Null, json!({ "id": "r-1" })));

        assert_eq!(inserts.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(*deleted.lock().unwrap(), vec!["r-1".to_string()]);
    }

    #[test]
    fn no_callbacks_after_subscription_is_dropped() {
        let (client, mut rx) = RealtimeClient::detached(SessionHandle::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = client
            .tools_changes(ChangeHandlers::new().on_insert(move |_: Tool| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        client.dispatch(join_ok(&drain(&mut rx)[0]));

        let topic = sub.topic().to_string();
        drop(sub);

        let tool = json!({
            "id": Uuid::new_v4(), "slug": "x", "name": "X", "created_at": Utc::now()
        });
        client.dispatch(change(&topic, "tools", "INSERT", tool, Value::Null));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn in_flight_event_is_dropped_once_unmounted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let feed = ChangeFeed {
            table: REVIEWS_TABLE.to_string(),
            handlers: ChangeHandlers::new().on_insert(move |_: Review| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        };
        let raw = RawChange {
            schema: "public".to_string(),
            table: REVIEWS_TABLE.to_string(),
            commit_timestamp: None,
            kind: ChangeKind::Insert,
            record: Some(review_json(Uuid::new_v4(), 2)),
            old_record: None,
        };

        // Routed while mounted, released before the callback.
        let mounted = AtomicBool::new(false);
        feed.on_event(ChannelEvent::Change(raw.clone()), &mounted);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        mounted.store(true, Ordering::SeqCst);
        feed.on_event(ChannelEvent::Change(raw), &mounted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn apply_change_patches_local_rows() {
        let tool_id = Uuid::new_v4();
        let first: Review = serde_json::from_value(review_json(tool_id, 5)).unwrap();
        let mut rows = vec![first.clone()];

        let mut edited = first.clone();
        edited.rating = 1;
        apply_change(
            &mut rows,
            RowChange::Update {
                new: edited,
                old: None,
            },
        );
        assert_eq!(rows[0].rating, 1);

        apply_change(&mut rows, RowChange::Insert { new: first.clone() });
        assert_eq!(rows.len(), 1);

        apply_change(
            &mut rows,
            RowChange::Delete {
                id: Some(first.id.to_string()),
                old: Value::Null,
            },
        );
        assert!(rows.is_empty());
    }

    #[test]
    fn presence_tracks_after_join_and_folds_diffs() {
        let (client, mut rx) = RealtimeClient::detached(SessionHandle::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let channel = client
            .presence("tool-viewers", "ada", json!({ "name": "Ada" }), move |event, _| {
                sink.lock().unwrap().push(event)
            })
            .unwrap();

        let join = drain(&mut rx).remove(0);
        assert_eq!(join.payload["config"]["presence"]["key"], "ada");
        client.dispatch(join_ok(&join));

        let track = drain(&mut rx).remove(0);
        assert_eq!(track.event, EVENT_PRESENCE);
        assert_eq!(track.payload["payload"]["name"], "Ada");

        client.dispatch(PhoenixMessage::new(
            channel.subscription().topic(),
            "presence_diff",
            json!({ "joins": { "bob": { "metas": [{ "phx_ref": "b1" }] } }, "leaves": {} }),
        ));
        assert!(channel.present().is_present("bob"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                PresenceEvent::Join {
                    key: "bob".to_string(),
                    metas: vec![json!({ "phx_ref": "b1" })]
                },
                PresenceEvent::Sync
            ]
        );
    }

    #[test]
    fn broadcast_relays_and_sends() {
        let (client, mut rx) = RealtimeClient::detached(SessionHandle::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let channel = client
            .broadcast("compare-room", move |event, payload| {
                sink.lock().unwrap().push((event, payload))
            })
            .unwrap();
        let join = drain(&mut rx).remove(0);
        assert_eq!(join.payload["config"]["broadcast"]["self"], false);
        client.dispatch(join_ok(&join));

        channel.send("cursor", json!({ "x": 1 })).unwrap();
        let sent = drain(&mut rx).remove(0);
        assert_eq!(sent.payload["event"], "cursor");
        assert_eq!(sent.join_ref, join.join_ref);

        client.dispatch(PhoenixMessage::broadcast(
            channel.subscription().topic().to_string(),
            "cursor",
            json!({ "x": 2 }),
        ));
        assert_eq!(*seen.lock().unwrap(), vec![("cursor".to_string(), json!({ "x": 2 }))]);
    }

    #[test]
    fn broadcast_send_fails_while_offline() {
        let (client, _rx) = RealtimeClient::detached(SessionHandle::default());
        let channel = client.broadcast("lobby", |_, _| {}).unwrap();
        client.set_state(crate::realtime::ConnectionState::Disconnected);
        assert_eq!(channel.send("x", Value::Null), Err(RealtimeError::NotConnected));
    }
}
