//! Realtime channel protocol.
//!
//! The realtime service speaks Phoenix channels over a WebSocket: every frame
//! is a JSON envelope `{topic, event, payload, ref, join_ref}`. Payload shape
//! depends on the event, so incoming frames are decoded into [`ChannelEvent`]
//! and row changes into [`RowChange`] instead of being handed around as raw
//! JSON.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::Identified;

pub const TOPIC_PREFIX: &str = "realtime:";
pub const PHOENIX_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_ACCESS_TOKEN: &str = "access_token";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";
pub const EVENT_PRESENCE_STATE: &str = "presence_state";
pub const EVENT_PRESENCE_DIFF: &str = "presence_diff";
pub const EVENT_PRESENCE: &str = "presence";
pub const EVENT_BROADCAST: &str = "broadcast";
pub const EVENT_SYSTEM: &str = "system";

/// Full topic name for a channel name, e.g. `reviews-42` -> `realtime:reviews-42`.
pub fn topic_for(name: &str) -> String {
    format!("{TOPIC_PREFIX}{name}")
}

/// One Phoenix frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            msg_ref: None,
            join_ref: None,
        }
    }

    pub fn with_ref(mut self, msg_ref: impl Into<String>) -> Self {
        self.msg_ref = Some(msg_ref.into());
        self
    }

    pub fn with_join_ref(mut self, join_ref: impl Into<String>) -> Self {
        self.join_ref = Some(join_ref.into());
        self
    }

    pub fn heartbeat(msg_ref: impl Into<String>) -> Self {
        Self::new(PHOENIX_TOPIC, EVENT_HEARTBEAT, json!({})).with_ref(msg_ref)
    }

    pub fn leave(topic: impl Into<String>) -> Self {
        Self::new(topic, EVENT_LEAVE, json!({}))
    }

    /// Broadcast `payload` under `event` on `topic`.
    pub fn broadcast(topic: impl Into<String>, event: &str, payload: Value) -> Self {
        Self::new(
            topic,
            EVENT_BROADCAST,
            json!({ "type": "broadcast", "event": event, "payload": payload }),
        )
    }

    /// Announce this client's presence metadata on `topic`.
    pub fn track(topic: impl Into<String>, meta: Value) -> Self {
        Self::new(
            topic,
            EVENT_PRESENCE,
            json!({ "type": "presence", "event": "track", "payload": meta }),
        )
    }
}

// --- Join configuration ---

/// Row-level operations a change feed listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "*")]
    All,
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

/// A single `postgres_changes` binding in the join payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresBinding {
    pub event: ChangeKind,
    pub schema: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl PostgresBinding {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            event: ChangeKind::All,
            schema: "public".to_string(),
            table: table.into(),
            filter: None,
        }
    }

    pub fn event(mut self, event: ChangeKind) -> Self {
        self.event = event;
        self
    }

    /// Restrict to rows where `column` equals `value` (`column=eq.value`).
    pub fn filter_eq(mut self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filter = Some(format!("{column}=eq.{value}"));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Receive our own broadcasts back.
    #[serde(rename = "self")]
    pub echo_self: bool,
    pub ack: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceConfig {
    pub key: String,
}

/// `config` object sent with `phx_join`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinConfig {
    pub broadcast: BroadcastConfig,
    pub presence: PresenceConfig,
    pub postgres_changes: Vec<PostgresBinding>,
    pub private: bool,
}

impl JoinConfig {
    pub fn payload(&self, access_token: Option<&str>) -> Value {
        let mut payload = json!({ "config": self });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }
        payload
    }
}

// --- Incoming events ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Error,
    Timeout,
}

/// Change record as transmitted inside a `postgres_changes` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
}

/// Presence metadata for one connection of a presence key.
pub type PresenceMeta = Value;

/// Presence entries keyed by presence key.
pub type PresenceMap = HashMap<String, Vec<PresenceMeta>>;

#[derive(Debug, Deserialize)]
struct PresenceEntry {
    #[serde(default)]
    metas: Vec<PresenceMeta>,
}

fn presence_map(value: &Value) -> PresenceMap {
    serde_json::from_value::<HashMap<String, PresenceEntry>>(value.clone())
        .map(|entries| {
            entries
                .into_iter()
                .map(|(key, entry)| (key, entry.metas))
                .collect()
        })
        .unwrap_or_default()
}

/// Decoded channel event, discriminated by the frame's `event` field.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Reply {
        status: ReplyStatus,
        msg_ref: Option<String>,
        response: Value,
    },
    Change(RawChange),
    PresenceState(PresenceMap),
    PresenceDiff {
        joins: PresenceMap,
        leaves: PresenceMap,
    },
    Broadcast {
        event: String,
        payload: Value,
    },
    System(Value),
    Closed,
    Errored(Value),
    Unknown {
        event: String,
        payload: Value,
    },
}

impl ChannelEvent {
    pub fn decode(msg: &PhoenixMessage) -> Self {
        let payload = &msg.payload;
        match msg.event.as_str() {
            EVENT_REPLY => {
                let status = match payload.get("status").and_then(Value::as_str) {
                    Some("ok") => ReplyStatus::Ok,
                    Some("timeout") => ReplyStatus::Timeout,
                    _ => ReplyStatus::Error,
                };
                ChannelEvent::Reply {
                    status,
                    msg_ref: msg.msg_ref.clone(),
                    response: payload.get("response").cloned().unwrap_or(Value::Null),
                }
            }
            EVENT_POSTGRES_CHANGES => {
                let data = payload.get("data").cloned().unwrap_or(Value::Null);
                match serde_json::from_value::<RawChange>(data) {
                    Ok(change) => ChannelEvent::Change(change),
                    Err(_) => ChannelEvent::Unknown {
                        event: msg.event.clone(),
                        payload: payload.clone(),
                    },
                }
            }
            EVENT_PRESENCE_STATE => ChannelEvent::PresenceState(presence_map(payload)),
            EVENT_PRESENCE_DIFF => ChannelEvent::PresenceDiff {
                joins: payload.get("joins").map(presence_map).unwrap_or_default(),
                leaves: payload.get("leaves").map(presence_map).unwrap_or_default(),
            },
            EVENT_BROADCAST => ChannelEvent::Broadcast {
                event: payload
                    .get("event")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                payload: payload.get("payload").cloned().unwrap_or(Value::Null),
            },
            EVENT_SYSTEM => ChannelEvent::System(payload.clone()),
            EVENT_CLOSE => ChannelEvent::Closed,
            EVENT_ERROR => ChannelEvent::Errored(payload.clone()),
            other => ChannelEvent::Unknown {
                event: other.to_string(),
                payload: payload.clone(),
            },
        }
    }
}

/// A typed row change.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange<T> {
    Insert { new: T },
    Update { new: T, old: Option<Value> },
    /// Deleted rows only carry their primary key unless the table uses
    /// `REPLICA IDENTITY FULL`, so only the identifier is guaranteed.
    Delete { id: Option<String>, old: Value },
}

impl<T: DeserializeOwned + Identified> RowChange<T> {
    pub fn from_raw(raw: RawChange) -> Result<Self, ApiError> {
        let decode = |value: Option<Value>| -> Result<T, ApiError> {
            let value = value.ok_or_else(|| {
                ApiError::Deserialize(format!("{} change on {} without a record", kind_name(raw.kind), raw.table))
            })?;
            serde_json::from_value(value).map_err(|e| ApiError::Deserialize(e.to_string()))
        };

        match raw.kind {
            ChangeKind::Insert => Ok(RowChange::Insert {
                new: decode(raw.record.clone())?,
            }),
            ChangeKind::Update => Ok(RowChange::Update {
                new: decode(raw.record.clone())?,
                old: raw.old_record.clone(),
            }),
            ChangeKind::Delete => {
                let old = raw.old_record.clone().unwrap_or(Value::Null);
                let id = old.get(T::KEY_COLUMN).and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                });
                Ok(RowChange::Delete { id, old })
            }
            ChangeKind::All => Err(ApiError::Deserialize(
                "change record without a concrete type".to_string(),
            )),
        }
    }
}

fn kind_name(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::All => "*",
        ChangeKind::Insert => "INSERT",
        ChangeKind::Update => "UPDATE",
        ChangeKind::Delete => "DELETE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Review, ToolStats};

    fn frame(value: Value) -> PhoenixMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn join_payload_carries_bindings_and_token() {
        let config = JoinConfig {
            postgres_changes: vec![PostgresBinding::table("reviews")
                .event(ChangeKind::Insert)
                .filter_eq("tool_id", "abc")],
            ..Default::default()
        };

        let payload = config.payload(Some("jwt"));
        assert_eq!(payload["access_token"], "jwt");
        assert_eq!(
            payload["config"]["postgres_changes"][0],
            json!({ "event": "INSERT", "schema": "public", "table": "reviews", "filter": "tool_id=eq.abc" })
        );
        assert_eq!(payload["config"]["broadcast"]["self"], false);
    }

    #[test]
    fn decodes_join_reply() {
        let event = ChannelEvent::decode(&frame(json!({
            "topic": "realtime:tools-changes",
            "event": "phx_reply",
            "payload": { "status": "ok", "response": { "postgres_changes": [] } },
            "ref": "1"
        })));

        match event {
            ChannelEvent::Reply { status, msg_ref, .. } => {
                assert_eq!(status, ReplyStatus::Ok);
                assert_eq!(msg_ref.as_deref(), Some("1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_insert_into_typed_row() {
        let event = ChannelEvent::decode(&frame(json!({
            "topic": "realtime:reviews-t1",
            "event": "postgres_changes",
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": "reviews",
                    "commit_timestamp": "2024-03-01T10:00:00Z",
                    "type": "INSERT",
                    "record": {
                        "id": "1b0d3c3e-8a59-4f0e-9a43-1f6e3f1c2b10",
                        "tool_id": "2b0d3c3e-8a59-4f0e-9a43-1f6e3f1c2b10",
                        "user_id": "3b0d3c3e-8a59-4f0e-9a43-1f6e3f1c2b10",
                        "rating": 5,
                        "content": "Great",
                        "created_at": "2024-03-01T10:00:00Z"
                    },
                    "old_record": null
                }
            },
            "ref": null
        })));

        let ChannelEvent::Change(raw) = event else {
            panic!("expected a change event");
        };
        match RowChange::<Review>::from_raw(raw).unwrap() {
            RowChange::Insert { new } => assert_eq!(new.rating, 5),
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[test]
    fn delete_exposes_old_identifier() {
        let raw = RawChange {
            schema: "public".to_string(),
            table: "tools".to_string(),
            commit_timestamp: None,
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(json!({ "id": "tool-1" })),
        };

        match RowChange::<Review>::from_raw(raw).unwrap() {
            RowChange::Delete { id, .. } => assert_eq!(id.as_deref(), Some("tool-1")),
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[test]
    fn stats_delete_is_keyed_by_tool() {
        let raw = RawChange {
            schema: "public".to_string(),
            table: "tool_stats".to_string(),
            commit_timestamp: None,
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(json!({ "id": 41, "tool_id": "tool-9" })),
        };

        match RowChange::<ToolStats>::from_raw(raw).unwrap() {
            RowChange::Delete { id, .. } => assert_eq!(id.as_deref(), Some("tool-9")),
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[test]
    fn decodes_presence_diff() {
        let event = ChannelEvent::decode(&frame(json!({
            "topic": "realtime:viewers",
            "event": "presence_diff",
            "payload": {
                "joins": { "u1": { "metas": [{ "phx_ref": "a", "name": "Ada" }] } },
                "leaves": {}
            }
        })));

        match event {
            ChannelEvent::PresenceDiff { joins, leaves } => {
                assert_eq!(joins["u1"][0]["name"], "Ada");
                assert!(leaves.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_broadcast() {
        let event = ChannelEvent::decode(&frame(json!({
            "topic": "realtime:lobby",
            "event": "broadcast",
            "payload": { "type": "broadcast", "event": "cursor", "payload": { "x": 3 } }
        })));

        assert_eq!(
            event,
            ChannelEvent::Broadcast {
                event: "cursor".to_string(),
                payload: json!({ "x": 3 })
            }
        );
    }
}
