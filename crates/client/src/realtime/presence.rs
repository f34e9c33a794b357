//! Presence bookkeeping for one channel.

use serde_json::Value;
use toologist_shared::{PresenceMap, PresenceMeta};

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// The set changed; read it again.
    Sync,
    Join { key: String, metas: Vec<PresenceMeta> },
    Leave { key: String, metas: Vec<PresenceMeta> },
}

/// Who is currently present, keyed by presence key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSet {
    entries: PresenceMap,
}

fn phx_ref(meta: &PresenceMeta) -> Option<&str> {
    meta.get("phx_ref").and_then(Value::as_str)
}

fn has_ref(metas: &[PresenceMeta], meta: &PresenceMeta) -> bool {
    match phx_ref(meta) {
        Some(r) => metas.iter().any(|m| phx_ref(m) == Some(r)),
        None => metas.contains(meta),
    }
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set with a full `presence_state` snapshot.
    pub fn sync_state(&mut self, state: PresenceMap) -> Vec<PresenceEvent> {
        let mut events = Vec::new();

        for (key, metas) in &state {
            let known = self.entries.get(key).map(Vec::as_slice).unwrap_or_default();
            let joined: Vec<_> = metas.iter().filter(|m| !has_ref(known, m)).cloned().collect();
            if !joined.is_empty() {
                events.push(PresenceEvent::Join {
                    key: key.clone(),
                    metas: joined,
                });
            }
        }
        for (key, metas) in &self.entries {
            let incoming = state.get(key).map(Vec::as_slice).unwrap_or_default();
            let left: Vec<_> = metas.iter().filter(|m| !has_ref(incoming, m)).cloned().collect();
            if !left.is_empty() {
                events.push(PresenceEvent::Leave {
                    key: key.clone(),
                    metas: left,
                });
            }
        }

        self.entries = state;
        self.entries.retain(|_, metas| !metas.is_empty());
        events.push(PresenceEvent::Sync);
        events
    }

    /// Apply a `presence_diff`.
    pub fn sync_diff(&mut self, joins: PresenceMap, leaves: PresenceMap) -> Vec<PresenceEvent> {
        let mut events = Vec::new();

        for (key, metas) in joins {
            let current = self.entries.entry(key.clone()).or_default();
            for meta in &metas {
                if !has_ref(current, meta) {
                    current.push(meta.clone());
                }
            }
            events.push(PresenceEvent::Join { key, metas });
        }

        for (key, metas) in leaves {
            if let Some(current) = self.entries.get_mut(&key) {
                current.retain(|m| !has_ref(&metas, m));
                if current.is_empty() {
                    self.entries.remove(&key);
                }
            }
            events.push(PresenceEvent::Leave { key, metas });
        }

        events.push(PresenceEvent::Sync);
        events
    }

    pub fn get(&self, key: &str) -> Option<&[PresenceMeta]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn is_present(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_map(&self) -> PresenceMap {
        self.entries.clone()
    }
}
