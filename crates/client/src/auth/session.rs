//! Signed-in session and the shared handle every client component reads it
//! through.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Token set returned by the auth service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    /// Unix seconds. Filled in from `expires_in` when the service omits it.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    pub(crate) fn stamped(mut self, now: i64) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(now + self.expires_in);
        }
        self
    }

    /// Whether the access token expires within `margin_secs` of `now`.
    pub fn expires_within(&self, margin_secs: i64, now: i64) -> bool {
        match self.expires_at {
            Some(at) => at - now <= margin_secs,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(0, Utc::now().timestamp())
    }
}

/// Shared, observable current session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<watch::Sender<Option<Session>>>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            inner: Arc::new(sender),
        }
    }
}

impl SessionHandle {
    pub fn new(session: Option<Session>) -> Self {
        let handle = Self::default();
        handle.set(session);
        handle
    }

    pub fn get(&self) -> Option<Session> {
        self.inner.borrow().clone()
    }

    pub fn set(&self, session: Option<Session>) {
        self.inner.send_replace(session);
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.inner.borrow().as_ref().map(|s| s.user.id)
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.borrow().as_ref().map(|s| s.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.borrow().is_some()
    }

    /// Receiver notified on sign-in, refresh and sign-out.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.inner.subscribe()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("user_id", &self.user_id())
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_session(user_id: Uuid) -> Session {
    Session {
        access_token: format!("access-{user_id}"),
        refresh_token: "refresh".to_string(),
        token_type: "bearer".to_string(),
        expires_in: 3600,
        expires_at: Some(Utc::now().timestamp() + 3600),
        user: AuthUser {
            id: user_id,
            email: Some("ada@example.com".to_string()),
            role: Some("authenticated".to_string()),
        },
    }
}
