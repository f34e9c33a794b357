//! Authentication against the backend's auth service, with session
//! persistence and background token refresh.

pub mod pkce;
mod session;

use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use toologist_shared::ApiError;
use url::Url;

use crate::config::{AuthOptions, ClientConfig, FlowType};
use crate::storage::{self, KeyValueStore};

pub use session::{AuthUser, Session, SessionHandle};

#[cfg(test)]
pub(crate) use session::test_session;

/// Background refresh interval.
pub const AUTO_REFRESH_TICK_SECS: u64 = 30;
/// Refresh when the token expires within this many ticks.
pub const AUTO_REFRESH_TICK_THRESHOLD: i64 = 3;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("No code verifier stored for this sign-in")]
    MissingCodeVerifier,
    #[error("Not signed in")]
    NoSession,
    #[error("Sign-in redirect returned an error: {0}")]
    Redirect(String),
    #[error("Invalid redirect URL: {0}")]
    InvalidUrl(String),
}

/// Client for `{url}/auth/v1`.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    auth_url: String,
    anon_key: String,
    options: AuthOptions,
    session: SessionHandle,
    store: Arc<dyn KeyValueStore>,
}

impl AuthClient {
    pub fn new(config: &ClientConfig, session: SessionHandle, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_auth_url(
            config.auth_url(),
            config.anon_key.clone(),
            config.auth.clone(),
            session,
            store,
        )
    }

    pub fn with_auth_url(
        auth_url: impl Into<String>,
        anon_key: impl Into<String>,
        options: AuthOptions,
        session: SessionHandle,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            client: Client::new(),
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            options,
            session,
            store,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    fn verifier_key(&self) -> String {
        format!("{}-code-verifier", self.options.storage_key)
    }

    /// Load a persisted session into the handle.
    pub fn restore_session(&self) -> Option<Session> {
        if !self.options.persist_session {
            return None;
        }
        let session: Session = storage::load(self.store.as_ref(), &self.options.storage_key)?;
        crate::log_info!("Restored session for user {}", session.user.id);
        self.session.set(Some(session.clone()));
        Some(session)
    }

    fn set_session(&self, session: Session) -> Session {
        let session = session.stamped(Utc::now().timestamp());
        if self.options.persist_session
            && !storage::save(self.store.as_ref(), &self.options.storage_key, &session)
        {
            crate::log_warn!("Failed to persist session under {}", self.options.storage_key);
        }
        self.session.set(Some(session.clone()));
        session
    }

    fn clear_session(&self) {
        self.store.remove(&self.options.storage_key);
        self.session.set(None);
    }

    async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
        bearer: Option<&str>,
    ) -> Result<TRes, ApiError> {
        let url = format!("{}/{}", self.auth_url, path.trim_start_matches('/'));
        let token = bearer.unwrap_or(self.anon_key.as_str());
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {token}"))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp.text().await.map_err(|e| ApiError::Network(e.to_string()))?;

        if !is_success {
            return Err(ApiError::from_response(status, text));
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session: Session = self
            .post_json(
                "token?grant_type=password",
                &json!({ "email": email, "password": password }),
                None,
            )
            .await?;
        crate::log_info!("Signed in as {}", session.user.id);
        Ok(self.set_session(session))
    }

    /// Register a new account. Returns the session when the backend signs the
    /// user in immediately, `None` when email confirmation is pending.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError> {
        let mut body = json!({ "email": email, "password": password });
        if self.options.flow_type == FlowType::Pkce {
            let verifier = pkce::generate_code_verifier();
            self.store.set(&self.verifier_key(), &verifier);
            body["code_challenge"] = Value::String(pkce::code_challenge(&verifier));
            body["code_challenge_method"] = Value::String(pkce::CHALLENGE_METHOD.to_string());
        }

        let response: Value = self.post_json("signup", &body, None).await?;
        if response.get("access_token").is_some() {
            let session: Session = serde_json::from_value(response)
                .map_err(|e| ApiError::Deserialize(e.to_string()))?;
            return Ok(Some(self.set_session(session)));
        }
        Ok(None)
    }

    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let current = self.session.get().ok_or(AuthError::NoSession)?;
        let session: Session = self
            .post_json(
                "token?grant_type=refresh_token",
                &json!({ "refresh_token": current.refresh_token }),
                None,
            )
            .await?;
        crate::log_debug!("Refreshed session for user {}", session.user.id);
        Ok(self.set_session(session))
    }

    /// Revoke the session server-side. The local session is cleared even if
    /// the request fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self.session.access_token();
        self.clear_session();
        if let Some(token) = token {
            let _: Value = self.post_json("logout", &json!({}), Some(&token)).await?;
        }
        Ok(())
    }

    /// URL that starts an OAuth sign-in with `provider`. For the PKCE flow a
    /// fresh code verifier is stored and its challenge attached.
    pub fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<String, AuthError> {
        let mut url = Url::parse(&format!("{}/authorize", self.auth_url))
            .map_err(|e| AuthError::InvalidUrl(e.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("provider", provider);
            pairs.append_pair("redirect_to", redirect_to);
            if self.options.flow_type == FlowType::Pkce {
                let verifier = pkce::generate_code_verifier();
                self.store.set(&self.verifier_key(), &verifier);
                pairs.append_pair("code_challenge", &pkce::code_challenge(&verifier));
                pairs.append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);
            }
        }
        Ok(url.to_string())
    }

    /// Trade a PKCE authorization code for a session.
    pub async fn exchange_code_for_session(&self, auth_code: &str) -> Result<Session, AuthError> {
        let verifier_key = self.verifier_key();
        let verifier = self
            .store
            .get(&verifier_key)
            .ok_or(AuthError::MissingCodeVerifier)?;

        let session: Session = self
            .post_json(
                "token?grant_type=pkce",
                &json!({ "auth_code": auth_code, "code_verifier": verifier }),
                None,
            )
            .await?;
        self.store.remove(&verifier_key);
        Ok(self.set_session(session))
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, ApiError> {
        let url = format!("{}/user", self.auth_url);
        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp.text().await.map_err(|e| ApiError::Network(e.to_string()))?;
        if !is_success {
            return Err(ApiError::from_response(status, text));
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// Complete a redirect-based sign-in from the landing URL.
    ///
    /// `?code=` is exchanged through PKCE; `#access_token=...` is taken as an
    /// implicit-flow session. Returns `Ok(None)` when the URL carries neither
    /// or detection is disabled.
    pub async fn detect_session_in_url(&self, landing_url: &str) -> Result<Option<Session>, AuthError> {
        if !self.options.detect_session_in_url {
            return Ok(None);
        }
        let url = Url::parse(landing_url).map_err(|e| AuthError::InvalidUrl(e.to_string()))?;

        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let fragment: Vec<(String, String)> = url
            .fragment()
            .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        if let Some(error) = find(&query, "error_description").or_else(|| find(&fragment, "error_description")) {
            return Err(AuthError::Redirect(error));
        }

        if let Some(code) = find(&query, "code") {
            if self.options.flow_type == FlowType::Pkce {
                return self.exchange_code_for_session(&code).await.map(Some);
            }
        }

        let Some(access_token) = find(&fragment, "access_token") else {
            return Ok(None);
        };
        let refresh_token = find(&fragment, "refresh_token").unwrap_or_default();
        let expires_in = find(&fragment, "expires_in")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or_default();
        let expires_at = find(&fragment, "expires_at").and_then(|v| v.parse::<i64>().ok());
        let token_type = find(&fragment, "token_type").unwrap_or_else(|| "bearer".to_string());

        let user = self.get_user(&access_token).await?;
        let session = Session {
            access_token,
            refresh_token,
            token_type,
            expires_in,
            expires_at,
            user,
        };
        Ok(Some(self.set_session(session)))
    }

    /// Refresh the session in the background shortly before it expires.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn spawn_auto_refresh(&self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.options.auto_refresh_token {
            return None;
        }
        let auth = self.clone();
        Some(tokio::spawn(async move {
            let tick = std::time::Duration::from_secs(AUTO_REFRESH_TICK_SECS);
            let margin = AUTO_REFRESH_TICK_SECS as i64 * AUTO_REFRESH_TICK_THRESHOLD;
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let Some(session) = auth.session.get() else {
                    continue;
                };
                if !session.expires_within(margin, Utc::now().timestamp()) {
                    continue;
                }
                if let Err(e) = auth.refresh_session().await {
                    crate::log_warn!("Auto-refresh failed: {}", e);
                }
            }
        }))
    }
}

fn find(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use mockito::Matcher;

    const USER_ID: &str = "3b0d3c3e-8a59-4f0e-9a43-1f6e3f1c2b10";

    fn options() -> AuthOptions {
        AuthOptions {
            persist_session: true,
            storage_key: "sb-test-auth-token".to_string(),
            flow_type: FlowType::Pkce,
            auto_refresh_token: false,
            detect_session_in_url: true,
        }
    }

    fn session_body(access: &str) -> String {
        json!({
            "access_token": access,
            "refresh_token": "r1",
            "token_type": "bearer",
            "expires_in": 3600,
            "user": { "id": USER_ID, "email": "ada@example.com" }
        })
        .to_string()
    }

    fn client(server: &mockito::ServerGuard, store: Arc<MemoryStore>) -> AuthClient {
        AuthClient::with_auth_url(
            format!("{}/auth/v1", server.url()),
            "anon",
            options(),
            SessionHandle::default(),
            store,
        )
    }

    #[tokio::test]
    async fn password_sign_in_sets_and_persists_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .match_body(Matcher::Json(json!({ "email": "ada@example.com", "password": "pw" })))
            .with_status(200)
            .with_body(session_body("a1"))
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let auth = client(&server, store.clone());
        let session = auth.sign_in_with_password("ada@example.com", "pw").await.unwrap();

        assert_eq!(session.access_token, "a1");
        assert!(session.expires_at.is_some());
        assert_eq!(auth.session().access_token().as_deref(), Some("a1"));
        assert!(store.get("sb-test-auth-token").is_some());
        mock.assert_async().await;

        // A fresh client restores it from storage.
        let restored = client(&server, store);
        assert_eq!(restored.restore_session().map(|s| s.access_token), Some("a1".to_string()));
    }

    #[tokio::test]
    async fn bad_credentials_surface_backend_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#)
            .create_async()
            .await;

        let auth = client(&server, Arc::new(MemoryStore::new()));
        let err = auth.sign_in_with_password("ada@example.com", "nope").await.unwrap_err();

        match err {
            AuthError::Api(api) => assert_eq!(api.user_message(), "Invalid login credentials"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!auth.session().is_authenticated());
    }

    #[tokio::test]
    async fn refresh_replaces_tokens() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .match_body(Matcher::Json(json!({ "refresh_token": "r0" })))
            .with_status(200)
            .with_body(session_body("a2"))
            .create_async()
            .await;

        let auth = client(&server, Arc::new(MemoryStore::new()));
        let mut old = test_session(USER_ID.parse().unwrap());
        old.refresh_token = "r0".to_string();
        auth.session().set(Some(old));

        let session = auth.refresh_session().await.unwrap();
        assert_eq!(session.access_token, "a2");
        assert_eq!(session.refresh_token, "r1");
    }

    #[tokio::test]
    async fn refresh_without_session_fails() {
        let server = mockito::Server::new_async().await;
        let auth = client(&server, Arc::new(MemoryStore::new()));
        assert!(matches!(auth.refresh_session().await, Err(AuthError::NoSession)));
    }

    #[tokio::test]
    async fn pkce_redirect_exchanges_code_with_stored_verifier() {
        let mut server = mockito::Server::new_async().await;
        let store = Arc::new(MemoryStore::new());
        let auth = client(&server, store.clone());

        let authorize = auth.authorize_url("github", "https://app.example/callback").unwrap();
        let verifier = store.get("sb-test-auth-token-code-verifier").unwrap();
        assert!(authorize.contains("provider=github"));
        assert!(authorize.contains(&format!("code_challenge={}", pkce::code_challenge(&verifier))));

        let mock = server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::UrlEncoded("grant_type".into(), "pkce".into()))
            .match_body(Matcher::Json(json!({ "auth_code": "abc", "code_verifier": verifier })))
            .with_status(200)
            .with_body(session_body("a3"))
            .create_async()
            .await;

        let session = auth
            .detect_session_in_url("https://app.example/callback?code=abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.access_token, "a3");
        assert!(store.get("sb-test-auth-token-code-verifier").is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn code_without_verifier_is_rejected() {
        let server = mockito::Server::new_async().await;
        let auth = client(&server, Arc::new(MemoryStore::new()));
        let err = auth
            .detect_session_in_url("https://app.example/callback?code=abc")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingCodeVerifier));
    }

    #[tokio::test]
    async fn implicit_fragment_builds_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/auth/v1/user")
            .match_header("authorization", "Bearer frag-token")
            .with_status(200)
            .with_body(json!({ "id": USER_ID, "email": "ada@example.com" }).to_string())
            .create_async()
            .await;

        let auth = client(&server, Arc::new(MemoryStore::new()));
        let session = auth
            .detect_session_in_url(
                "https://app.example/#access_token=frag-token&refresh_token=r9&expires_in=3600&token_type=bearer",
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(session.user.id.to_string(), USER_ID);
        assert_eq!(session.refresh_token, "r9");
    }

    #[tokio::test]
    async fn plain_landing_url_has_no_session() {
        let server = mockito::Server::new_async().await;
        let auth = client(&server, Arc::new(MemoryStore::new()));
        assert!(auth
            .detect_session_in_url("https://app.example/tools?page=2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn redirect_error_is_reported() {
        let server = mockito::Server::new_async().await;
        let auth = client(&server, Arc::new(MemoryStore::new()));
        let err = auth
            .detect_session_in_url("https://app.example/?error=access_denied&error_description=User+cancelled")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Redirect(msg) if msg == "User cancelled"));
    }

    #[tokio::test]
    async fn sign_out_clears_local_state_first() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/v1/logout")
            .with_status(204)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let auth = client(&server, store.clone());
        store.set("sb-test-auth-token", "{}");
        auth.session().set(Some(test_session(USER_ID.parse().unwrap())));

        auth.sign_out().await.unwrap();
        assert!(!auth.session().is_authenticated());
        assert!(store.get("sb-test-auth-token").is_none());
    }
}
