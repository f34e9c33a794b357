//! Connection configuration.
//!
//! Configuration is always supplied explicitly. [`ClientConfig::from_env`] is a
//! convenience for binaries and fails when a variable is missing; there are no
//! built-in fallback endpoints or keys.

use thiserror::Error;
use url::Url;

use crate::realtime::ReconnectConfig;

pub const ENV_SUPABASE_URL: &str = "TOOLOGIST_SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "TOOLOGIST_SUPABASE_ANON_KEY";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for environment variable {var}: {reason}")]
    InvalidEnvValue { var: String, reason: String },
    #[error("Invalid backend URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// How an OAuth or magic-link sign-in hands the session back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowType {
    /// `?code=` in the redirect, exchanged with the stored code verifier.
    #[default]
    Pkce,
    /// Tokens in the redirect fragment.
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOptions {
    /// Save the session under `storage_key` and restore it on startup.
    pub persist_session: bool,
    pub storage_key: String,
    pub flow_type: FlowType,
    /// Refresh the access token in the background before it expires.
    pub auto_refresh_token: bool,
    /// Complete redirect-based sign-ins from the landing URL.
    pub detect_session_in_url: bool,
}

/// Backend binding settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub supabase_url: Url,
    pub anon_key: String,
    pub auth: AuthOptions,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    /// Build a config with the standard auth options for this backend.
    pub fn new(supabase_url: &str, anon_key: impl Into<String>) -> Result<Self, ConfigError> {
        let url = Url::parse(supabase_url).map_err(|e| ConfigError::InvalidUrl {
            url: supabase_url.to_string(),
            reason: e.to_string(),
        })?;
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl {
                url: supabase_url.to_string(),
                reason: "missing host".to_string(),
            });
        }

        let anon_key = anon_key.into();
        let storage_key = default_storage_key(&url);

        Ok(Self {
            supabase_url: url,
            anon_key,
            auth: AuthOptions {
                persist_session: true,
                storage_key,
                flow_type: FlowType::Pkce,
                auto_refresh_token: true,
                detect_session_in_url: true,
            },
            reconnect: ReconnectConfig::default(),
        })
    }

    /// Read the config from the environment.
    ///
    /// Environment variables:
    /// - `TOOLOGIST_SUPABASE_URL`: backend URL (required)
    /// - `TOOLOGIST_SUPABASE_ANON_KEY`: public API key (required)
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = required_env(ENV_SUPABASE_URL)?;
        let key = required_env(ENV_SUPABASE_ANON_KEY)?;
        Self::new(&url, key).map_err(|e| ConfigError::InvalidEnvValue {
            var: ENV_SUPABASE_URL.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn with_auth(mut self, auth: AuthOptions) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// First label of the backend host, e.g. `abcd` for `abcd.supabase.co`.
    pub fn project_ref(&self) -> String {
        project_ref(&self.supabase_url)
    }

    pub fn rest_url(&self) -> String {
        self.endpoint("rest/v1")
    }

    pub fn auth_url(&self) -> String {
        self.endpoint("auth/v1")
    }

    /// WebSocket URL of the realtime service, including the API key.
    pub fn realtime_url(&self) -> String {
        let mut url = self.supabase_url.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // Both are special schemes, so the switch always succeeds.
        let _ = url.set_scheme(scheme);
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        url.to_string()
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.supabase_url.as_str().trim_end_matches('/');
        format!("{base}/{path}")
    }
}

fn required_env(var: &str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Ok(_) => Err(ConfigError::InvalidEnvValue {
            var: var.to_string(),
            reason: "value is empty".to_string(),
        }),
        Err(_) => Err(ConfigError::MissingEnvVar(var.to_string())),
    }
}

fn project_ref(url: &Url) -> String {
    url.host_str()
        .and_then(|host| host.split('.').next())
        .unwrap_or_default()
        .to_string()
}

/// `sb-{project_ref}-auth-token`
pub fn default_storage_key(url: &Url) -> String {
    format!("sb-{}-auth-token", project_ref(url))
}
