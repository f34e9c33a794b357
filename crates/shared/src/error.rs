//! API error type shared by the REST backend and the data stores.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Postgres SQLSTATE for `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Error envelope returned by PostgREST and the auth service.
///
/// PostgREST uses `code`/`message`/`details`/`hint`; the auth service uses
/// `error`/`error_description` or `msg`, so everything is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl ErrorBody {
    fn summary(&self) -> Option<String> {
        [&self.message, &self.error_description, &self.msg, &self.error]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .cloned()
    }
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    #[error("{message} (code {code}, HTTP {status})")]
    Backend {
        status: u16,
        code: String,
        message: String,
        details: Option<String>,
    },
}

impl ApiError {
    /// Build the error for a non-success response, preferring the structured
    /// backend envelope when the body parses as one.
    pub fn from_response(status: u16, body: String) -> Self {
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => match parsed.summary() {
                Some(message) => ApiError::Backend {
                    status,
                    code: parsed.code.unwrap_or_default(),
                    message,
                    details: parsed.details,
                },
                None => ApiError::Http { status, body },
            },
            Err(_) => ApiError::Http { status, body },
        }
    }

    /// Whether a write failed because the row already exists.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            ApiError::Backend {
                status,
                code,
                message,
                ..
            } => {
                code == UNIQUE_VIOLATION
                    || (code.is_empty() && *status == 409)
                    || message.to_lowercase().contains("duplicate key")
            }
            ApiError::Http { status, body } => {
                *status == 409 || body.to_lowercase().contains("duplicate key")
            }
            _ => false,
        }
    }

    /// Short message suitable for a notification.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => "Could not reach the server. Check your connection.".to_string(),
            ApiError::Http { status, .. } if *status == 401 || *status == 403 => {
                "You don't have permission to do that.".to_string()
            }
            ApiError::Http { status, .. } => format!("The server returned an error ({status})."),
            ApiError::Deserialize(_) => "Received an unexpected response from the server.".to_string(),
            ApiError::Backend { message, .. } => message.clone(),
        }
    }
}
