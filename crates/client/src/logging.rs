//! Cross-platform logging module.
//!
//! Provides unified logging macros that dispatch to the appropriate backend:
//! - Web: `web_sys::console`
//! - Desktop: `tracing` crate
//!
//! Third-party noise (browser extensions, benign resize-observer loops,
//! socket chatter during reconnects) is dropped by a [`SuppressionPolicy`]
//! before it reaches either backend. The policy is installed once with
//! [`init`] or [`set_suppression_policy`]; nothing else in the process is
//! patched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock};

/// Substring patterns whose messages are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionPolicy {
    patterns: Vec<String>,
}

impl SuppressionPolicy {
    /// A policy that lets everything through.
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn matches(&self, message: &str) -> bool {
        self.patterns.iter().any(|p| message.contains(p.as_str()))
    }
}

impl Default for SuppressionPolicy {
    fn default() -> Self {
        Self::none()
            .with_pattern("ResizeObserver loop")
            .with_pattern("chrome-extension://")
            .with_pattern("moz-extension://")
            .with_pattern("Non-Error promise rejection captured")
            .with_pattern("The message port closed before a response was received")
    }
}

/// Logging setup for [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is not set.
    pub default_filter: String,
    pub suppression: SuppressionPolicy,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: "toologist_client=info,tokio_tungstenite=warn,tungstenite=warn"
                .to_string(),
            suppression: SuppressionPolicy::default(),
        }
    }
}

fn policy_cell() -> &'static RwLock<SuppressionPolicy> {
    static POLICY: OnceLock<RwLock<SuppressionPolicy>> = OnceLock::new();
    POLICY.get_or_init(|| RwLock::new(SuppressionPolicy::default()))
}

static SUPPRESSED: AtomicUsize = AtomicUsize::new(0);

/// Replace the active suppression policy.
pub fn set_suppression_policy(policy: SuppressionPolicy) {
    if let Ok(mut current) = policy_cell().write() {
        *current = policy;
    }
}

/// Number of messages dropped by the suppression policy so far.
pub fn suppressed_count() -> usize {
    SUPPRESSED.load(Ordering::Relaxed)
}

/// Returns `true` (and counts the message) when it should be dropped.
pub fn is_suppressed(msg: &str) -> bool {
    let suppressed = policy_cell()
        .read()
        .map(|policy| policy.matches(msg))
        .unwrap_or(false);
    if suppressed {
        SUPPRESSED.fetch_add(1, Ordering::Relaxed);
    }
    suppressed
}

/// Install the logging backend and suppression policy.
#[cfg(not(target_arch = "wasm32"))]
pub fn init(config: LogConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    set_suppression_policy(config.suppression);

    // A second init (tests, embedding apps) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(target_arch = "wasm32")]
pub fn init(config: LogConfig) {
    set_suppression_policy(config.suppression);
}

/// Log an info message (platform-specific)
#[cfg(target_arch = "wasm32")]
pub fn log_info_impl(msg: &str) {
    if !is_suppressed(msg) {
        web_sys::console::log_1(&msg.into());
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn log_info_impl(msg: &str) {
    if !is_suppressed(msg) {
        tracing::info!("{}", msg);
    }
}

/// Log an error message (platform-specific)
#[cfg(target_arch = "wasm32")]
pub fn log_error_impl(msg: &str) {
    if !is_suppressed(msg) {
        web_sys::console::error_1(&msg.into());
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn log_error_impl(msg: &str) {
    if !is_suppressed(msg) {
        tracing::error!("{}", msg);
    }
}

/// Log a warning message (platform-specific)
#[cfg(target_arch = "wasm32")]
pub fn log_warn_impl(msg: &str) {
    if !is_suppressed(msg) {
        web_sys::console::warn_1(&msg.into());
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn log_warn_impl(msg: &str) {
    if !is_suppressed(msg) {
        tracing::warn!("{}", msg);
    }
}

/// Log a debug message (platform-specific)
#[cfg(target_arch = "wasm32")]
pub fn log_debug_impl(msg: &str) {
    if !is_suppressed(msg) {
        web_sys::console::debug_1(&msg.into());
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn log_debug_impl(msg: &str) {
    if !is_suppressed(msg) {
        tracing::debug!("{}", msg);
    }
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_drops_extension_noise() {
        let policy = SuppressionPolicy::default();
        assert!(policy.matches("Uncaught error in chrome-extension://abc/content.js"));
        assert!(!policy.matches("Failed to load tools: HTTP 500"));
    }

    #[test]
    fn empty_policy_drops_nothing() {
        assert!(!SuppressionPolicy::none().matches("ResizeObserver loop limit exceeded"));
    }

    #[test]
    fn suppressed_messages_are_counted() {
        // The global policy is shared with other tests; only the default
        // patterns are relied on here.
        let before = suppressed_count();
        assert!(is_suppressed("ResizeObserver loop completed with undelivered notifications"));
        assert!(suppressed_count() > before);
    }
}
