//! Cross-platform storage module.
//!
//! Provides a unified API for persistent storage:
//! - Web: `localStorage`
//! - Desktop: JSON files in the platform-appropriate config directory:
//!   - Linux: `~/.config/toologist/`
//!   - macOS: `~/Library/Application Support/toologist/`
//!   - Windows: `%APPDATA%\toologist\`
//!
//! The session manager talks to storage through [`KeyValueStore`] so tests
//! and embedding apps can swap in [`MemoryStore`].

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};

/// Raw string storage keyed by name.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    /// Returns `true` if the operation succeeded.
    fn set(&self, key: &str, value: &str) -> bool;
    fn remove(&self, key: &str);
}

/// Save a value to persistent storage.
///
/// Returns `true` if the operation succeeded.
pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => store.set(key, &json),
        Err(_) => false,
    }
}

/// Load a value from persistent storage.
///
/// Returns `None` if the key doesn't exist or deserialization fails.
pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let json = store.get(key)?;
    serde_json::from_str(&json).ok()
}

/// Platform storage: `localStorage` on web, config-dir files on desktop.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformStore;

impl KeyValueStore for PlatformStore {
    fn get(&self, key: &str) -> Option<String> {
        load_raw(key)
    }

    fn set(&self, key: &str, value: &str) -> bool {
        save_raw(key, value)
    }

    fn remove(&self, key: &str) {
        remove_raw(key)
    }
}

/// In-process storage that is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        match self.values.lock() {
            Ok(mut values) => {
                values.insert(key.to_string(), value.to_string());
                true
            }
            Err(_) => false,
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key);
        }
    }
}

// =========================================
// Web (WASM) implementation
// =========================================

#[cfg(target_arch = "wasm32")]
fn save_raw(key: &str, value: &str) -> bool {
    if let Some(window) = web_sys::window() {
        if let Ok(Some(storage)) = window.local_storage() {
            return storage.set_item(key, value).is_ok();
        }
    }
    false
}

#[cfg(target_arch = "wasm32")]
fn load_raw(key: &str) -> Option<String> {
    let window = web_sys::window()?;
    let storage = window.local_storage().ok()??;
    storage.get_item(key).ok()?
}

#[cfg(target_arch = "wasm32")]
fn remove_raw(key: &str) {
    if let Some(window) = web_sys::window() {
        if let Ok(Some(storage)) = window.local_storage() {
            let _ = storage.remove_item(key);
        }
    }
}

// =========================================
// Desktop (native) implementation
// =========================================

#[cfg(not(target_arch = "wasm32"))]
fn get_config_dir() -> Option<std::path::PathBuf> {
    let config_dir = dirs::config_dir()?;
    let app_dir = config_dir.join("toologist");

    if !app_dir.exists() {
        std::fs::create_dir_all(&app_dir).ok()?;
    }

    Some(app_dir)
}

#[cfg(not(target_arch = "wasm32"))]
fn get_file_path(key: &str) -> Option<std::path::PathBuf> {
    let config_dir = get_config_dir()?;
    Some(config_dir.join(format!("{}.json", sanitize_key(key))))
}

/// Map a storage key onto a valid file name.
#[cfg(not(target_arch = "wasm32"))]
fn sanitize_key(key: &str) -> String {
    key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}

#[cfg(not(target_arch = "wasm32"))]
fn save_raw(key: &str, value: &str) -> bool {
    let Some(path) = get_file_path(key) else {
        return false;
    };
    std::fs::write(path, value).is_ok()
}

#[cfg(not(target_arch = "wasm32"))]
fn load_raw(key: &str) -> Option<String> {
    let path = get_file_path(key)?;
    std::fs::read_to_string(path).ok()
}

#[cfg(not(target_arch = "wasm32"))]
fn remove_raw(key: &str) {
    if let Some(path) = get_file_path(key) {
        let _ = std::fs::remove_file(path);
    }
}
