//! Toologist Client - data sync layer for the AI Toologist directory
//!
//! This crate binds the directory's UI to its backend: table reads into
//! observable stores, writes that re-sync those stores, sign-in, and
//! realtime channels (row change feeds, presence, broadcast).

pub mod auth;
pub mod backend;
pub mod config;
pub mod data;
pub mod logging;
pub mod notify;
pub mod realtime;
pub mod resource;
pub mod storage;

#[cfg(feature = "ui")]
pub mod hooks;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(not(target_arch = "wasm32"))]
use std::sync::Arc;

pub use auth::{AuthClient, AuthError, Session, SessionHandle};
pub use backend::{Backend, Query, RestBackend};
pub use config::{AuthOptions, ClientConfig, ConfigError, FlowType};
pub use data::{
    CategoriesStore, CollectionsStore, DataContext, FavoritesStore, Outcome, ProfileStore,
    ReviewsStore, StatsStore, ToolsStore, WalletStore,
};
pub use notify::{Notice, NoticeLevel, Notifier};
pub use realtime::{ChannelSubscription, RealtimeClient, RealtimeError};
pub use resource::{ApplyPolicy, Resource};

#[cfg(not(target_arch = "wasm32"))]
use notify::LogNotifier;
#[cfg(not(target_arch = "wasm32"))]
use storage::{KeyValueStore, PlatformStore};

/// The one connection to the backend a process holds: REST, auth and the
/// realtime socket over a shared session.
#[derive(Clone)]
pub struct Toologist {
    config: ClientConfig,
    auth: AuthClient,
    realtime: RealtimeClient,
    data: DataContext,
}

impl Toologist {
    /// Connect with platform storage for the session and notices going to
    /// the log.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn connect(config: ClientConfig) -> Self {
        Self::connect_with(config, Arc::new(PlatformStore), Arc::new(LogNotifier))
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn connect_with(
        config: ClientConfig,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let session = SessionHandle::default();
        let auth = AuthClient::new(&config, session.clone(), store);
        auth.restore_session();
        if auth.spawn_auto_refresh().is_some() {
            crate::log_debug!("Session auto-refresh started");
        }

        let backend: Arc<dyn Backend> = Arc::new(RestBackend::new(&config, session.clone()));
        let realtime = RealtimeClient::connect(&config, session.clone());
        let data = DataContext::new(backend, session, notifier);

        crate::log_info!("Connected to {}", config.supabase_url);
        Self {
            config,
            auth,
            realtime,
            data,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    pub fn data(&self) -> &DataContext {
        &self.data
    }

    pub fn session(&self) -> &SessionHandle {
        self.data.session()
    }

    pub fn tools(&self) -> ToolsStore {
        ToolsStore::new(self.data.clone())
    }

    pub fn categories(&self) -> CategoriesStore {
        CategoriesStore::new(self.data.clone())
    }

    pub fn reviews(&self) -> ReviewsStore {
        ReviewsStore::new(self.data.clone())
    }

    pub fn favorites(&self) -> FavoritesStore {
        FavoritesStore::new(self.data.clone())
    }

    pub fn collections(&self) -> CollectionsStore {
        CollectionsStore::new(self.data.clone())
    }

    pub fn wallet(&self) -> WalletStore {
        WalletStore::new(self.data.clone())
    }

    pub fn stats(&self) -> StatsStore {
        StatsStore::new(self.data.clone())
    }

    pub fn profile(&self) -> ProfileStore {
        ProfileStore::new(self.data.clone())
    }
}

impl std::fmt::Debug for Toologist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toologist")
            .field("url", &self.config.supabase_url.as_str())
            .field("realtime", &self.realtime)
            .finish()
    }
}
