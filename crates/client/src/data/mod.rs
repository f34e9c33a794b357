//! Entity stores and the mutations that write through them.
//!
//! Every store keeps its rows in a [`Resource`], a cache of the last
//! successful read. Reads never return errors to the caller: failures keep
//! the previous rows, record the error on the resource and raise an error
//! notice. Mutations report an [`Outcome`] and re-fetch the owning store on
//! success instead of patching rows locally.

mod categories;
mod collections;
mod favorites;
mod profiles;
mod reviews;
mod stats;
mod tools;
mod wallet;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use toologist_shared::ApiError;
use uuid::Uuid;

use crate::auth::SessionHandle;
use crate::backend::{decode_rows, encode_row, Backend, Query};
use crate::notify::{Notice, Notifier};
use crate::resource::{ApplyOutcome, FetchTicket, Resource};

pub use categories::CategoriesStore;
pub use collections::CollectionsStore;
pub use favorites::FavoritesStore;
pub use profiles::ProfileStore;
pub use reviews::{ReviewDraft, ReviewsStore};
pub use stats::StatsStore;
pub use tools::{ToolsStore, MIN_SEARCH_CHARS};
pub use wallet::{WalletEntry, WalletStore, WalletSummary, ENDING_SOON_DAYS};

/// Result of a mutation. Mutations never fail with `Err`; anything the
/// user needs to know has already been sent as a notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// The row was already there; nothing changed.
    AlreadyExists,
    /// No signed-in user; no request was made.
    SignInRequired,
    /// No row matched, or the matching row belongs to someone else;
    /// nothing changed.
    NotFound,
    /// Input rejected before any request was made.
    Invalid(String),
    Failed(String),
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done)
    }
}

/// What every store needs: the backend, the current session and somewhere
/// to send notices.
#[derive(Clone)]
pub struct DataContext {
    backend: Arc<dyn Backend>,
    session: SessionHandle,
    notifier: Arc<dyn Notifier>,
}

impl DataContext {
    pub fn new(backend: Arc<dyn Backend>, session: SessionHandle, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            backend,
            session,
            notifier,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub(crate) fn notify(&self, notice: Notice) {
        self.notifier.notify(notice);
    }

    /// The signed-in user's id, or a sign-in prompt.
    pub(crate) fn require_user(&self, action: &str) -> Result<Uuid, Outcome> {
        match self.session.user_id() {
            Some(id) => Ok(id),
            None => {
                crate::log_debug!("Blocked '{}' without a signed-in user", action);
                self.notify(Notice::info(format!("Please sign in to {action}.")));
                Err(Outcome::SignInRequired)
            }
        }
    }

    pub(crate) fn invalid(&self, message: &str) -> Outcome {
        self.notify(Notice::error(message));
        Outcome::Invalid(message.to_string())
    }

    async fn select<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, ApiError> {
        let rows = self.backend.select(query).await?;
        decode_rows(rows)
    }

    /// Load `query` into `resource`, replacing its rows wholesale.
    pub(crate) async fn fetch_rows<T>(
        &self,
        resource: &Resource<Vec<T>>,
        query: Query,
        what: &str,
    ) -> ApplyOutcome
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let ticket = resource.begin();
        let result = self.select::<T>(&query).await;
        self.settle_fetch(resource, ticket, result, what)
    }

    /// Load the first row matching `query` into `resource`.
    pub(crate) async fn fetch_first<T>(
        &self,
        resource: &Resource<Option<T>>,
        query: Query,
        what: &str,
    ) -> ApplyOutcome
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let ticket = resource.begin();
        let result = self
            .select::<T>(&query.limit(1))
            .await
            .map(|rows| rows.into_iter().next());
        self.settle_fetch(resource, ticket, result, what)
    }

    fn settle_fetch<T: Clone + Default + Send + Sync + 'static>(
        &self,
        resource: &Resource<T>,
        ticket: FetchTicket,
        result: Result<T, ApiError>,
        what: &str,
    ) -> ApplyOutcome {
        if let Err(e) = &result {
            crate::log_error!("Failed to load {}: {}", what, e);
        }
        let outcome = resource.finish(ticket, result.map_err(|e| e.user_message()));
        match &outcome {
            ApplyOutcome::Applied => {}
            ApplyOutcome::Stale => {
                crate::log_debug!("Dropped stale {} result (fetch #{})", what, ticket.seq());
            }
            ApplyOutcome::Failed(message) => {
                self.notify(Notice::error(format!("Failed to load {what}: {message}")));
            }
        }
        outcome
    }

    pub(crate) async fn insert<T: Serialize>(&self, table: &str, row: &T) -> Result<(), ApiError> {
        let row = encode_row(row)?;
        self.backend.insert(table, row).await.map(|_| ())
    }

    /// Number of rows changed. Rows the user may not write to are not
    /// counted.
    pub(crate) async fn update<T: Serialize>(
        &self,
        query: &Query,
        patch: &T,
    ) -> Result<usize, ApiError> {
        let patch = encode_row(patch)?;
        self.backend.update(query, patch).await.map(|rows| rows.len())
    }

    pub(crate) async fn delete(&self, query: &Query) -> Result<usize, ApiError> {
        self.backend.delete(query).await.map(|rows| rows.len())
    }

    /// Like [`settle_write`](Self::settle_write) for updates and deletes,
    /// where zero affected rows means the target is gone or not the user's.
    pub(crate) fn settle_change(
        &self,
        result: Result<usize, ApiError>,
        action: &str,
        success: &str,
    ) -> Outcome {
        match result {
            Ok(0) => {
                crate::log_info!("{}: no matching row", action);
                self.notify(Notice::info(format!(
                    "Could not {action}: it no longer exists or is not yours."
                )));
                Outcome::NotFound
            }
            other => self.settle_write(other.map(|_| ()), action, success, None),
        }
    }

    /// Turn a write result into an [`Outcome`] and the matching notice.
    ///
    /// `duplicate` is the message shown when the row already exists; without
    /// it a unique violation is an ordinary failure.
    pub(crate) fn settle_write(
        &self,
        result: Result<(), ApiError>,
        action: &str,
        success: &str,
        duplicate: Option<&str>,
    ) -> Outcome {
        match result {
            Ok(()) => {
                self.notify(Notice::success(success));
                Outcome::Done
            }
            Err(e) => match duplicate {
                Some(message) if e.is_unique_violation() => {
                    crate::log_info!("{}: row already exists", action);
                    self.notify(Notice::info(message));
                    Outcome::AlreadyExists
                }
                _ => {
                    crate::log_error!("Failed to {}: {}", action, e);
                    let message = e.user_message();
                    self.notify(Notice::error(format!("Failed to {action}: {message}")));
                    Outcome::Failed(message)
                }
            },
        }
    }
}

impl std::fmt::Debug for DataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContext")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
