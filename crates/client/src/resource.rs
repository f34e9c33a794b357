//! Observable cache of the last successful read.
//!
//! A [`Resource`] holds one fetched value (a list of rows, or a single
//! optional row) plus loading/error flags. Every fetch takes a ticket from
//! [`Resource::begin`] and hands its result to [`Resource::finish`]; the
//! ticket's sequence number decides whether a late result still applies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// What to do with a result that resolves after a newer one was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyPolicy {
    /// Drop results older than the latest applied one.
    #[default]
    LatestIssued,
    /// Apply every result as it resolves, so the slowest request wins.
    LastResolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<T> {
    pub data: T,
    pub loading: bool,
    pub error: Option<String>,
    /// Sequence number of the fetch whose result is in `data`/`error`.
    pub applied_seq: u64,
}

impl<T: Default> Default for ResourceState<T> {
    fn default() -> Self {
        Self {
            data: T::default(),
            loading: false,
            error: None,
            applied_seq: 0,
        }
    }
}

/// Handle for one issued fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    seq: u64,
}

impl FetchTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A newer result was already applied; this one was dropped.
    Stale,
    /// The fetch failed; previous data is kept.
    Failed(String),
}

struct Shared<T> {
    state: watch::Sender<ResourceState<T>>,
    issued: AtomicU64,
    settled: AtomicU64,
    policy: ApplyPolicy,
}

/// Cloneable handle; clones share state.
pub struct Resource<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Default + Send + Sync + 'static> Resource<T> {
    pub fn new(policy: ApplyPolicy) -> Self {
        let (state, _) = watch::channel(ResourceState::default());
        Self {
            shared: Arc::new(Shared {
                state,
                issued: AtomicU64::new(0),
                settled: AtomicU64::new(0),
                policy,
            }),
        }
    }

    pub fn policy(&self) -> ApplyPolicy {
        self.shared.policy
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> ResourceState<T> {
        self.shared.state.borrow().clone()
    }

    pub fn data(&self) -> T {
        self.shared.state.borrow().data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.shared.state.borrow().error.clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
        self.shared.state.subscribe()
    }

    /// Register a new fetch and raise the loading flag.
    pub fn begin(&self) -> FetchTicket {
        let seq = self.shared.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.state.send_modify(|state| state.loading = true);
        FetchTicket { seq }
    }

    /// Apply a fetch result. Success replaces `data` wholesale; failure keeps
    /// it and records the error.
    pub fn finish<E: std::fmt::Display>(
        &self,
        ticket: FetchTicket,
        result: Result<T, E>,
    ) -> ApplyOutcome {
        self.shared.settled.fetch_max(ticket.seq, Ordering::SeqCst);
        let still_loading =
            self.shared.settled.load(Ordering::SeqCst) < self.shared.issued.load(Ordering::SeqCst);

        let mut outcome = ApplyOutcome::Applied;
        let policy = self.shared.policy;
        self.shared.state.send_modify(|state| {
            state.loading = still_loading;
            if policy == ApplyPolicy::LatestIssued && ticket.seq < state.applied_seq {
                outcome = ApplyOutcome::Stale;
                return;
            }
            state.applied_seq = ticket.seq;
            match result {
                Ok(data) => {
                    state.data = data;
                    state.error = None;
                }
                Err(e) => {
                    let message = e.to_string();
                    state.error = Some(message.clone());
                    outcome = ApplyOutcome::Failed(message);
                }
            }
        });
        outcome
    }

    /// Settle a fetch that needs no request, such as a gated search or a
    /// signed-out listing. Takes a ticket like any fetch, so results of
    /// requests issued before it are stale.
    pub fn resolve(&self, data: T) -> ApplyOutcome {
        let ticket = self.begin();
        self.finish::<std::convert::Infallible>(ticket, Ok(data))
    }

    /// Edit `data` in place.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.shared.state.send_modify(|state| f(&mut state.data));
    }
}

impl<T: Clone + Default + Send + Sync + 'static> Default for Resource<T> {
    fn default() -> Self {
        Self::new(ApplyPolicy::default())
    }
}
