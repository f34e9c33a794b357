//! Dioxus hooks over the stores and realtime handles.
//!
//! Components read store state through signals mirrored from each
//! [`Resource`]; subscriptions opened with [`use_channel`] are released when
//! the component unmounts.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use dioxus::prelude::*;

use crate::realtime::{ConnectionState, RealtimeClient, RealtimeError};
use crate::resource::{ApplyOutcome, Resource, ResourceState};

/// Mirror `resource` into a signal for as long as the component lives.
pub fn use_resource_state<T>(resource: &Resource<T>) -> Signal<ResourceState<T>>
where
    T: Clone + Default + Send + Sync + 'static,
{
    let mut state = use_signal(|| resource.snapshot());
    let resource = resource.clone();
    use_hook(move || {
        let mut changes = resource.subscribe();
        spawn(async move {
            while changes.changed().await.is_ok() {
                let next = changes.borrow_and_update().clone();
                state.set(next);
            }
        });
    });
    state
}

/// Create a store once per component and run its mount fetch.
///
/// ```rust,ignore
/// let tools = use_store(|| app.tools(), |store| async move { store.fetch_all().await });
/// let state = use_resource_state(tools.tools());
/// ```
pub fn use_store<S, F, Fut>(create: impl FnOnce() -> S, fetch: F) -> S
where
    S: Clone + 'static,
    F: FnOnce(S) -> Fut + 'static,
    Fut: Future<Output = ApplyOutcome> + 'static,
{
    use_hook(move || {
        let store = create();
        let for_fetch = store.clone();
        spawn(async move {
            fetch(for_fetch).await;
        });
        store
    })
}

/// Open a realtime channel on mount and leave it on unmount.
///
/// Returns `None` inside the cell when the channel could not be opened; the
/// failure is logged.
pub fn use_channel<S: 'static>(
    open: impl FnOnce() -> Result<S, RealtimeError>,
) -> Rc<RefCell<Option<S>>> {
    let holder = use_hook(move || {
        let channel = match open() {
            Ok(channel) => Some(channel),
            Err(e) => {
                crate::log_warn!("Could not open channel: {}", e);
                None
            }
        };
        Rc::new(RefCell::new(channel))
    });

    let on_unmount = holder.clone();
    use_drop(move || {
        on_unmount.borrow_mut().take();
    });
    holder
}

/// Realtime socket state (reactive - updates when state changes).
pub fn use_connection_state(realtime: &RealtimeClient) -> Signal<ConnectionState> {
    let mut state = use_signal(|| realtime.connection_state());
    let realtime = realtime.clone();
    use_hook(move || {
        let mut changes = realtime.connection_changes();
        spawn(async move {
            while changes.changed().await.is_ok() {
                let next = changes.borrow_and_update().clone();
                state.set(next);
            }
        });
    });
    state
}
