//! Presence Tracker.
//!
//! Records the signed-in user under `online/{uid}` and leaves its removal to
//! the store: the on-disconnect directive is registered before the record is
//! written, so the record never exists without its cleanup.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use super::ListenerHandle;
use crate::error::{Error, Result};
use crate::models::User;
use crate::path::StorePath;
use crate::snapshot::Query;
use crate::store::RemoteStore;

/// Store path of the presence root.
pub const PRESENCE_PATH: &str = "online";

/// [`PRESENCE_PATH`] as a store path.
pub fn presence_root() -> StorePath {
    StorePath::parse(PRESENCE_PATH).expect("PRESENCE_PATH is a valid store path")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceState {
    Unauthenticated,
    /// A presence record was written for `uid`.
    Present { uid: String },
}

/// Tracks the current user's presence record and the live count of
/// connected users.
pub struct PresenceTracker<S> {
    store: Arc<S>,
    root: StorePath,
    count: Arc<watch::Sender<usize>>,
    state: Arc<watch::Sender<PresenceState>>,
}

impl<S> Clone for PresenceTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            root: self.root.clone(),
            count: Arc::clone(&self.count),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: RemoteStore> PresenceTracker<S> {
    pub fn new(store: Arc<S>) -> Self {
        let (count, _) = watch::channel(0);
        let (state, _) = watch::channel(PresenceState::Unauthenticated);
        Self {
            store,
            root: presence_root(),
            count: Arc::new(count),
            state: Arc::new(state),
        }
    }

    /// Writes `online/{uid} = email` with a remove-on-disconnect directive.
    pub async fn on_identity_resolved(&self, user: &User) -> Result<()> {
        if user.uid.is_empty() {
            return Err(Error::invalid_input("user id must not be empty"));
        }
        let path = self
            .root
            .child(&user.uid)
            .map_err(|e| Error::invalid_input(e.to_string()))?;

        self.store.on_disconnect_remove(&path).await?;
        self.store
            .set(&path, Value::String(user.email.clone()))
            .await?;

        self.state.send_replace(PresenceState::Present {
            uid: user.uid.clone(),
        });
        tracing::info!("Recorded presence for {}", user.email);
        Ok(())
    }

    /// Subscribes to the presence root; `on_update` receives the number of
    /// users present (0 when nobody is).
    pub async fn subscribe_count<F>(&self, mut on_update: F) -> Result<ListenerHandle>
    where
        F: FnMut(usize) + Send + 'static,
    {
        let mut subscription = self.store.subscribe(Query::new(self.root.clone())).await?;
        let count = Arc::clone(&self.count);

        let task = tokio::spawn(async move {
            while let Some(delivery) = subscription.next().await {
                let present = if delivery.exists() {
                    delivery.children_count()
                } else {
                    0
                };
                tracing::debug!("{} user(s) online", present);
                count.send_replace(present);
                on_update(present);
            }
        });

        Ok(ListenerHandle::new(task))
    }

    /// Records presence every time `auth_state` resolves a user.
    ///
    /// Failures are logged; the tracker keeps following later changes.
    pub fn follow(&self, mut auth_state: watch::Receiver<Option<User>>) -> ListenerHandle {
        let tracker = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let user = auth_state.borrow_and_update().clone();
                match user {
                    Some(user) => {
                        if let Err(e) = tracker.on_identity_resolved(&user).await {
                            tracing::warn!("Failed to record presence for {}: {}", user.email, e);
                        }
                    }
                    None => {
                        tracker.state.send_replace(PresenceState::Unauthenticated);
                    }
                }
                if auth_state.changed().await.is_err() {
                    break;
                }
            }
        });
        ListenerHandle::new(task)
    }

    /// The last delivered count.
    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub fn watch_count(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    pub fn state(&self) -> PresenceState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<PresenceState> {
        self.state.subscribe()
    }
}
