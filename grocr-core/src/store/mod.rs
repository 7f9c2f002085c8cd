//! Remote tree store abstraction.
//!
//! Both the List Synchronizer and the Presence Tracker talk to the store only
//! through [`RemoteStore`]:
//! - `set`/`update`/`remove` write through to the authoritative tree
//! - `on_disconnect_remove` registers a removal the store runs when this
//!   client's connection closes
//! - `subscribe` delivers the full value at a path, first the current state
//!   and then once per change
//!
//! Two implementations are provided: [`MemoryStore`] (an in-process hub, also
//! used by the server) and [`WsStore`] (a WebSocket client for the server).

mod memory;
mod ws;

use std::future::Future;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::path::StorePath;
use crate::snapshot::{Query, Snapshot};

pub use memory::{MemoryConnection, MemoryStore};
pub use ws::WsStore;

/// A subscribe/write key-path tree store.
pub trait RemoteStore: Send + Sync + 'static {
    /// Replaces the value at `path`. `null` removes it.
    fn set(
        &self,
        path: &StorePath,
        value: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Replaces only the listed children of `path`.
    fn update(
        &self,
        path: &StorePath,
        fields: Map<String, Value>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes the subtree at `path`.
    fn remove(&self, path: &StorePath) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Asks the store to remove `path` once this connection closes.
    fn on_disconnect_remove(
        &self,
        path: &StorePath,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Registers a continuous value subscription.
    fn subscribe(
        &self,
        query: Query,
    ) -> impl Future<Output = Result<Subscription, StoreError>> + Send;
}

/// Receiving end of a store subscription.
///
/// Dropping it deregisters the listener with the store.
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Snapshot>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        receiver: mpsc::UnboundedReceiver<Snapshot>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            receiver,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next delivery. `None` once the store has dropped the
    /// listener (e.g. the connection closed).
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.receiver.recv().await
    }

    /// Returns a delivery if one is already queued.
    pub fn try_next(&mut self) -> Option<Snapshot> {
        self.receiver.try_recv().ok()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}
