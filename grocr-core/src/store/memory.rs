//! In-process realtime tree hub.
//!
//! A [`MemoryStore`] owns the authoritative [`Tree`] and fans changes out to
//! every listener whose path overlaps a write. Each client talks to it
//! through its own [`MemoryConnection`]; closing a connection runs the
//! on-disconnect directives that client registered.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};

use super::{RemoteStore, Subscription};
use crate::error::StoreError;
use crate::path::{validate_key, StorePath};
use crate::snapshot::{Query, Snapshot};
use crate::tree::Tree;

struct Listener {
    connection: u64,
    query: Query,
    /// Last value delivered; deliveries only happen when this changes.
    last: Value,
    sender: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Default)]
struct HubState {
    tree: Tree,
    listeners: HashMap<u64, Listener>,
    on_disconnect: HashMap<u64, Vec<StorePath>>,
    connections: HashSet<u64>,
    next_id: u64,
}

impl HubState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Delivers a fresh snapshot to every listener affected by a write at
    /// `changed`. Listeners whose receiver is gone are dropped.
    fn fan_out(&mut self, changed: &StorePath) {
        let tree = &self.tree;
        self.listeners.retain(|id, listener| {
            if listener.sender.is_closed() {
                tracing::debug!("Dropping closed listener {}", id);
                return false;
            }
            if !listener.query.path.overlaps(changed) {
                return true;
            }
            let value = tree.value(&listener.query.path);
            if value == listener.last {
                return true;
            }
            listener.last = value.clone();
            let snapshot = Snapshot::new(
                listener.query.path.clone(),
                value,
                listener.query.order_by.clone(),
            );
            listener.sender.send(snapshot).is_ok()
        });
    }
}

/// Shared in-memory tree with per-connection on-disconnect cleanup.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<HubState>>,
    changes: broadcast::Sender<StorePath>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::from_tree(Tree::new())
    }

    /// Creates a store seeded with `tree` (e.g. loaded from disk).
    pub fn from_tree(tree: Tree) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(HubState {
                tree,
                ..HubState::default()
            })),
            changes,
        }
    }

    /// Opens a new client connection.
    pub fn connect(&self) -> MemoryConnection {
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id();
            state.connections.insert(id);
            id
        };
        tracing::debug!("Connection {} opened", id);
        MemoryConnection {
            id,
            hub: self.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// A copy of the whole tree.
    pub fn tree(&self) -> Tree {
        lock(&self.state).tree.clone()
    }

    /// A copy of the tree without the paths that have a pending
    /// on-disconnect removal; those records end with their connection.
    pub fn durable_tree(&self) -> Tree {
        let state = lock(&self.state);
        let mut tree = state.tree.clone();
        for path in state.on_disconnect.values().flatten() {
            tree.remove(path);
        }
        tree
    }

    /// A copy of the value at `path`.
    pub fn value(&self, path: &StorePath) -> Value {
        lock(&self.state).tree.value(path)
    }

    /// Notifies the path of every applied write, including on-disconnect removals.
    pub fn changes(&self) -> broadcast::Receiver<StorePath> {
        self.changes.subscribe()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        lock(&self.state).connections.len()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.state)
            .listeners
            .values()
            .filter(|l| !l.sender.is_closed())
            .count()
    }

    fn write(
        &self,
        connection: u64,
        path: &StorePath,
        apply: impl FnOnce(&mut Tree),
    ) -> Result<(), StoreError> {
        {
            let mut state = lock(&self.state);
            if !state.connections.contains(&connection) {
                return Err(StoreError::Closed);
            }
            apply(&mut state.tree);
            state.fan_out(path);
        }
        // No receivers is fine.
        let _ = self.changes.send(path.clone());
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MemoryStore")
            .field("connections", &state.connections.len())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One client's connection to a [`MemoryStore`].
///
/// Dropping the connection disconnects it.
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    hub: MemoryStore,
    closed: AtomicBool,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the connection: drops its listeners, then runs its
    /// on-disconnect directives and fans the removals out to everyone else.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let removed = {
            let mut state = lock(&self.hub.state);
            state.connections.remove(&self.id);
            state.listeners.retain(|_, l| l.connection != self.id);
            let paths = state.on_disconnect.remove(&self.id).unwrap_or_default();
            for path in &paths {
                state.tree.remove(path);
                state.fan_out(path);
            }
            paths
        };

        tracing::debug!(
            "Connection {} closed, ran {} on-disconnect directive(s)",
            self.id,
            removed.len()
        );

        for path in removed {
            let _ = self.hub.changes.send(path);
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl RemoteStore for MemoryConnection {
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.hub.write(self.id, path, |tree| tree.set(path, value))
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.ensure_open()?;
        for key in fields.keys() {
            validate_key(key)?;
        }
        self.hub.write(self.id, path, |tree| tree.update(path, &fields))
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.hub.write(self.id, path, |tree| tree.remove(path))
    }

    async fn on_disconnect_remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut state = lock(&self.hub.state);
        if !state.connections.contains(&self.id) {
            return Err(StoreError::Closed);
        }
        let directives = state.on_disconnect.entry(self.id).or_default();
        if !directives.contains(path) {
            directives.push(path.clone());
        }
        Ok(())
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        self.ensure_open()?;
        let (sender, receiver) = mpsc::unbounded_channel();

        let id = {
            let mut state = lock(&self.hub.state);
            if !state.connections.contains(&self.id) {
                return Err(StoreError::Closed);
            }
            let id = state.next_id();
            let value = state.tree.value(&query.path);
            let initial = Snapshot::new(query.path.clone(), value.clone(), query.order_by.clone());
            // Receiver is held locally, this cannot fail.
            let _ = sender.send(initial);
            state.listeners.insert(
                id,
                Listener {
                    connection: self.id,
                    query,
                    last: value,
                    sender,
                },
            );
            id
        };

        let weak: Weak<Mutex<HubState>> = Arc::downgrade(&self.hub.state);
        Ok(Subscription::new(id, receiver, move || {
            if let Some(state) = weak.upgrade() {
                lock(&state).listeners.remove(&id);
            }
        }))
    }
}
