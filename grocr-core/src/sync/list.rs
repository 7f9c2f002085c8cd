//! List Synchronizer.
//!
//! Keeps the local, ordered copy of `grocery-items` in step with the store.
//! Every delivery replaces the whole local collection; writes go straight to
//! the store and only show up locally once the subscription delivers them.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;

use super::ListenerHandle;
use crate::error::{Error, Result};
use crate::models::{GroceryItem, User};
use crate::path::StorePath;
use crate::snapshot::{Query, Snapshot};
use crate::store::RemoteStore;

/// Store path of the item collection.
pub const ITEMS_PATH: &str = "grocery-items";

/// [`ITEMS_PATH`] as a store path.
pub fn items_root() -> StorePath {
    StorePath::parse(ITEMS_PATH).expect("ITEMS_PATH is a valid store path")
}

/// Field the collection is ordered by; incomplete items come first.
const ORDER_FIELD: &str = "completed";

/// Owns the local snapshot of the shared grocery list.
pub struct ListSynchronizer<S> {
    store: Arc<S>,
    items_path: StorePath,
    snapshot: Arc<watch::Sender<Vec<GroceryItem>>>,
}

impl<S: RemoteStore> ListSynchronizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        let (snapshot, _) = watch::channel(Vec::new());
        Self {
            store,
            items_path: items_root(),
            snapshot: Arc::new(snapshot),
        }
    }

    /// The query the synchronizer subscribes with.
    pub fn query(&self) -> Query {
        Query::new(self.items_path.clone()).order_by_child(ORDER_FIELD)
    }

    /// Subscribes to the item collection.
    ///
    /// `on_update` receives the complete, ordered collection on the first
    /// delivery and after every change. It runs on the listener task, one
    /// call at a time.
    pub async fn subscribe<F>(&self, mut on_update: F) -> Result<ListenerHandle>
    where
        F: FnMut(Vec<GroceryItem>) + Send + 'static,
    {
        let mut subscription = self.store.subscribe(self.query()).await?;
        let snapshot = Arc::clone(&self.snapshot);

        let task = tokio::spawn(async move {
            while let Some(delivery) = subscription.next().await {
                let items = rebuild_items(&delivery);
                tracing::debug!("Item snapshot with {} item(s)", items.len());
                snapshot.send_replace(items.clone());
                on_update(items);
            }
            tracing::debug!("Item subscription ended");
        });

        Ok(ListenerHandle::new(task))
    }

    /// The last collection delivered by the store.
    pub fn items(&self) -> Vec<GroceryItem> {
        self.snapshot.borrow().clone()
    }

    /// A read-only view that changes with every delivery.
    pub fn watch(&self) -> watch::Receiver<Vec<GroceryItem>> {
        self.snapshot.subscribe()
    }

    /// Writes a new item, replacing any item with the same key.
    ///
    /// Fails with [`Error::InvalidInput`] before touching the store when the
    /// trimmed name is empty or cannot be used as a key.
    pub async fn add_item(&self, name: &str, added_by: &User) -> Result<GroceryItem> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_input("item name must not be empty"));
        }

        let item = GroceryItem::new(name, added_by.email.clone());
        let path = self.item_path(&item.key)?;
        self.store.set(&path, item.to_value()).await?;

        tracing::info!("Added '{}' for {}", item.name, added_by.email);
        Ok(item)
    }

    /// Flips `completed` on the stored item, leaving its other fields alone.
    pub async fn toggle_completed(&self, item: &GroceryItem) -> Result<()> {
        let path = self.item_path(&item.key)?;
        let mut fields = Map::new();
        fields.insert(ORDER_FIELD.to_string(), Value::Bool(!item.completed));
        self.store.update(&path, fields).await?;

        tracing::debug!("Set '{}' completed={}", item.key, !item.completed);
        Ok(())
    }

    /// Deletes the stored item.
    pub async fn remove_item(&self, item: &GroceryItem) -> Result<()> {
        let path = self.item_path(&item.key)?;
        self.store.remove(&path).await?;

        tracing::info!("Removed '{}'", item.key);
        Ok(())
    }

    fn item_path(&self, key: &str) -> Result<StorePath> {
        self.items_path
            .child(key)
            .map_err(|e| Error::invalid_input(e.to_string()))
    }
}

/// Rebuilds the full ordered collection from a delivery. Children that are
/// not item records are skipped.
pub fn rebuild_items(snapshot: &Snapshot) -> Vec<GroceryItem> {
    snapshot
        .children()
        .iter()
        .filter_map(|child| {
            let item = GroceryItem::from_snapshot(child);
            if item.is_none() {
                tracing::warn!("Skipping malformed item at {}", child.path());
            }
            item
        })
        .collect()
}
