//! Grocery items as stored under `grocery-items/{key}`.
//!
//! The key is the lower-cased name, so adding "Milk" and then "milk" writes
//! the same path and the second write replaces the first.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::snapshot::Snapshot;

/// The stored key for an item name: trimmed and lower-cased.
pub fn item_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A single entry of the shared grocery list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroceryItem {
    /// Path key under `grocery-items`. Not part of the stored record.
    #[serde(skip)]
    pub key: String,
    pub name: String,
    #[serde(rename = "addedByUser", default)]
    pub added_by_user: String,
    #[serde(default)]
    pub completed: bool,
}

impl GroceryItem {
    /// A new, not yet completed item. `name` is trimmed.
    pub fn new(name: &str, added_by_user: impl Into<String>) -> Self {
        let name = name.trim();
        Self {
            key: item_key(name),
            name: name.to_string(),
            added_by_user: added_by_user.into(),
            completed: false,
        }
    }

    /// Decodes a child snapshot of `grocery-items`.
    ///
    /// Returns `None` when the child is not an item record.
    pub fn from_snapshot(snapshot: &Snapshot) -> Option<Self> {
        let key = snapshot.key()?.to_string();
        let mut item: GroceryItem = serde_json::from_value(snapshot.value().clone()).ok()?;
        item.key = key;
        Some(item)
    }

    /// The stored record: `{name, addedByUser, completed}`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "addedByUser": self.added_by_user,
            "completed": self.completed,
        })
    }
}

impl fmt::Display for GroceryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let check = if self.completed { "[x]" } else { "[ ]" };
        write!(f, "{} {:<20} {}", check, self.name, self.added_by_user)
    }
}
