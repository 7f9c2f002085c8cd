//! The authoritative key-path tree held by a store.
//!
//! Values are JSON. Writing `null` deletes; an object left without children
//! is deleted too, so the tree never contains empty objects or null leaves.

use serde_json::{Map, Value};

use crate::path::StorePath;

/// A JSON tree addressed by [`StorePath`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tree {
    root: Value,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from a JSON value, dropping null leaves and empty objects.
    pub fn from_value(value: Value) -> Self {
        Self {
            root: normalize(value),
        }
    }

    /// The value at `path`, if any.
    pub fn get(&self, path: &StorePath) -> Option<&Value> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.as_object()?.get(segment)?;
        }
        if node.is_null() {
            None
        } else {
            Some(node)
        }
    }

    /// A copy of the value at `path`, `Value::Null` when absent.
    pub fn value(&self, path: &StorePath) -> Value {
        self.get(path).cloned().unwrap_or(Value::Null)
    }

    /// Replaces the value at `path`. Writing `null` removes it.
    pub fn set(&mut self, path: &StorePath, value: Value) {
        set_at(&mut self.root, path.segments(), normalize(value));
    }

    /// Replaces each listed child of `path`, leaving other children untouched.
    ///
    /// Keys must already be valid path segments.
    pub fn update(&mut self, path: &StorePath, fields: &Map<String, Value>) {
        for (key, value) in fields {
            let mut segments = path.segments().to_vec();
            segments.push(key.clone());
            set_at(&mut self.root, &segments, normalize(value.clone()));
        }
    }

    pub fn remove(&mut self, path: &StorePath) {
        self.set(path, Value::Null);
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    /// The whole tree as a JSON value.
    pub fn to_value(&self) -> Value {
        self.root.clone()
    }
}

fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            // Nothing below a scalar to delete.
            return;
        }
        *node = Value::Object(Map::new());
    }

    let now_empty = match node {
        Value::Object(map) => {
            let child_empty = {
                let child = map.entry(head.clone()).or_insert(Value::Null);
                set_at(child, rest, value);
                child.is_null()
            };
            if child_empty {
                map.remove(head);
            }
            map.is_empty()
        }
        _ => false,
    };

    if now_empty {
        *node = Value::Null;
    }
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other,
    }
}
