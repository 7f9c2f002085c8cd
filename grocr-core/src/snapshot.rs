//! Snapshots and ordered queries.
//!
//! A [`Snapshot`] is the complete value at a subscribed path, delivered as a
//! unit. Children are iterated in the order of the [`Query`] that produced it.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::StorePath;

/// How children of a snapshot are ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderBy {
    /// Order by child key.
    #[default]
    Key,
    /// Order by the value of the named field of each child, then by key.
    Child(String),
}

/// A subscription target: a path plus the ordering of its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub path: StorePath,
    #[serde(default)]
    pub order_by: OrderBy,
}

impl Query {
    pub fn new(path: StorePath) -> Self {
        Self {
            path,
            order_by: OrderBy::Key,
        }
    }

    /// Orders children by the value of `field`.
    pub fn order_by_child(mut self, field: impl Into<String>) -> Self {
        self.order_by = OrderBy::Child(field.into());
        self
    }
}

/// The complete value at a path at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    path: StorePath,
    value: Value,
    order_by: OrderBy,
}

impl Snapshot {
    pub fn new(path: StorePath, value: Value, order_by: OrderBy) -> Self {
        Self {
            path,
            value,
            order_by,
        }
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// The last path segment; `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.path.key()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// False when nothing is stored at the path.
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Number of direct children; 0 when absent or a scalar.
    pub fn children_count(&self) -> usize {
        match &self.value {
            Value::Object(map) => map.len(),
            Value::Array(items) => items.iter().filter(|v| !v.is_null()).count(),
            _ => 0,
        }
    }

    /// Direct children in query order.
    pub fn children(&self) -> Vec<Snapshot> {
        let mut entries: Vec<(String, &Value)> = match &self.value {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => Vec::new(),
        };

        match &self.order_by {
            OrderBy::Key => entries.sort_by(|(a, _), (b, _)| compare_keys(a, b)),
            OrderBy::Child(field) => entries.sort_by(|(ka, va), (kb, vb)| {
                compare_values(va.get(field), vb.get(field)).then_with(|| compare_keys(ka, kb))
            }),
        }

        entries
            .into_iter()
            .filter_map(|(key, value)| {
                let path = self.path.child(&key).ok()?;
                Some(Snapshot::new(path, value.clone(), OrderBy::Key))
            })
            .collect()
    }
}

/// Integer-like keys sort numerically ahead of all other keys, which sort
/// lexicographically.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// absent/null < false < true < numbers < strings < objects/arrays
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(false)) => 1,
        Some(Value::Bool(true)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) | Some(Value::Object(_)) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items_snapshot(value: Value) -> Snapshot {
        Snapshot::new(
            StorePath::parse("grocery-items").unwrap(),
            value,
            OrderBy::Child("completed".to_string()),
        )
    }

    fn keys(snapshot: &Snapshot) -> Vec<String> {
        snapshot
            .children()
            .iter()
            .map(|c| c.key().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_missing_value() {
        let snapshot = items_snapshot(Value::Null);
        assert!(!snapshot.exists());
        assert_eq!(snapshot.children_count(), 0);
        assert!(snapshot.children().is_empty());
    }

    #[test]
    fn test_scalar_has_no_children() {
        let snapshot = Snapshot::new(StorePath::root(), json!("x"), OrderBy::Key);
        assert!(snapshot.exists());
        assert_eq!(snapshot.children_count(), 0);
    }

    #[test]
    fn test_order_by_completed_then_key() {
        let snapshot = items_snapshot(json!({
            "eggs": {"name": "Eggs", "completed": true},
            "bread": {"name": "Bread", "completed": false},
            "apples": {"name": "Apples", "completed": true},
            "milk": {"name": "Milk", "completed": false},
        }));

        assert_eq!(keys(&snapshot), ["bread", "milk", "apples", "eggs"]);
        assert_eq!(snapshot.children_count(), 4);
    }

    #[test]
    fn test_missing_field_sorts_first() {
        let snapshot = items_snapshot(json!({
            "b": {"completed": false},
            "a": {"completed": true},
            "c": {"name": "no flag"},
        }));
        assert_eq!(keys(&snapshot), ["c", "b", "a"]);
    }

    #[test]
    fn test_value_rank_order() {
        let snapshot = Snapshot::new(
            StorePath::root(),
            json!({
                "obj": {"v": {"x": 1}},
                "str": {"v": "a"},
                "num_big": {"v": 10},
                "num_small": {"v": 2.5},
                "t": {"v": true},
                "f": {"v": false},
                "none": {"w": 1},
            }),
            OrderBy::Child("v".to_string()),
        );
        assert_eq!(
            keys(&snapshot),
            ["none", "f", "t", "num_small", "num_big", "str", "obj"]
        );
    }

    #[test]
    fn test_order_by_key_numeric_first() {
        let snapshot = Snapshot::new(
            StorePath::root(),
            json!({"b": 1, "10": 1, "a": 1, "9": 1}),
            OrderBy::Key,
        );
        assert_eq!(keys(&snapshot), ["9", "10", "a", "b"]);
    }

    #[test]
    fn test_child_paths() {
        let snapshot = items_snapshot(json!({"milk": {"name": "Milk"}}));
        let children = snapshot.children();
        assert_eq!(children[0].path().to_string(), "grocery-items/milk");
        assert_eq!(children[0].value(), &json!({"name": "Milk"}));
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new(StorePath::parse("grocery-items").unwrap()).order_by_child("completed");
        assert_eq!(query.order_by, OrderBy::Child("completed".to_string()));
    }
}
