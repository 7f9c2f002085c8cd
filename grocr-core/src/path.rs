//! Key paths into the realtime tree.
//!
//! A path is a `/`-separated list of segments, e.g. `grocery-items/milk`.
//! The empty path addresses the root of the tree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StoreError;

/// Characters the store does not accept inside a key.
const FORBIDDEN: [char; 6] = ['.', '#', '$', '[', ']', '/'];

/// A validated path into the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The root of the tree.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a `/`-separated path. Leading and trailing slashes are ignored.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let segments = trimmed
            .split('/')
            .map(|segment| validate_key(segment).map(|_| segment.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Returns the path of a direct child.
    pub fn child(&self, key: &str) -> Result<Self, StoreError> {
        validate_key(key)?;
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Ok(Self { segments })
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// The last segment, or `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// True if a write at `other` can change the value at `self`.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

/// Checks that `key` can be used as a single path segment.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidPath("empty path segment".to_string()));
    }
    if let Some(c) = key
        .chars()
        .find(|c| FORBIDDEN.contains(c) || c.is_control())
    {
        return Err(StoreError::InvalidPath(format!(
            "'{}' contains forbidden character {:?}",
            key, c
        )));
    }
    Ok(())
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl FromStr for StorePath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for StorePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StorePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        StorePath::parse(&raw).map_err(serde::de::Error::custom)
    }
}
