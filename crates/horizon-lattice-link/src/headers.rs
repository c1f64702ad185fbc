//! Immutable header sets.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LinkError, Result};

/// An immutable, cheaply cloneable set of string headers.
///
/// The same set is attached to every request-transport call and sent as the
/// connection-parameters payload on every streaming handshake, including
/// reconnects. Names keep their original spelling; lookups are exact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct HeaderSet {
    entries: Arc<BTreeMap<String, String>>,
}

impl HeaderSet {
    /// Create an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this set with one more header.
    pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(name.into(), value.into());
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Return a new set with `overrides` layered on top of `self`.
    ///
    /// Entries in `overrides` win over entries with the same name.
    pub fn merged(&self, overrides: &HeaderSet) -> Self {
        if overrides.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return overrides.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.extend(
            overrides
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Get a header value by exact name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Number of headers in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render the set as a JSON object, used as the handshake payload.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    /// Convert to an `http::HeaderMap`, validating names and values.
    pub fn to_header_map(&self) -> Result<http::HeaderMap> {
        let mut map = http::HeaderMap::with_capacity(self.len());
        for (name, value) in self.iter() {
            let name = http::HeaderName::try_from(name)
                .map_err(|e| LinkError::InvalidHeader(format!("{name}: {e}")))?;
            let value = http::HeaderValue::try_from(value)?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

impl From<BTreeMap<String, String>> for HeaderSet {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }
}

impl From<HeaderSet> for BTreeMap<String, String> {
    fn from(set: HeaderSet) -> Self {
        Arc::unwrap_or_clone(set.entries)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: Arc::new(
                iter.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}
