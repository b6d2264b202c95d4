//! User contexts: the attribute bag a flag is evaluated against.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Reserved attribute key holding the user identifier.
pub const ID_KEY: &str = "id";

/// Attributes describing the user a flag is evaluated for.
///
/// Keys are kept sorted so that serialization is canonical; the request
/// fingerprint relies on this. Keys beginning with `$` are reserved for
/// internal use and are escaped by the storage layer before persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserContext(BTreeMap<String, Value>);

impl UserContext {
    /// Creates a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute, builder style.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts an attribute.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Gets an attribute by its exact key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Checks whether an attribute exists under its exact key.
    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the user identifier stored under the reserved `id` key.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_KEY).and_then(Value::as_str)
    }

    /// Resolves a possibly dotted property path.
    ///
    /// A literal key takes precedence over traversal, so `"a.b"` first tries
    /// the attribute named `a.b` and only then descends into `a`. Traversal
    /// walks nested JSON objects; the leaf is converted back to a scalar
    /// [`Value`] where possible.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value.clone());
        }
        let (head, rest) = path.split_once('.')?;
        let mut current = match self.0.get(head)? {
            Value::Json(v) => v.clone(),
            _ => return None,
        };
        for part in rest.split('.') {
            current = current.get(part)?.clone();
        }
        Some(Value::from(current))
    }

    /// Iterates over the attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the context has no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for UserContext {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for UserContext {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A user as persisted by the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub context: UserContext,
    pub updated_at: DateTime<Utc>,
}
