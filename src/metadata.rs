//! Arbitrary-shape metadata attached to a [`LogRecord`](crate::record::LogRecord).
//!
//! Containers are shared handles, so a structure may reference itself
//! (`meta.insert("self", meta.clone())`). Encoding walks the graph with an
//! ancestor stack and replaces back-references with [`CIRCULAR`] instead of
//! recursing forever.

use crate::error::SerializationError;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Placeholder written where a value refers back to one of its ancestors.
pub const CIRCULAR: &str = "[Circular]";

/// Placeholder written where nesting exceeds [`MAX_DEPTH`].
pub const TRUNCATED: &str = "[Truncated]";

/// Deepest container nesting that is encoded verbatim.
pub const MAX_DEPTH: usize = 64;

type Shared<T> = Arc<RwLock<T>>;

/// Recursive metadata value.
///
/// Cloning a container clones the handle, not the contents.
#[derive(Clone)]
pub enum Metadata {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Shared<Vec<Metadata>>),
    Object(Shared<BTreeMap<String, Metadata>>),
}

/// Result of a lossy encode: the JSON value plus every substitution made.
#[derive(Debug)]
pub struct Encoded {
    pub value: Value,
    pub issues: Vec<SerializationError>,
}

impl Metadata {
    /// Empty object.
    pub fn object() -> Self {
        Metadata::Object(Arc::new(RwLock::new(BTreeMap::new())))
    }

    /// Empty array.
    pub fn array() -> Self {
        Metadata::Array(Arc::new(RwLock::new(Vec::new())))
    }

    /// Insert `value` under `key`. Returns `false` if `self` is not an object.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Metadata>) -> bool {
        match self {
            Metadata::Object(map) => {
                map.write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.into(), value.into());
                true
            }
            _ => false,
        }
    }

    /// Append `value`. Returns `false` if `self` is not an array.
    pub fn push(&self, value: impl Into<Metadata>) -> bool {
        match self {
            Metadata::Array(items) => {
                items
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(value.into());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Metadata> {
        match self {
            Metadata::Object(map) => map
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned(),
            _ => None,
        }
    }

    /// `true` for `Null` and for empty containers.
    pub fn is_empty(&self) -> bool {
        match self {
            Metadata::Null => true,
            Metadata::Array(items) => items.read().unwrap_or_else(PoisonError::into_inner).is_empty(),
            Metadata::Object(map) => map.read().unwrap_or_else(PoisonError::into_inner).is_empty(),
            _ => false,
        }
    }

    /// Encode to JSON, substituting placeholders for cycles and excessive
    /// depth. Never fails.
    pub fn encode(&self) -> Encoded {
        let mut walker = Walker::default();
        let value = walker.visit(self);
        Encoded {
            value,
            issues: walker.issues,
        }
    }

    /// Encode to JSON, failing on the first cycle or over-deep branch.
    pub fn try_to_json(&self) -> Result<Value, SerializationError> {
        let Encoded { value, mut issues } = self.encode();
        if issues.is_empty() {
            Ok(value)
        } else {
            Err(issues.remove(0))
        }
    }

    /// Encode to a JSON string, never failing.
    pub fn to_json_string(&self) -> String {
        self.encode().value.to_string()
    }
}

#[derive(Default)]
struct Walker {
    ancestors: Vec<usize>,
    path: Vec<String>,
    issues: Vec<SerializationError>,
}

impl Walker {
    fn visit(&mut self, node: &Metadata) -> Value {
        match node {
            Metadata::Null => Value::Null,
            Metadata::Bool(b) => Value::Bool(*b),
            Metadata::Number(n) => Value::Number(n.clone()),
            Metadata::String(s) => Value::String(s.clone()),
            Metadata::Array(items) => {
                let id = Arc::as_ptr(items) as *const () as usize;
                if let Some(placeholder) = self.enter(id) {
                    return placeholder;
                }
                let items = items.read().unwrap_or_else(PoisonError::into_inner);
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    self.path.push(index.to_string());
                    out.push(self.visit(item));
                    self.path.pop();
                }
                self.ancestors.pop();
                Value::Array(out)
            }
            Metadata::Object(map) => {
                let id = Arc::as_ptr(map) as *const () as usize;
                if let Some(placeholder) = self.enter(id) {
                    return placeholder;
                }
                let map = map.read().unwrap_or_else(PoisonError::into_inner);
                let mut out = Map::new();
                for (key, value) in map.iter() {
                    self.path.push(key.clone());
                    out.insert(key.clone(), self.visit(value));
                    self.path.pop();
                }
                self.ancestors.pop();
                Value::Object(out)
            }
        }
    }

    /// Push `id` onto the ancestor stack, or return the placeholder that
    /// replaces this container.
    fn enter(&mut self, id: usize) -> Option<Value> {
        if self.ancestors.contains(&id) {
            self.issues.push(SerializationError::Cycle { path: self.path_string() });
            return Some(Value::String(CIRCULAR.to_string()));
        }
        if self.ancestors.len() >= MAX_DEPTH {
            self.issues.push(SerializationError::TooDeep {
                path: self.path_string(),
                limit: MAX_DEPTH,
            });
            return Some(Value::String(TRUNCATED.to_string()));
        }
        self.ancestors.push(id);
        None
    }

    fn path_string(&self) -> String {
        if self.path.is_empty() {
            "$".to_string()
        } else {
            format!("$.{}", self.path.join("."))
        }
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata::object()
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json_string())
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.encode().value.serialize(serializer)
    }
}

impl From<Value> for Metadata {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Metadata::Null,
            Value::Bool(b) => Metadata::Bool(b),
            Value::Number(n) => Metadata::Number(n),
            Value::String(s) => Metadata::String(s),
            Value::Array(items) => Metadata::Array(Arc::new(RwLock::new(
                items.into_iter().map(Metadata::from).collect(),
            ))),
            Value::Object(map) => Metadata::Object(Arc::new(RwLock::new(
                map.into_iter().map(|(k, v)| (k, Metadata::from(v))).collect(),
            ))),
        }
    }
}

impl From<&str> for Metadata {
    fn from(value: &str) -> Self {
        Metadata::String(value.to_string())
    }
}

impl From<String> for Metadata {
    fn from(value: String) -> Self {
        Metadata::String(value)
    }
}

impl From<bool> for Metadata {
    fn from(value: bool) -> Self {
        Metadata::Bool(value)
    }
}

impl From<i64> for Metadata {
    fn from(value: i64) -> Self {
        Metadata::Number(value.into())
    }
}

impl From<u64> for Metadata {
    fn from(value: u64) -> Self {
        Metadata::Number(value.into())
    }
}

impl From<f64> for Metadata {
    /// Non-finite floats have no JSON form and become `Null`.
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Metadata::Null, Metadata::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_plain_structures_verbatim() {
        let meta = Metadata::from(json!({"user": "ann", "tags": [1, 2], "ok": true}));
        assert_eq!(meta.try_to_json().unwrap(), json!({"user": "ann", "tags": [1, 2], "ok": true}));
    }

    #[test]
    fn self_reference_becomes_placeholder() {
        let meta = Metadata::object();
        meta.insert("name", "loop");
        meta.insert("self", meta.clone());

        let encoded = meta.encode();
        assert_eq!(encoded.value, json!({"name": "loop", "self": CIRCULAR}));
        assert_eq!(encoded.issues.len(), 1);
        assert!(matches!(
            &encoded.issues[0],
            SerializationError::Cycle { path } if path == "$.self"
        ));
        assert!(meta.try_to_json().is_err());
    }

    #[test]
    fn indirect_cycle_through_array_is_broken() {
        let root = Metadata::object();
        let list = Metadata::array();
        list.push(root.clone());
        root.insert("list", list);

        assert_eq!(root.encode().value, json!({"list": [CIRCULAR]}));
    }

    #[test]
    fn shared_sibling_is_not_a_cycle() {
        let shared = Metadata::from(json!({"k": 1}));
        let root = Metadata::object();
        root.insert("a", shared.clone());
        root.insert("b", shared);

        assert_eq!(root.try_to_json().unwrap(), json!({"a": {"k": 1}, "b": {"k": 1}}));
    }

    #[test]
    fn deep_nesting_is_truncated() {
        let root = Metadata::object();
        let mut cursor = root.clone();
        for _ in 0..(MAX_DEPTH + 5) {
            let child = Metadata::object();
            cursor.insert("child", child.clone());
            cursor = child;
        }

        let encoded = root.encode();
        assert!(encoded.value.to_string().contains(TRUNCATED));
        assert!(matches!(encoded.issues[0], SerializationError::TooDeep { limit: MAX_DEPTH, .. }));
    }

    #[test]
    fn non_finite_float_is_null() {
        assert!(matches!(Metadata::from(f64::NAN), Metadata::Null));
    }

    #[test]
    fn empty_checks() {
        assert!(Metadata::default().is_empty());
        assert!(Metadata::Null.is_empty());
        assert!(!Metadata::from("x").is_empty());
    }
}
