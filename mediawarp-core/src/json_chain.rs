//! Chained in-place edits over a JSON document.
//!
//! Playback-manifest rewriting touches a handful of fields inside large
//! upstream payloads. [`JsonChain`] parses the body once, lets callers
//! `get`/`set` by dotted path (numeric segments index arrays, missing
//! intermediate containers are created), and re-serializes on
//! [`JsonChain::result`]. Sibling order is preserved.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub struct JsonChain {
    root: Value,
    parse_error: Option<String>,
}

impl JsonChain {
    /// Parse a document. A parse failure is carried until `result()`.
    pub fn from_slice(data: &[u8]) -> Self {
        match serde_json::from_slice(data) {
            Ok(root) => Self {
                root,
                parse_error: None,
            },
            Err(err) => Self {
                root: Value::Null,
                parse_error: Some(err.to_string()),
            },
        }
    }

    pub fn is_valid(&self) -> bool {
        self.parse_error.is_none()
    }

    /// Read the value at a dotted path, if present.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut node = &self.root;
        for segment in path.split('.') {
            node = match node {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(node)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    /// Write a value at a dotted path, creating intermediate containers.
    ///
    /// A numeric segment addresses an array index unless the current node
    /// is already an object; arrays grow with nulls as needed. Calls
    /// chain; a carried parse error turns sets into no-ops.
    pub fn set(&mut self, path: impl AsRef<str>, value: impl Into<Value>) -> &mut Self {
        if self.parse_error.is_some() {
            return self;
        }
        let mut node = &mut self.root;
        for segment in path.as_ref().split('.') {
            let index = segment.parse::<usize>().ok();
            let as_array = match index {
                Some(_) => !node.is_object(),
                None => false,
            };
            if as_array {
                let index = index.unwrap();
                if !node.is_array() {
                    *node = Value::Array(Vec::new());
                }
                let items = node.as_array_mut().unwrap();
                while items.len() <= index {
                    items.push(Value::Null);
                }
                node = &mut items[index];
            } else {
                if !node.is_object() {
                    *node = Value::Object(Map::new());
                }
                let map = node.as_object_mut().unwrap();
                node = map.entry(segment.to_string()).or_insert(Value::Null);
            }
        }
        *node = value.into();
        self
    }

    /// Materialize the edited document.
    pub fn result(&self) -> Result<Vec<u8>> {
        if let Some(err) = &self.parse_error {
            return Err(Error::BodyDecode(err.clone()));
        }
        serde_json::to_vec(&self.root).map_err(|e| Error::BodyEncode(e.to_string()))
    }
}
