//! Process-local key/value state mutated only by the dispatch consumer.
//!
//! Every value stored here must survive a JSON round trip: null, booleans,
//! finite numbers, strings, and lists or mappings of the same, nested no
//! deeper than [`MAX_DEPTH`]. Writes are validated as a batch before anything
//! is applied, so a rejected call leaves the store untouched.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Key under which the live children records are mirrored.
pub const CHILDREN_KEY: &str = "children";

/// Deepest nesting accepted for a stored value.
pub const MAX_DEPTH: usize = 128;

/// Errors raised when a write is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// The value for `key` is not JSON-safe.
    #[error("value for '{key}' is not JSON-safe: {reason}")]
    TypeMismatch {
        /// Offending key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// `key` is maintained by the service itself.
    #[error("'{key}' is a reserved state key")]
    ReservedKey {
        /// Offending key.
        key: String,
    },
}

/// JSON-safe mutable mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateStore {
    values: Map<String, Value>,
}

impl StateStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every key.
    #[must_use]
    pub fn get(&self) -> Map<String, Value> {
        self.values.clone()
    }

    /// Current value for `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Merges `batch` into the store.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] for the first key that is reserved or whose
    /// value fails [`StateStore::validate`]; nothing is written in that case.
    pub fn set(&mut self, batch: Map<String, Value>) -> Result<(), StateError> {
        for (key, value) in &batch {
            check_entry(key, value)?;
        }
        self.values.extend(batch);
        Ok(())
    }

    /// Converts each entry with `serde` and merges the batch.
    ///
    /// Conversion failures, such as maps with non-string keys or a failing
    /// `Serialize` implementation, reject the whole batch.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::TypeMismatch`] when any entry fails to convert,
    /// otherwise the errors of [`StateStore::set`].
    pub fn set_serialized<I, K, T>(&mut self, entries: I) -> Result<(), StateError>
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Serialize,
    {
        let mut batch = Map::new();
        for (key, value) in entries {
            let key = key.into();
            let converted =
                serde_json::to_value(value).map_err(|error| StateError::TypeMismatch {
                    key: key.clone(),
                    reason: error.to_string(),
                })?;
            batch.insert(key, converted);
        }
        self.set(batch)
    }

    /// True when `value` may be stored.
    #[must_use]
    pub fn validate(value: &Value) -> bool {
        depth_within_limit(value)
    }

    /// Whole store as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Writes a key the service maintains itself, bypassing the reserved check.
    pub(crate) fn put_reserved(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_owned(), value);
    }
}

fn check_entry(key: &str, value: &Value) -> Result<(), StateError> {
    if key == CHILDREN_KEY {
        return Err(StateError::ReservedKey {
            key: key.to_owned(),
        });
    }
    if !StateStore::validate(value) {
        return Err(StateError::TypeMismatch {
            key: key.to_owned(),
            reason: format!("nesting exceeds {MAX_DEPTH} levels"),
        });
    }
    Ok(())
}

// Iterative so hostile input cannot exhaust the stack.
fn depth_within_limit(value: &Value) -> bool {
    let mut pending = vec![(value, 0_usize)];
    while let Some((current, depth)) = pending.pop() {
        if depth > MAX_DEPTH {
            return false;
        }
        match current {
            Value::Array(items) => pending.extend(items.iter().map(|item| (item, depth + 1))),
            Value::Object(entries) => {
                pending.extend(entries.values().map(|item| (item, depth + 1)));
            }
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;
    use serde::Serializer;
    use serde::ser::Error as _;
    use serde_json::json;

    use super::*;

    enum Entry {
        Number(i64),
        Opaque,
    }

    impl Serialize for Entry {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Self::Number(value) => serializer.serialize_i64(*value),
                Self::Opaque => Err(S::Error::custom("opaque values cannot be represented")),
            }
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn nested_values_round_trip() {
        let mut store = StateStore::new();
        store
            .set(object(json!({"a": [1, "x", {"b": null}]})))
            .expect("set nested value");
        assert_eq!(store.to_value(), json!({"a": [1, "x", {"b": null}]}));
    }

    #[test]
    fn failing_entry_rejects_whole_batch() {
        let mut store = StateStore::new();
        store
            .set(object(json!({"kept": true})))
            .expect("seed state");
        let before = store.get();

        let error = store
            .set_serialized([("later", Entry::Number(3)), ("opaque", Entry::Opaque)])
            .expect_err("opaque value should be rejected");

        assert!(matches!(error, StateError::TypeMismatch { ref key, .. } if key == "opaque"));
        assert_eq!(store.get(), before);
        assert!(store.value("later").is_none());
    }

    #[test]
    fn non_string_map_keys_are_type_mismatches() {
        let mut store = StateStore::new();
        let mut grid = HashMap::new();
        grid.insert((1, 2), "cell");
        let error = store
            .set_serialized([("grid", grid)])
            .expect_err("tuple keys are not JSON-safe");
        assert!(matches!(error, StateError::TypeMismatch { .. }));
        assert!(store.get().is_empty());
    }

    #[test]
    fn reserved_key_is_rejected() {
        let mut store = StateStore::new();
        let error = store
            .set(object(json!({"children": []})))
            .expect_err("children is reserved");
        assert_eq!(
            error,
            StateError::ReservedKey {
                key: String::from(CHILDREN_KEY)
            }
        );
    }

    #[rstest]
    #[case(MAX_DEPTH, true)]
    #[case(MAX_DEPTH + 1, false)]
    fn depth_limit_is_enforced(#[case] depth: usize, #[case] accepted: bool) {
        let mut value = json!(0);
        for _ in 0..depth {
            value = json!([value]);
        }
        assert_eq!(StateStore::validate(&value), accepted);
    }
}
