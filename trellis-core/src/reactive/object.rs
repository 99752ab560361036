//! Reactive Objects
//!
//! A reactive object is a key/value container whose reads and writes are
//! visible to the runtime. Property access is explicit: `get` tracks the
//! `(object, key)` pair for the running effect, `set` writes through and then
//! triggers every effect that read that pair.
//!
//! # Lifetime
//!
//! Handles are cheap clones of one shared object. When the last handle is
//! dropped the object removes its own entry from the runtime's dependency
//! bucket. [`Runtime::dispose`] does the same eagerly.
//!
//! # Memory Layout
//!
//! Each object consists of:
//! - A unique target ID (8 bytes)
//! - A weak reference to its runtime
//! - An insertion-ordered map of properties behind a lock

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::TargetId;
use super::value::Value;
use crate::error::{ReactiveError, Result};

struct ObjectInner {
    id: TargetId,
    runtime: WeakRuntime,
    fields: RwLock<IndexMap<Arc<str>, Value>>,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.forget_target(self.id);
        }
    }
}

/// Handle to a reactive key/value container.
///
/// # Example
///
/// ```
/// use trellis_core::Runtime;
///
/// let rt = Runtime::new();
/// let state = rt.reactive([("foo", 1), ("bar", 2)]);
///
/// assert_eq!(state.get_i64("foo"), Some(1));
/// state.set("foo", 5);
/// assert_eq!(state.get_i64("foo"), Some(5));
/// ```
#[derive(Clone)]
pub struct ReactiveObject {
    inner: Arc<ObjectInner>,
}

impl ReactiveObject {
    fn new(runtime: &Runtime, fields: IndexMap<Arc<str>, Value>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                id: TargetId::new(),
                runtime: runtime.downgrade(),
                fields: RwLock::new(fields),
            }),
        }
    }

    /// The identity used in the dependency bucket.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Whether two handles refer to the same object.
    pub fn ptr_eq(&self, other: &ReactiveObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read a property, subscribing the running effect to it.
    ///
    /// The read is tracked even when the key is absent, so an effect hears
    /// about the key being added later.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id, key);
        }
        self.get_untracked(key)
    }

    /// Read a property without establishing a dependency.
    pub fn get_untracked(&self, key: &str) -> Option<Value> {
        self.inner.fields.read().get(key).cloned()
    }

    /// Tracked read of an integer property.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|value| value.as_i64())
    }

    /// Tracked read of a boolean property.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|value| value.as_bool())
    }

    /// Write a property and trigger its subscribers.
    ///
    /// Always triggers, even if the new value equals the old one. Always
    /// reports success.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        let previous = self.inner.fields.write().insert(Arc::from(key), value.into());
        // The old value may hold the last handle to another object.
        drop(previous);

        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.trigger(self.inner.id, key);
        }
        true
    }

    /// Replace a property with `f(current)`.
    ///
    /// The current value is read untracked; the write triggers as `set` does.
    pub fn update<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        let next = f(self.get_untracked(key));
        self.set(key, next)
    }

    /// Delete a property and trigger its subscribers.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.inner.fields.write().shift_remove(key);

        if removed.is_some() {
            if let Some(runtime) = self.inner.runtime.upgrade() {
                runtime.trigger(self.inner.id, key);
            }
        }
        removed
    }

    /// Current keys in insertion order. Not tracked.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .fields
            .read()
            .keys()
            .map(|key| key.to_string())
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fields.read().is_empty()
    }

    /// Untracked snapshot as a JSON object.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.to_json_inner(&mut HashSet::new())
    }

    pub(crate) fn to_json_inner(&self, path: &mut HashSet<TargetId>) -> Result<serde_json::Value> {
        if !path.insert(self.inner.id) {
            return Err(ReactiveError::CyclicValue(self.inner.id));
        }

        let entries: Vec<(Arc<str>, Value)> = self
            .inner
            .fields
            .read()
            .iter()
            .map(|(key, value)| (Arc::clone(key), value.clone()))
            .collect();

        let mut map = serde_json::Map::with_capacity(entries.len());
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_json_inner(path)?);
        }

        path.remove(&self.inner.id);
        Ok(serde_json::Value::Object(map))
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Nested objects are shown by id to stay finite on cycles.
        f.debug_struct("ReactiveObject")
            .field("id", &self.inner.id)
            .field("keys", &self.keys())
            .finish()
    }
}

impl Runtime {
    /// Wrap a set of properties in a reactive object owned by this runtime.
    pub fn reactive<I, K, V>(&self, fields: I) -> ReactiveObject
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let fields = fields
            .into_iter()
            .map(|(key, value)| (Arc::from(key.as_ref()), value.into()))
            .collect();
        ReactiveObject::new(self, fields)
    }

    /// Build a reactive object from a JSON object, converting nested JSON
    /// objects into nested reactive objects.
    pub fn reactive_from_json(&self, json: serde_json::Value) -> Result<ReactiveObject> {
        match Value::from_json(self, json) {
            Value::Object(obj) => Ok(obj),
            other => Err(ReactiveError::NotAnObject {
                found: other.type_name(),
            }),
        }
    }

    /// Drop the bucket entry for `object` now rather than when its last
    /// handle goes away. Effects stop hearing about its writes.
    pub fn dispose(&self, object: &ReactiveObject) {
        self.forget_target(object.id());
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
