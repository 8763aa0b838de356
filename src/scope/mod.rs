//! The shared global namespace
//!
//! Every sub-application shares one global scope with the host. Host code
//! reads and writes it directly; sub-application code only ever sees it
//! through a sandbox proxy.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use serde_json::Value;

/// Key of the process-wide "running inside a host" flag
pub const ENVIRONMENT_KEY: &str = "__MICRO_APP_ENVIRONMENT__";

/// Handle to the shared global namespace
#[derive(Debug, Clone, Default)]
pub struct GlobalScope {
    entries: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl GlobalScope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope pre-populated with entries
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            entries: Arc::new(RwLock::new(map)),
        }
    }

    /// Read the live value of a key
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Write a key, returning the previous value
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.write().insert(key.into(), value)
    }

    /// Delete a key entirely
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }

    /// Check whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// All keys currently present, in order
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Copy of every entry at this instant
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.read().clone()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the scope has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether the micro-app environment flag is set
    pub fn is_hosted(&self) -> bool {
        is_truthy(self.get(ENVIRONMENT_KEY).as_ref())
    }

    /// Two handles refer to the same namespace
    pub fn same_as(&self, other: &GlobalScope) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

/// Truthiness used by host flags and bundle conditions
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}
