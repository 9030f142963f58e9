//! The invocation context: a per-request key-value store.
//!
//! Every handler in one request's chain sees the same store; two concurrent
//! invocations never see each other's. The default adapter is an in-memory
//! map constructed fresh per invocation. Plug in your own by implementing
//! [`Storage`] and handing the pipeline a [`StorageProvider`].
//!
//! Values are [`serde_json::Value`] so arbitrary shapes round-trip through
//! [`Storage::to_json`] / [`Storage::load_json`] unchanged.
//! [`Event`](crate::Event) layers typed `get_as`/`put` sugar on top.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Context key under which a silently-swallowed handler error is recorded,
/// as `{chain, index, pathname, routeKey, message}`.
pub const ERROR_KEY: &str = "trellis::last-error";

// ── Storage trait ─────────────────────────────────────────────────────────────

/// Pluggable adapter contract for the invocation context.
///
/// Implementations use interior mutability — handlers share the adapter
/// through an `Arc` and call it concurrently only in the sense of
/// interleaved awaits, never parallel threads within one invocation.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn has(&self, key: &str) -> bool;
    fn remove(&self, key: &str) -> Option<Value>;
    fn clear(&self);
    fn entries(&self) -> Vec<(String, Value)>;
    fn keys(&self) -> Vec<String>;
    fn values(&self) -> Vec<Value>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Serializes the whole store to a JSON object string.
    fn to_json(&self) -> serde_json::Result<String>;
    /// Replaces the store's contents from [`Storage::to_json`] output.
    fn load_json(&self, json: &str) -> serde_json::Result<()>;
    /// Bulk-inserts entries, overwriting existing keys.
    fn extend(&self, entries: Vec<(String, Value)>);
}

// ── MemoryStorage ─────────────────────────────────────────────────────────────

/// The default adapter: a mutex-guarded in-memory map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded with an initial snapshot.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self { map: Mutex::new(entries.into_iter().collect()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.lock().insert(key.to_owned(), value);
    }

    fn has(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn entries(&self) -> Vec<(String, Value)> {
        self.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn values(&self) -> Vec<Value> {
        self.lock().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&*self.lock())
    }

    fn load_json(&self, json: &str) -> serde_json::Result<()> {
        let map: HashMap<String, Value> = serde_json::from_str(json)?;
        *self.lock() = map;
        Ok(())
    }

    fn extend(&self, entries: Vec<(String, Value)>) {
        self.lock().extend(entries);
    }
}

// ── StorageProvider ───────────────────────────────────────────────────────────

/// How the pipeline obtains a context store for each invocation.
#[derive(Clone, Default)]
pub enum StorageProvider {
    /// A fresh [`MemoryStorage`] per invocation.
    #[default]
    PerInvocation,
    /// One shared instance, reused across invocations. The caller owns
    /// whatever cross-request isolation that implies.
    Instance(Arc<dyn Storage>),
    /// A factory called once per invocation — custom adapters with the same
    /// isolation guarantee as the default.
    Factory(Arc<dyn Fn() -> Arc<dyn Storage> + Send + Sync>),
}

impl StorageProvider {
    pub fn instance(storage: impl Storage + 'static) -> Self {
        Self::Instance(Arc::new(storage))
    }

    pub fn factory(f: impl Fn() -> Arc<dyn Storage> + Send + Sync + 'static) -> Self {
        Self::Factory(Arc::new(f))
    }

    pub(crate) fn provide(&self) -> Arc<dyn Storage> {
        match self {
            Self::PerInvocation => Arc::new(MemoryStorage::new()),
            Self::Instance(storage) => Arc::clone(storage),
            Self::Factory(f) => f(),
        }
    }
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerInvocation => f.write_str("StorageProvider::PerInvocation"),
            Self::Instance(_) => f.write_str("StorageProvider::Instance(..)"),
            Self::Factory(_) => f.write_str("StorageProvider::Factory(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_remove() {
        let s = MemoryStorage::new();
        s.set("user", json!({"id": 7}));
        assert!(s.has("user"));
        assert_eq!(s.get("user").unwrap()["id"], 7);
        assert_eq!(s.remove("user").unwrap()["id"], 7);
        assert!(!s.has("user"));
        assert!(s.is_empty());
    }

    #[test]
    fn enumeration() {
        let s = MemoryStorage::new();
        s.set("a", json!(1));
        s.set("b", json!(2));
        assert_eq!(s.len(), 2);
        let mut keys = s.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(s.entries().len(), 2);
        assert_eq!(s.values().len(), 2);
    }

    #[test]
    fn json_round_trip() {
        let s = MemoryStorage::new();
        s.set("n", json!(42));
        s.set("nested", json!({"list": [1, 2, 3]}));
        let dump = s.to_json().unwrap();

        let restored = MemoryStorage::new();
        restored.load_json(&dump).unwrap();
        assert_eq!(restored.get("n"), Some(json!(42)));
        assert_eq!(restored.get("nested"), Some(json!({"list": [1, 2, 3]})));
    }

    #[test]
    fn seeded_and_extended() {
        let s = MemoryStorage::from_entries([("seed".to_owned(), json!("v"))]);
        assert_eq!(s.get("seed"), Some(json!("v")));
        s.extend(vec![("seed".to_owned(), json!("v2")), ("k".to_owned(), json!(1))]);
        assert_eq!(s.get("seed"), Some(json!("v2")));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn provider_default_isolates() {
        let p = StorageProvider::default();
        let a = p.provide();
        let b = p.provide();
        a.set("k", json!(1));
        assert!(b.get("k").is_none());
    }

    #[test]
    fn provider_factory_isolates_per_call() {
        let p = StorageProvider::factory(|| Arc::new(MemoryStorage::new()) as Arc<dyn Storage>);
        let a = p.provide();
        let b = p.provide();
        a.set("k", json!(1));
        assert!(b.get("k").is_none());
    }

    #[test]
    fn provider_instance_shares() {
        let p = StorageProvider::instance(MemoryStorage::new());
        let a = p.provide();
        let b = p.provide();
        a.set("k", json!(1));
        assert_eq!(b.get("k"), Some(json!(1)));
    }
}
