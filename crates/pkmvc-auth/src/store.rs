//! Per-visitor session state.
//!
//! The web layer owns the actual session (cookie, server-side file, ...);
//! accounts only need a small key/value view of it.

use std::collections::HashMap;

/// Key/value storage that survives between requests of one visitor.
pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: String);

    /// Remove a key, returning its previous value.
    fn remove(&mut self, key: &str) -> Option<String>;

    fn clear(&mut self);
}

/// In-memory [`SessionStore`], for tests and single-process tools.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    values: HashMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    fn clear(&mut self) {
        self.values.clear();
    }
}

impl<S: SessionStore + ?Sized> SessionStore for &mut S {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: String) {
        (**self).set(key, value);
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        (**self).remove(key)
    }

    fn clear(&mut self) {
        (**self).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemorySessionStore::new();
        store.set("a", "1".into());
        store.set("a", "2".into());
        assert_eq!(store.get("a").as_deref(), Some("2"));
        assert_eq!(store.remove("a").as_deref(), Some("2"));
        assert!(store.remove("a").is_none());

        store.set("b", "x".into());
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn borrowed_store_writes_through() {
        fn put(mut store: impl SessionStore) {
            store.set("k", "v".into());
        }
        let mut store = MemorySessionStore::new();
        put(&mut store);
        assert_eq!(store.get("k").as_deref(), Some("v"));
    }
}
