//! Identity cache: at most one live instance per (class, identifier).
//!
//! Retrieving the same row twice through a session yields the same
//! [`EntityRef`], so changes made through one handle are visible through
//! every other. The cache belongs to a single session (one request) and is
//! never shared process-wide.
//!
//! # Example
//!
//! ```ignore
//! let mut cache = IdentityCache::new();
//! let post = cache.register(post_ref);
//! let again = cache.get("Post", 1).unwrap();
//! assert!(post.ptr_eq(&again));
//! ```

use crate::entity::EntityRef;
use std::collections::HashMap;

/// Map from (concrete class name, identifier) to the live instance.
#[derive(Default)]
pub struct IdentityCache {
    entries: HashMap<(&'static str, i64), EntityRef>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached instance for a (class, id) pair.
    pub fn get(&self, class: &'static str, id: i64) -> Option<EntityRef> {
        self.entries.get(&(class, id)).cloned()
    }

    /// Register a persisted instance.
    ///
    /// If another instance is already cached under the same key, that one is
    /// returned and `entity` is ignored. Unpersisted instances are returned
    /// as-is without being cached.
    pub fn register(&mut self, entity: EntityRef) -> EntityRef {
        let (class, id) = {
            let guard = entity.read();
            (guard.class(), guard.id())
        };
        let Some(id) = id else {
            return entity;
        };
        self.entries.entry((class, id)).or_insert(entity).clone()
    }

    pub fn contains(&self, class: &'static str, id: i64) -> bool {
        self.entries.contains_key(&(class, id))
    }

    /// Remove an instance, returning it if it was cached.
    pub fn evict(&mut self, class: &'static str, id: i64) -> Option<EntityRef> {
        self.entries.remove(&(class, id))
    }

    /// Remove every instance of `class`, returning how many were evicted.
    pub fn evict_class(&mut self, class: &'static str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(cached, _), _| *cached != class);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort_unstable();
        f.debug_struct("IdentityCache").field("keys", &keys).finish()
    }
}
