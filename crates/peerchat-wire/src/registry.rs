//! Connection registry: bidirectional map between peer names and live
//! connections.
//!
//! The [`ConnectionRegistry`] keeps two maps (name → handle, id → name)
//! behind a single lock, so either direction can be resolved without
//! re-deriving one from the other and the pair can never drift apart.

use crate::connection::{ConnectionHandle, ConnectionId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Inner {
    by_name: HashMap<String, ConnectionHandle>,
    by_id: HashMap<ConnectionId, String>,
}

/// Thread-safe registry of authenticated (or dialed) connections.
///
/// Cloning is cheap and every clone sees the same entries.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `handle`.
    ///
    /// Any previous binding of either the name or the connection is dropped
    /// first, so a peer re-authenticating under a new name, or a name moving
    /// to a fresh connection, keeps the mapping one-to-one.
    pub fn register(&self, name: &str, handle: ConnectionHandle) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let id = handle.id();

        if let Some(old_name) = inner.by_id.remove(&id) {
            inner.by_name.remove(&old_name);
        }
        if let Some(old_handle) = inner.by_name.remove(name) {
            inner.by_id.remove(&old_handle.id());
        }

        inner.by_name.insert(name.to_string(), handle);
        inner.by_id.insert(id, name.to_string());
    }

    /// Remove the entry for `name`. No-op if absent.
    pub fn unregister(&self, name: &str) -> Option<ConnectionHandle> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let handle = inner.by_name.remove(name)?;
        inner.by_id.remove(&handle.id());
        Some(handle)
    }

    /// Remove whatever name is bound to connection `id`, returning it.
    pub fn unregister_handle(&self, id: ConnectionId) -> Option<String> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let name = inner.by_id.remove(&id)?;
        inner.by_name.remove(&name);
        Some(name)
    }

    /// Resolve a peer name to its live connection.
    pub fn lookup_handle(&self, name: &str) -> Option<ConnectionHandle> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_name.get(name).cloned()
    }

    /// Resolve a connection to the peer name bound to it.
    pub fn lookup_name(&self, id: ConnectionId) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_id.get(&id).cloned()
    }

    /// Whether `name` currently has a live connection.
    pub fn contains(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_name.contains_key(name)
    }

    /// Names of all registered peers, sorted.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = inner.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry, returning the handles that were registered.
    pub fn clear(&self) -> Vec<ConnectionHandle> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.by_id.clear();
        inner.by_name.drain().map(|(_, h)| h).collect()
    }

    #[cfg(test)]
    fn assert_bijection(&self) {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        assert_eq!(inner.by_name.len(), inner.by_id.len());
        for (name, handle) in &inner.by_name {
            assert_eq!(inner.by_id.get(&handle.id()), Some(name));
        }
        for (id, name) in &inner.by_id {
            assert_eq!(inner.by_name.get(name).map(|h| h.id()), Some(*id));
        }
    }
}
