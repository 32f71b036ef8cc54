//! Namespaced shared memory for coordination state.
//!
//! The memory store is the only resource mutated by multiple concurrent
//! components, so its rules are deliberately simple: writes are scoped per
//! namespace, last-writer-wins per key with a monotonic version counter,
//! and no cross-key transactions. A namespace is exclusively writable by
//! the component that created it unless explicitly shared; reads are
//! always allowed within a coordination session.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A stored value with its version and expiry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// The stored value.
    pub value: serde_json::Value,
    /// Monotonic per-key version, starting at 1.
    pub version: u64,
    /// When this version was written.
    pub written_at: DateTime<Utc>,
    /// Expiry instant, if the entry was written with a TTL.
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Memory Store Interface consumed by the engine.
///
/// Backends are pluggable; the engine ships [`InMemoryStore`] and tests
/// run against it. Writes must fail atomically per key: a returned error
/// means the key was not modified.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Write a value, returning the new version for the key.
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<u64>;

    /// Read an entry. `None` for missing or expired keys.
    async fn get(&self, namespace: &str, key: &str) -> Option<MemoryEntry>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;

    /// List keys matching `pattern` (`*` suffix for prefix match, `*` for
    /// all), sorted for deterministic iteration.
    async fn list(&self, namespace: &str, pattern: &str) -> Vec<String>;
}

#[derive(Debug, Default)]
struct Namespace {
    owner: String,
    shared: bool,
    entries: HashMap<String, MemoryEntry>,
}

/// Process-local memory store backing a coordination session.
///
/// Components interact through [`MemoryHandle`]s obtained from
/// [`InMemoryStore::handle`]; the handle carries the component identity
/// used for namespace ownership checks.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A write handle identifying the calling component.
    pub fn handle(self: &Arc<Self>, component: &str) -> MemoryHandle {
        MemoryHandle {
            store: Arc::clone(self),
            component: component.to_string(),
        }
    }

    /// Mark a namespace as shared: any component may write to it.
    pub async fn share(&self, namespace: &str) {
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .shared = true;
    }

    /// Tear down a namespace and all of its entries.
    pub async fn drop_namespace(&self, namespace: &str) {
        self.namespaces.write().await.remove(namespace);
    }

    /// Names of all existing namespaces, sorted.
    pub async fn namespace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// A component-scoped handle to an [`InMemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    store: Arc<InMemoryStore>,
    component: String,
}

impl MemoryHandle {
    /// The component identity this handle writes as.
    pub fn component(&self) -> &str {
        &self.component
    }
}

fn key_matches(key: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return key.starts_with(prefix);
    }
    key == pattern
}

#[async_trait]
impl MemoryStore for MemoryHandle {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut namespaces = self.store.namespaces.write().await;
        let ns = namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Namespace {
                owner: self.component.clone(),
                shared: false,
                entries: HashMap::new(),
            });

        if !ns.shared && ns.owner != self.component {
            return Err(Error::NamespaceOwned {
                namespace: namespace.to_string(),
                owner: ns.owner.clone(),
            });
        }

        let expires_at = ttl
            .and_then(|d| ChronoDuration::from_std(d).ok())
            .map(|d| now + d);
        let version = ns.entries.get(key).map(|e| e.version + 1).unwrap_or(1);
        ns.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                version,
                written_at: now,
                expires_at,
            },
        );
        Ok(version)
    }

    async fn get(&self, namespace: &str, key: &str) -> Option<MemoryEntry> {
        let now = Utc::now();
        let namespaces = self.store.namespaces.read().await;
        let entry = namespaces.get(namespace)?.entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(entry.clone())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let mut namespaces = self.store.namespaces.write().await;
        let Some(ns) = namespaces.get_mut(namespace) else {
            return Ok(());
        };
        if !ns.shared && ns.owner != self.component {
            return Err(Error::NamespaceOwned {
                namespace: namespace.to_string(),
                owner: ns.owner.clone(),
            });
        }
        ns.entries.remove(key);
        Ok(())
    }

    async fn list(&self, namespace: &str, pattern: &str) -> Vec<String> {
        let now = Utc::now();
        let namespaces = self.store.namespaces.read().await;
        let Some(ns) = namespaces.get(namespace) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = ns
            .entries
            .iter()
            .filter(|(k, e)| key_matches(k, pattern) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}
