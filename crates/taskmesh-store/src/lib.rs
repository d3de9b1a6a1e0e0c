//! The shared key-value store boundary.
//!
//! All mutable state in taskmesh lives behind [`KvStore`]: worker records
//! (with TTL), task records, role index sets, and the result cache. The
//! trait mirrors the primitives of a networked KV store so a remote backend
//! can be dropped in without touching the registry or broker;
//! [`MemoryStore`] is the single-node implementation used by tests and
//! embedded deployments.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use taskmesh_core::MeshResult;
use tokio::sync::RwLock;

/// Atomic single-key and set-index operations over shared state.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value; expired entries read as absent.
    async fn get(&self, key: &str) -> MeshResult<Option<Value>>;
    /// Write a value. An existing expiry on the key is kept.
    async fn put(&self, key: &str, value: Value) -> MeshResult<()>;
    /// Write a value and (re)start its expiry clock.
    async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> MeshResult<()>;
    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> MeshResult<()>;
    /// Add a member to an index set.
    async fn set_add(&self, set: &str, member: &str) -> MeshResult<()>;
    /// Remove a member from an index set.
    async fn set_remove(&self, set: &str, member: &str) -> MeshResult<()>;
    /// All members of an index set.
    async fn set_members(&self, set: &str) -> MeshResult<Vec<String>>;
    /// All live keys starting with the prefix.
    async fn keys_with_prefix(&self, prefix: &str) -> MeshResult<Vec<String>>;
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process [`KvStore`] with per-entry expiry.
///
/// Expiry is lazy: expired entries are treated as absent on read and
/// physically dropped on the next write or sweep.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every physically-present expired entry. The registry's sweep
    /// loop calls this alongside its own index cleanup.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        before - entries.len()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> MeshResult<Option<Value>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: Value) -> MeshResult<()> {
        let mut entries = self.entries.write().await;
        let expires_at = entries
            .get(key)
            .filter(|e| !e.is_expired())
            .and_then(|e| e.expires_at);
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> MeshResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> MeshResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn set_add(&self, set: &str, member: &str) -> MeshResult<()> {
        self.sets
            .write()
            .await
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> MeshResult<()> {
        let mut sets = self.sets.write().await;
        if let Some(members) = sets.get_mut(set) {
            members.remove(member);
            if members.is_empty() {
                sets.remove(set);
            }
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> MeshResult<Vec<String>> {
        let sets = self.sets.read().await;
        Ok(sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> MeshResult<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired())
            .map(|(k, _)| k.clone())
            .collect())
    }
}
