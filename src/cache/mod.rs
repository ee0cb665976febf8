//! Cache management module
//!
//! Provides the key/value cache the plugin manager keeps its active-plugin
//! set in, plus an in-process implementation.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Key/value store with per-entry time-to-live
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a live entry, if any
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store an entry that expires after `ttl`
    async fn set(&self, key: &str, value: Value, ttl: Duration);

    /// Remove an entry; returns whether one was present
    async fn forget(&self, key: &str) -> bool;
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-process cache backed by a hash map
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Remove `key` only if it is still expired at `now`
fn remove_if_expired(entries: &mut HashMap<String, CacheEntry>, key: &str, now: Instant) -> bool {
    match entries.get(key) {
        Some(entry) if entry.expires_at <= now => entries.remove(key).is_some(),
        _ => false,
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired; a concurrent `set` may have replaced it since
        let mut entries = self.entries.write().await;
        remove_if_expired(&mut entries, key, Instant::now());
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn forget(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }
}
