use crate::error::BrokerError;
use crate::models::Handle;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};

/// Namespace for signature entries in the cache.
pub const SIGNATURE_KEY_PREFIX: &str = "sign:";

pub fn signature_key(handle: &Handle) -> String {
    format!("{}{}", SIGNATURE_KEY_PREFIX, handle.as_str())
}

/// Key-value cache with per-entry TTL.
///
/// `get` and `get_and_delete` return `Ok(None)` for absent or expired keys.
/// Reachability failures must be reported as `DependencyUnavailable`, never
/// folded into `Ok(None)`.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Writes `value` only if `key` is unoccupied. Returns whether the write took effect.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, BrokerError>;

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;

    /// Atomic read-then-remove.
    async fn get_and_delete(&self, key: &str) -> Result<Option<String>, BrokerError>;

    /// Like `get_and_delete`, but also reports how long the entry had left,
    /// so a caller can put it back with [`SignatureStore::set_if_absent`].
    async fn claim(&self, key: &str) -> Result<Option<ClaimedEntry>, BrokerError>;
}

/// A value removed from the store together with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedEntry {
    pub value: String,
    pub remaining: Duration,
}

#[derive(Debug)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process signature store. Expired entries are invisible immediately and
/// evicted lazily or by [`SignatureSweeper`].
#[derive(Debug, Default)]
pub struct MemorySignatureStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemorySignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SignatureStore for MemorySignatureStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, BrokerError> {
        let now = Instant::now();
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: now + ttl,
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                // An expired entry counts as absent.
                if occupied.get().is_expired(now) {
                    occupied.insert(entry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        let now = Instant::now();
        let found = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if found {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn get_and_delete(&self, key: &str) -> Result<Option<String>, BrokerError> {
        Ok(self.claim(key).await?.map(|claimed| claimed.value))
    }

    async fn claim(&self, key: &str) -> Result<Option<ClaimedEntry>, BrokerError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| ClaimedEntry {
                remaining: entry.expires_at.saturating_duration_since(now),
                value: entry.value,
            }))
    }
}

/// Periodically evicts expired signatures until shutdown is signalled.
pub struct SignatureSweeper {
    store: Arc<MemorySignatureStore>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SignatureSweeper {
    pub fn new(
        store: Arc<MemorySignatureStore>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Signature sweeper started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Signature sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    let removed = self.store.purge_expired();
                    if removed > 0 {
                        tracing::debug!("🧹 Evicted {} expired signatures", removed);
                    }
                }
            }
        }
    }
}
