//! In-process implementation of [`KvStore`].
//!
//! Used by single-node deployments and tests. Expiry is tracked with
//! `tokio::time::Instant`, so paused-clock tests can advance past a TTL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use glob::Pattern;
use tokio::time::Instant;
use tracing::debug;

use super::store::{KvStore, StoreError};

#[derive(Debug)]
enum Payload {
    Value(Bytes),
    Bits(Vec<u64>),
}

#[derive(Debug)]
struct Entry {
    payload: Payload,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// DashMap-backed store with store-native TTL and glob pattern deletion.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
    offline: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails with [`StoreError::Unavailable`]
    /// until switched back on.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Purged expired store entries");
        }
        removed
    }

    /// Number of stored keys, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store is offline"));
        }
        Ok(())
    }

    fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.ensure_online()?;
        self.evict_if_expired(key);
        match self.entries.get(key) {
            Some(entry) => match &entry.payload {
                Payload::Value(bytes) => Ok(Some(bytes.clone())),
                Payload::Bits(_) => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
            },
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                payload: Payload::Value(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        self.ensure_online()?;
        let pattern = Pattern::new(pattern).map_err(StoreError::backend)?;
        let now = Instant::now();
        let mut removed = 0u64;
        self.entries.retain(|key, entry| {
            if pattern.matches(key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn set_bits(
        &self,
        key: &str,
        offsets: &[u64],
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.ensure_online()?;
        self.evict_if_expired(key);

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            payload: Payload::Bits(Vec::new()),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        });
        let Payload::Bits(words) = &mut entry.payload else {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            });
        };

        let mut already_set = true;
        for &offset in offsets {
            let word = usize::try_from(offset / 64).map_err(StoreError::backend)?;
            if word >= words.len() {
                words.resize(word + 1, 0);
            }
            let mask = 1u64 << (offset % 64);
            already_set &= words[word] & mask != 0;
            words[word] |= mask;
        }
        Ok(already_set)
    }

    async fn get_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>, StoreError> {
        self.ensure_online()?;
        self.evict_if_expired(key);

        let Some(entry) = self.entries.get(key) else {
            return Ok(vec![false; offsets.len()]);
        };
        let Payload::Bits(words) = &entry.payload else {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            });
        };

        Ok(offsets
            .iter()
            .map(|&offset| {
                usize::try_from(offset / 64)
                    .ok()
                    .and_then(|word| words.get(word))
                    .is_some_and(|word| word & (1u64 << (offset % 64)) != 0)
            })
            .collect())
    }
}
