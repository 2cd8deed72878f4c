//! Backing key-value store abstraction.
//!
//! The cache core treats the store as the sole source of truth for expiry:
//! entries are written with a TTL and the store drops them on its own clock.
//! Bloom filter bit arrays live in the same store so every process sharing
//! it agrees on membership.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("key `{key}` holds a value of another type")]
    WrongType { key: String },
    #[error("backing store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// TTL-capable key-value store shared by every instance of the service.
///
/// Patterns accepted by [`KvStore::delete_by_pattern`] use glob syntax where
/// `*` matches any run of characters, e.g. `feed:42:*`.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration)
    -> Result<(), StoreError>;

    /// Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns the number of keys removed.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError>;

    /// Set the given bit offsets in the bit array stored at `key`.
    ///
    /// When the key does not exist yet it is created, and `ttl` (if any)
    /// becomes its expiry. The TTL of an existing key is left untouched.
    ///
    /// Returns whether every offset was already set before the call. The
    /// read and the write are one atomic step, like Redis `SETBIT`
    /// returning the previous bit.
    async fn set_bits(
        &self,
        key: &str,
        offsets: &[u64],
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Read the given bit offsets; a missing key reads as all zeroes.
    async fn get_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>, StoreError>;
}
