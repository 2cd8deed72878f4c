//! Named Bloom filter instances over the shared key-value store.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::activity::Clock;
use crate::infra::{KvStore, StoreError};

use super::config::{BloomConfig, FailurePolicy, family_of};
use super::params::{BloomError, BloomParams};

const METRIC_BLOOM_STORE_ERROR: &str = "chirp_bloom_store_error_total";

/// One live filter: its sizing, expiry and store-error policy.
#[derive(Debug, Clone)]
pub struct BloomInstance {
    pub key: String,
    pub params: BloomParams,
    pub expires_at: Option<OffsetDateTime>,
    pub on_store_error: FailurePolicy,
}

impl BloomInstance {
    fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }

    fn remaining(&self, now: OffsetDateTime) -> Option<Duration> {
        self.expires_at
            .map(|at| Duration::try_from(at - now).unwrap_or(Duration::ZERO))
    }
}

/// Registry of Bloom filter instances.
///
/// Instance metadata is kept locally while the bit arrays live in the
/// backing store under `bloom:<key>`, so every process sharing the store
/// agrees on membership. An expired instance is discarded together with its
/// bits and recreated empty on next use.
pub struct BloomFilterStore {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: BloomConfig,
    instances: DashMap<String, Arc<BloomInstance>>,
    /// Serializes instance creation. An expired instance's bits are deleted
    /// while it is held, so no fresh instance can write bits that the delete
    /// would then wipe.
    creating: Mutex<()>,
}

impl std::fmt::Debug for BloomFilterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilterStore")
            .field("config", &self.config)
            .field("instances", &self.instances.len())
            .finish()
    }
}

impl BloomFilterStore {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: BloomConfig) -> Self {
        Self {
            store,
            clock,
            config,
            instances: DashMap::new(),
            creating: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BloomConfig {
        &self.config
    }

    /// Return the live instance for `key`, creating it with the given sizing
    /// when none exists.
    ///
    /// Idempotent: a live instance is returned as-is and the arguments are
    /// ignored. The store-error policy comes from the key's family.
    pub async fn get_or_create(
        &self,
        key: &str,
        expected_items: u64,
        false_positive_rate: f64,
        ttl: Option<Duration>,
    ) -> Result<Arc<BloomInstance>, BloomError> {
        let now = self.clock.now();
        if let Some(instance) = self.live(key, now) {
            return Ok(instance);
        }

        let params = BloomParams::optimal(expected_items, false_positive_rate)?;
        let on_store_error = self.config.for_family(family_of(key)).on_store_error;

        let _creating = self.creating.lock().await;
        let now = self.clock.now();
        if let Some(instance) = self.live(key, now) {
            return Ok(instance);
        }
        self.discard_expired(key, now).await;

        let expires_at = ttl.and_then(|ttl| {
            time::Duration::try_from(ttl)
                .ok()
                .and_then(|ttl| now.checked_add(ttl))
        });
        let created = Arc::new(BloomInstance {
            key: key.to_string(),
            params,
            expires_at,
            on_store_error,
        });

        let instance = Arc::clone(
            self.instances
                .entry(key.to_string())
                .or_insert_with(|| {
                    info!(
                        filter = key,
                        bits = params.bits,
                        hashes = params.hashes,
                        expected_items,
                        false_positive_rate,
                        "Bloom filter created"
                    );
                    created
                })
                .value(),
        );
        Ok(instance)
    }

    /// Insert `item`. Store failures are logged and counted, never surfaced.
    #[instrument(skip(self, item))]
    pub async fn add(&self, key: &str, item: &str) {
        self.insert(key, item).await;
    }

    /// Insert `item` and report whether it was new.
    ///
    /// Checking and setting the bits is one store operation, so of several
    /// concurrent inserts of the same item exactly one sees it as new. A
    /// false positive reports a new item as already present. When the store
    /// fails the answer follows the family's [`FailurePolicy`]: fail-closed
    /// reports "already present", fail-open reports "new".
    #[instrument(skip(self, item))]
    pub async fn insert(&self, key: &str, item: &str) -> bool {
        let instance = match self.family_instance(key).await {
            Ok(instance) => instance,
            Err(err) => {
                warn!(filter = key, error = %err, "Bloom filter family is misconfigured");
                return !self.config.for_family(family_of(key)).on_store_error.fallback_answer();
            }
        };

        let offsets = instance.params.indices(item);
        let ttl = instance.remaining(self.clock.now());
        match self.store.set_bits(&bits_key(key), &offsets, ttl).await {
            Ok(already_present) => !already_present,
            Err(err) => {
                record_store_error(key, "add", &err);
                !instance.on_store_error.fallback_answer()
            }
        }
    }

    /// Probabilistic membership: `false` means definitely absent, `true`
    /// means probably present.
    ///
    /// When the store cannot be read the answer follows the family's
    /// [`FailurePolicy`].
    #[instrument(skip(self, item))]
    pub async fn test(&self, key: &str, item: &str) -> bool {
        let family = family_of(key);
        let instance = match self.family_instance(key).await {
            Ok(instance) => instance,
            Err(err) => {
                warn!(filter = key, error = %err, "Bloom filter family is misconfigured");
                return self.config.for_family(family).on_store_error.fallback_answer();
            }
        };

        let offsets = instance.params.indices(item);
        match self.store.get_bits(&bits_key(key), &offsets).await {
            Ok(bits) => bits.iter().all(|set| *set),
            Err(err) => {
                record_store_error(key, "test", &err);
                let answer = instance.on_store_error.fallback_answer();
                debug!(
                    filter = key,
                    policy = %instance.on_store_error,
                    answer,
                    "Bloom test answered by store error policy"
                );
                answer
            }
        }
    }

    /// Administrative reset: forget the instance and delete its bits.
    ///
    /// Returns whether bits were stored for the key.
    pub async fn reset(&self, key: &str) -> Result<bool, StoreError> {
        let _creating = self.creating.lock().await;
        self.instances.remove(key);
        let removed = self.store.delete(&bits_key(key)).await?;
        info!(filter = key, removed, "Bloom filter reset");
        Ok(removed)
    }

    /// The live instance for `key`, if any.
    pub fn instance(&self, key: &str) -> Option<Arc<BloomInstance>> {
        self.live(key, self.clock.now())
    }

    /// Drop expired instances from the local registry. Their bits are left
    /// to the store's own expiry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.instances.len();
        self.instances.retain(|_, instance| instance.is_live(now));
        before.saturating_sub(self.instances.len())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    async fn family_instance(&self, key: &str) -> Result<Arc<BloomInstance>, BloomError> {
        if let Some(instance) = self.live(key, self.clock.now()) {
            return Ok(instance);
        }
        let family = *self.config.for_family(family_of(key));
        self.get_or_create(
            key,
            family.expected_items,
            family.false_positive_rate,
            family.ttl,
        )
        .await
    }

    fn live(&self, key: &str, now: OffsetDateTime) -> Option<Arc<BloomInstance>> {
        let existing = self
            .instances
            .get(key)
            .map(|entry| Arc::clone(entry.value()));
        existing.filter(|instance| instance.is_live(now))
    }

    /// Caller holds `creating`.
    async fn discard_expired(&self, key: &str, now: OffsetDateTime) {
        let expired = self
            .instances
            .get(key)
            .is_some_and(|instance| !instance.is_live(now));
        if !expired {
            return;
        }
        debug!(filter = key, "Bloom filter expired");
        if let Err(err) = self.store.delete(&bits_key(key)).await {
            record_store_error(key, "expire", &err);
        }
        self.instances
            .remove_if(key, |_, instance| !instance.is_live(now));
    }
}

fn bits_key(key: &str) -> String {
    format!("bloom:{key}")
}

fn record_store_error(key: &str, op: &'static str, err: &StoreError) {
    warn!(filter = key, op, error = %err, "Bloom filter store operation failed");
    counter!(
        METRIC_BLOOM_STORE_ERROR,
        "family" => family_of(key).to_string(),
        "op" => op
    )
    .increment(1);
}
