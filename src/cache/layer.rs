//! Get-or-compute cache over the shared key-value store.
//!
//! Concurrent misses on one key are coalesced: the first caller (the
//! leader) computes while the others (followers) wait on a watch channel
//! for its result. Followers that give up waiting, or whose leader fails or
//! is cancelled, compute on their own and do not write to the store.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, histogram};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::activity::AdaptiveTtlPolicy;
use crate::infra::{KvStore, StoreError};

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::KeyPattern;

const METRIC_CACHE_HIT: &str = "chirp_cache_hit_total";
const METRIC_CACHE_MISS: &str = "chirp_cache_miss_total";
const METRIC_CACHE_COALESCED: &str = "chirp_cache_coalesced_total";
const METRIC_CACHE_STORE_ERROR: &str = "chirp_cache_store_error_total";
const METRIC_CACHE_COMPUTE_MS: &str = "chirp_cache_compute_ms";
const METRIC_CACHE_INVALIDATED_KEYS: &str = "chirp_cache_invalidated_keys_total";

/// Something that can drop cached entries by pattern.
#[async_trait]
pub trait Invalidator: Send + Sync {
    /// Returns the number of store keys removed.
    async fn invalidate(&self, pattern: &KeyPattern) -> Result<u64, CacheError>;
}

#[derive(Debug, Clone)]
enum FlightState {
    Pending,
    Ready(Bytes),
    Failed,
    Abandoned,
}

#[derive(Debug)]
struct Flight {
    state: watch::Sender<FlightState>,
    /// Set when an invalidation matched the key while the compute ran; the
    /// result then goes to waiters only.
    invalidated: AtomicBool,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: watch::Sender::new(FlightState::Pending),
            invalidated: AtomicBool::new(false),
        }
    }

    fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }
}

/// Owned by the leader. Dropping it, including when the leader's future is
/// cancelled, releases followers and unregisters the flight.
struct FlightGuard<'a> {
    flights: &'a DashMap<String, Arc<Flight>>,
    key: &'a str,
    flight: Arc<Flight>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flight.state.send_if_modified(|state| {
            if matches!(state, FlightState::Pending) {
                *state = FlightState::Abandoned;
                true
            } else {
                false
            }
        });
        self.flights
            .remove_if(self.key, |_, current| Arc::ptr_eq(current, &self.flight));
    }
}

pub struct CacheLayer {
    store: Arc<dyn KvStore>,
    ttl_policy: Arc<AdaptiveTtlPolicy>,
    enabled: bool,
    single_flight_wait: Duration,
    flights: DashMap<String, Arc<Flight>>,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("enabled", &self.enabled)
            .field("single_flight_wait", &self.single_flight_wait)
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

impl CacheLayer {
    pub fn new(
        store: Arc<dyn KvStore>,
        ttl_policy: Arc<AdaptiveTtlPolicy>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            ttl_policy,
            enabled: config.enabled,
            single_flight_wait: config.single_flight_wait(),
            flights: DashMap::new(),
        }
    }

    pub fn ttl_policy(&self) -> &Arc<AdaptiveTtlPolicy> {
        &self.ttl_policy
    }

    /// Number of computations currently registered for coalescing.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// `feature` selects the adaptive TTL table the entry is stored with.
    /// Errors from `compute` are returned as-is and never cached. Store
    /// failures degrade to an uncached compute.
    #[instrument(skip(self, compute))]
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        feature: &str,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return compute().await;
        }

        match self.store.get(key).await {
            Ok(Some(bytes)) => match decode::<T>(key, &bytes) {
                Ok(value) => {
                    counter!(METRIC_CACHE_HIT, "feature" => feature.to_string()).increment(1);
                    debug!(key, "Cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(key, error = %err, "Discarding undecodable cache entry");
                    if let Err(err) = self.store.delete(key).await {
                        self.record_store_error(key, "delete", &err);
                    }
                }
            },
            Ok(None) => {}
            Err(err) => {
                self.record_store_error(key, "get", &err);
                return compute().await;
            }
        }
        counter!(METRIC_CACHE_MISS, "feature" => feature.to_string()).increment(1);

        let (flight, is_leader) = match self.flights.entry(key.to_string()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let flight = Arc::new(Flight::new());
                entry.insert(Arc::clone(&flight));
                (flight, true)
            }
        };

        if is_leader {
            self.lead(key, feature, flight, compute).await
        } else {
            self.follow(key, feature, &flight, compute).await
        }
    }

    /// Delete every entry matching `pattern` and detach matching in-flight
    /// computations so their results are not written back.
    #[instrument(skip(self), fields(pattern = %pattern))]
    pub async fn invalidate(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        let mut detached = 0usize;
        self.flights.retain(|key, flight| {
            if pattern.matches(key) {
                flight.invalidated.store(true, Ordering::SeqCst);
                detached += 1;
                false
            } else {
                true
            }
        });

        let removed = match pattern {
            KeyPattern::Exact(key) => u64::from(self.store.delete(key).await?),
            KeyPattern::Prefix(_) => self.store.delete_by_pattern(&pattern.as_glob()).await?,
        };

        counter!(METRIC_CACHE_INVALIDATED_KEYS).increment(removed);
        debug!(removed, detached, "Cache pattern invalidated");
        Ok(removed)
    }

    async fn lead<T, E, F, Fut>(
        &self,
        key: &str,
        feature: &str,
        flight: Arc<Flight>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let guard = FlightGuard {
            flights: &self.flights,
            key,
            flight,
        };

        // A previous leader may have stored the value after our first read
        // and released its flight before we registered ours.
        match self.store.get(key).await {
            Ok(Some(bytes)) => {
                if let Ok(value) = decode::<T>(key, &bytes) {
                    guard.flight.state.send_replace(FlightState::Ready(bytes));
                    counter!(METRIC_CACHE_HIT, "feature" => feature.to_string()).increment(1);
                    debug!(key, "Cache hit on leader re-check");
                    return Ok(value);
                }
            }
            Ok(None) => {}
            Err(err) => self.record_store_error(key, "get", &err),
        }

        let started_at = Instant::now();
        let result = compute().await;
        histogram!(METRIC_CACHE_COMPUTE_MS, "feature" => feature.to_string())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                guard.flight.state.send_replace(FlightState::Failed);
                return Err(err);
            }
        };

        let encoded = match serde_json::to_vec(&value) {
            Ok(encoded) => Bytes::from(encoded),
            Err(source) => {
                let err = CacheError::Encode {
                    key: key.to_string(),
                    source,
                };
                warn!(key, error = %err, "Computed value not cached");
                guard.flight.state.send_replace(FlightState::Failed);
                return Ok(value);
            }
        };
        guard
            .flight
            .state
            .send_replace(FlightState::Ready(encoded.clone()));

        if guard.flight.is_invalidated() {
            debug!(key, "Invalidated during compute, result not stored");
            return Ok(value);
        }

        let resolved = self.ttl_policy.resolve(feature);
        match self.store.set_with_ttl(key, encoded, resolved.ttl).await {
            Ok(()) => {
                debug!(
                    key,
                    ttl_secs = resolved.ttl.as_secs(),
                    tier = resolved.tier.map(|tier| tier.as_str()),
                    "Cache entry stored"
                );
                // An invalidation that raced the write must not leave it behind.
                if guard.flight.is_invalidated()
                    && let Err(err) = self.store.delete(key).await
                {
                    self.record_store_error(key, "delete", &err);
                }
            }
            Err(err) => self.record_store_error(key, "set", &err),
        }

        drop(guard);
        Ok(value)
    }

    async fn follow<T, E, F, Fut>(
        &self,
        key: &str,
        feature: &str,
        flight: &Flight,
        compute: F,
    ) -> Result<T, E>
    where
        T: DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut receiver = flight.state.subscribe();
        // The borrowed state must be released before computing.
        let ready = match tokio::time::timeout(
            self.single_flight_wait,
            receiver.wait_for(|state| !matches!(state, FlightState::Pending)),
        )
        .await
        {
            Ok(Ok(state)) => match &*state {
                FlightState::Ready(bytes) => Some(bytes.clone()),
                _ => None,
            },
            _ => None,
        };

        if let Some(bytes) = ready {
            match decode::<T>(key, &bytes) {
                Ok(value) => {
                    counter!(METRIC_CACHE_COALESCED, "feature" => feature.to_string())
                        .increment(1);
                    return Ok(value);
                }
                Err(err) => warn!(key, error = %err, "Coalesced value could not be decoded"),
            }
        } else {
            debug!(key, "Single-flight leader unavailable, computing directly");
        }

        compute().await
    }

    fn record_store_error(&self, key: &str, op: &'static str, err: &StoreError) {
        warn!(key, op, error = %err, "Cache store operation failed");
        counter!(METRIC_CACHE_STORE_ERROR, "op" => op).increment(1);
    }
}

#[async_trait]
impl Invalidator for CacheLayer {
    async fn invalidate(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        CacheLayer::invalidate(self, pattern).await
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, CacheError> {
    serde_json::from_slice(bytes).map_err(|source| CacheError::Decode {
        key: key.to_string(),
        source,
    })
}
