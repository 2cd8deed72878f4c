//! Composition root: every cache-core component, wired once from settings.

use std::sync::Arc;

use tracing::{debug, info};

use crate::activity::{ActivityMonitor, AdaptiveTtlPolicy, Clock, SystemClock};
use crate::bloom::BloomFilterStore;
use crate::cache::{
    CacheConfig, CacheConsumer, CacheLayer, CacheTrigger, EventQueue, InvalidationDispatcher,
    Invalidator,
};
use crate::config::Settings;
use crate::infra::{KvStore, MemoryKvStore};

use super::feeds::FeedCache;
use super::usernames::UsernameHints;
use super::views::ViewDeduplicator;

/// Entries removed by one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub store_entries: usize,
    pub bloom_instances: usize,
}

#[derive(Clone)]
pub struct CoreServices {
    pub config: CacheConfig,
    pub store: Arc<MemoryKvStore>,
    pub clock: Arc<dyn Clock>,
    pub monitor: Arc<ActivityMonitor>,
    pub ttl_policy: Arc<AdaptiveTtlPolicy>,
    pub cache: Arc<CacheLayer>,
    pub dispatcher: Arc<InvalidationDispatcher>,
    pub queue: Arc<EventQueue>,
    pub consumer: Arc<CacheConsumer>,
    pub trigger: Arc<CacheTrigger>,
    pub blooms: Arc<BloomFilterStore>,
    pub feeds: FeedCache,
    pub views: ViewDeduplicator,
    pub usernames: UsernameHints,
}

impl std::fmt::Debug for CoreServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreServices")
            .field("config", &self.config)
            .field("queue_len", &self.queue.len())
            .field("bloom_instances", &self.blooms.len())
            .finish()
    }
}

impl CoreServices {
    /// Build the services over the in-process store and the system clock.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        let config = CacheConfig::from(&settings.cache);
        let store = Arc::new(MemoryKvStore::new());
        let shared_store: Arc<dyn KvStore> = store.clone();

        let monitor = Arc::new(ActivityMonitor::new(
            settings.activity.clone(),
            Arc::clone(&clock),
        ));
        let ttl_policy = Arc::new(AdaptiveTtlPolicy::new(
            settings.ttl.clone(),
            Arc::clone(&monitor),
        ));
        let cache = Arc::new(CacheLayer::new(
            Arc::clone(&shared_store),
            Arc::clone(&ttl_policy),
            &config,
        ));

        let invalidator: Arc<dyn Invalidator> = cache.clone();
        let dispatcher = Arc::new(InvalidationDispatcher::new(
            invalidator,
            Arc::clone(&monitor),
        ));
        let queue = Arc::new(EventQueue::new(
            config.event_queue_limit_non_zero(),
            Arc::clone(&clock),
        ));
        let consumer = Arc::new(CacheConsumer::new(
            config.consume_batch_limit_non_zero(),
            Arc::clone(&queue),
            Arc::clone(&dispatcher),
        ));
        let trigger = Arc::new(CacheTrigger::new(Arc::clone(&queue), Arc::clone(&consumer)));

        let blooms = Arc::new(BloomFilterStore::new(
            shared_store,
            Arc::clone(&clock),
            settings.bloom.clone(),
        ));

        info!(
            cache_enabled = config.enabled,
            features = settings.ttl.features.len(),
            domains = settings.activity.domains.len(),
            bloom_families = settings.bloom.families.len(),
            "Cache core services composed"
        );

        Self {
            feeds: FeedCache::new(Arc::clone(&cache)),
            views: ViewDeduplicator::new(Arc::clone(&blooms)),
            usernames: UsernameHints::new(Arc::clone(&blooms)),
            config,
            store,
            clock,
            monitor,
            ttl_policy,
            cache,
            dispatcher,
            queue,
            consumer,
            trigger,
            blooms,
        }
    }

    /// Drop expired store entries and expired Bloom instances.
    pub fn purge_expired(&self) -> PurgeStats {
        let stats = PurgeStats {
            store_entries: self.store.purge_expired(),
            bloom_instances: self.blooms.purge_expired(),
        };
        if stats != PurgeStats::default() {
            debug!(
                store_entries = stats.store_entries,
                bloom_instances = stats.bloom_instances,
                "Expired entries purged"
            );
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use time::Duration;

    use super::*;
    use crate::activity::ManualClock;
    use crate::domain::types::{ActivityDomain, ActivityTier};

    fn settings() -> Settings {
        Settings::default()
    }

    #[tokio::test]
    async fn writes_invalidate_reads() {
        let services = CoreServices::with_clock(&settings(), Arc::new(ManualClock::default()));

        let first: Vec<String> = services
            .feeds
            .feed("alice", 1, || async { Ok::<_, Infallible>(vec!["old".into()]) })
            .await
            .unwrap();
        assert_eq!(first, vec!["old".to_string()]);

        services
            .trigger
            .post_created("p9", "alice", &["rust".to_string()])
            .await;

        let second: Vec<String> = services
            .feeds
            .feed("alice", 1, || async { Ok::<_, Infallible>(vec!["new".into()]) })
            .await
            .unwrap();
        assert_eq!(second, vec!["new".to_string()]);
        assert!(services.queue.is_empty());
    }

    #[tokio::test]
    async fn purge_reports_expired_bloom_instances() {
        let clock = Arc::new(ManualClock::default());
        let services = CoreServices::with_clock(&settings(), clock.clone());

        assert!(services.views.record_view("p1", "bob").await);
        assert_eq!(services.blooms.len(), 1);

        clock.advance(Duration::days(181));
        let stats = services.purge_expired();
        assert_eq!(stats.bloom_instances, 1);
        assert!(services.blooms.is_empty());
    }

    #[tokio::test]
    async fn events_feed_the_activity_monitor() {
        let services = CoreServices::with_clock(&settings(), Arc::new(ManualClock::default()));
        for n in 0..15 {
            services.trigger.tag_created(&format!("t{n}")).await;
        }
        assert_eq!(
            services.monitor.current_tier(&ActivityDomain::TAGS),
            ActivityTier::High
        );
    }
}
