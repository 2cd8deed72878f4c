//! Cache consumer for applying queued domain events.
//!
//! Drains events from the queue and hands each batch to the dispatcher.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument};
use uuid::Uuid;

use super::dispatch::{InvalidationDispatcher, InvalidationReport};
use super::events::EventQueue;

const METRIC_CACHE_CONSUME_MS: &str = "chirp_cache_consume_ms";

/// Cache consumer that processes events and maintains cache consistency.
///
/// The consumer:
/// 1. Drains up to one batch of events from the queue
/// 2. Merges them into an invalidation plan
/// 3. Clears the planned patterns and records activity
pub struct CacheConsumer {
    batch_limit: NonZeroUsize,
    queue: Arc<EventQueue>,
    dispatcher: Arc<InvalidationDispatcher>,
}

impl CacheConsumer {
    pub fn new(
        batch_limit: NonZeroUsize,
        queue: Arc<EventQueue>,
        dispatcher: Arc<InvalidationDispatcher>,
    ) -> Self {
        Self {
            batch_limit,
            queue,
            dispatcher,
        }
    }

    /// Consume one batch of pending events.
    ///
    /// Returns `None` when the queue was empty.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> Option<InvalidationReport> {
        let consume_started_at = Instant::now();
        let events = self.queue.drain(self.batch_limit.get());
        if events.is_empty() {
            return None;
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();

        // Observable: log consumption start
        info!(event_count, event_ids = ?event_ids, "Cache consumption starting");

        let report = self.dispatcher.handle_batch(events).await;

        info!(
            event_count,
            keys_removed = report.keys_removed,
            failed = report.failed.len(),
            "Cache consumption complete"
        );

        histogram!(METRIC_CACHE_CONSUME_MS)
            .record(consume_started_at.elapsed().as_secs_f64() * 1000.0);

        Some(report)
    }

    /// Consume batches until the queue is empty. Returns the number of
    /// batches processed.
    pub async fn consume_all(&self) -> usize {
        let mut batches = 0;
        while self.consume().await.is_some() {
            batches += 1;
        }
        batches
    }

    /// Get the underlying event queue.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::activity::{
        ActivityConfig, ActivityMonitor, AdaptiveTtlPolicy, ManualClock, TtlConfig,
    };
    use crate::cache::config::CacheConfig;
    use crate::cache::events::EventKind;
    use crate::cache::layer::CacheLayer;
    use crate::domain::types::ActivityDomain;
    use crate::infra::{KvStore, MemoryKvStore};

    struct Fixture {
        store: Arc<MemoryKvStore>,
        monitor: Arc<ActivityMonitor>,
        consumer: CacheConsumer,
    }

    fn fixture(batch_limit: usize) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryKvStore::new());
        let monitor = Arc::new(ActivityMonitor::new(ActivityConfig::default(), clock.clone()));
        let policy = Arc::new(AdaptiveTtlPolicy::new(TtlConfig::default(), monitor.clone()));
        let layer = Arc::new(CacheLayer::new(store.clone(), policy, &CacheConfig::default()));
        let dispatcher = Arc::new(InvalidationDispatcher::new(layer, monitor.clone()));
        let queue = Arc::new(EventQueue::new(NonZeroUsize::new(100).unwrap(), clock));
        let consumer = CacheConsumer::new(NonZeroUsize::new(batch_limit).unwrap(), queue, dispatcher);
        Fixture {
            store,
            monitor,
            consumer,
        }
    }

    async fn seed(store: &MemoryKvStore, keys: &[&str]) {
        for key in keys {
            store
                .set_with_ttl(key, Bytes::from_static(b"1"), Duration::from_secs(600))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let fixture = fixture(10);
        assert!(fixture.consumer.consume().await.is_none());
    }

    #[tokio::test]
    async fn batch_clears_keys_and_records_activity() {
        let fixture = fixture(10);
        seed(&fixture.store, &["trending_tags:24h", "trending_tags:7d", "feed:u1:page:0"]).await;

        for tag in ["a", "b"] {
            fixture
                .consumer
                .queue()
                .publish(EventKind::TagCreated { tag: tag.into() });
        }

        let report = fixture.consumer.consume().await.unwrap();
        assert_eq!(report.events, 2);
        assert_eq!(report.keys_removed, 2);
        assert!(report.is_complete());
        assert_eq!(fixture.store.len(), 1);
        assert_eq!(fixture.monitor.current_rate(&ActivityDomain::TAGS), 2.0);
    }

    #[tokio::test]
    async fn consume_respects_batch_limit() {
        let fixture = fixture(2);
        for tag in ["a", "b", "c", "d", "e"] {
            fixture
                .consumer
                .queue()
                .publish(EventKind::TagCreated { tag: tag.into() });
        }

        let report = fixture.consumer.consume().await.unwrap();
        assert_eq!(report.events, 2);
        assert_eq!(fixture.consumer.queue().len(), 3);

        assert_eq!(fixture.consumer.consume_all().await, 2);
        assert!(fixture.consumer.queue().is_empty());
    }
}
