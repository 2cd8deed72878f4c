//! Unique post views, deduplicated with one Bloom filter per post.

use std::sync::Arc;

use tracing::debug;

use crate::bloom::{BloomConfig, BloomFilterStore};

#[derive(Debug, Clone)]
pub struct ViewDeduplicator {
    blooms: Arc<BloomFilterStore>,
}

impl ViewDeduplicator {
    pub fn new(blooms: Arc<BloomFilterStore>) -> Self {
        Self { blooms }
    }

    fn filter_key(post: &str) -> String {
        format!("{}:{post}", BloomConfig::POST_VIEWS)
    }

    /// Record that `viewer` saw `post`. Returns `true` when the view should
    /// be counted, i.e. the viewer was not seen on this post before.
    ///
    /// Concurrent views by the same viewer count once. A false positive
    /// skips a genuine first view. While the store is down the family's
    /// fail-closed policy skips every count.
    pub async fn record_view(&self, post: &str, viewer: &str) -> bool {
        let counted = self.blooms.insert(&Self::filter_key(post), viewer).await;
        if !counted {
            debug!(post, "Repeated view skipped");
        }
        counted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ManualClock;
    use crate::infra::{KvStore, MemoryKvStore};

    fn dedup() -> (ViewDeduplicator, Arc<MemoryKvStore>) {
        let store = Arc::new(MemoryKvStore::new());
        let blooms = BloomFilterStore::new(
            store.clone() as Arc<dyn KvStore>,
            Arc::new(ManualClock::default()),
            BloomConfig::default(),
        );
        (ViewDeduplicator::new(Arc::new(blooms)), store)
    }

    #[tokio::test]
    async fn counts_each_viewer_once_per_post() {
        let (views, _store) = dedup();

        assert!(views.record_view("p1", "alice").await);
        assert!(!views.record_view("p1", "alice").await);
        assert!(views.record_view("p1", "bob").await);
        assert!(views.record_view("p2", "alice").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_views_count_once() {
        let (views, _store) = dedup();
        let views = Arc::new(views);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let views = Arc::clone(&views);
                tokio::spawn(async move { views.record_view("p1", "alice").await })
            })
            .collect();

        let mut counted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                counted += 1;
            }
        }
        assert_eq!(counted, 1);
    }

    #[tokio::test]
    async fn outage_skips_counting() {
        let (views, store) = dedup();
        store.set_offline(true);
        assert!(!views.record_view("p1", "alice").await);
    }
}
