//! Cache trigger service.
//!
//! Provides a high-level API for publishing domain events and optionally
//! consuming them immediately.

use std::sync::Arc;

use super::consumer::CacheConsumer;
use super::events::{EventKind, EventQueue};

/// Cache trigger for publishing domain events.
///
/// This service wraps the event queue and consumer, providing convenience
/// methods for triggering invalidation from write operations. The
/// convenience methods consume right away so the writer reads its own
/// writes; [`CacheTrigger::trigger`] with `consume_now = false` leaves the
/// event to the periodic consumer.
///
/// # Usage
///
/// ```ignore
/// // After a post was stored:
/// trigger.post_created(&post.id, &post.author_id, &post.tags).await;
/// ```
pub struct CacheTrigger {
    queue: Arc<EventQueue>,
    consumer: Arc<CacheConsumer>,
}

impl CacheTrigger {
    pub fn new(queue: Arc<EventQueue>, consumer: Arc<CacheConsumer>) -> Self {
        Self { queue, consumer }
    }

    /// Publish an event and optionally consume immediately.
    pub async fn trigger(&self, kind: EventKind, consume_now: bool) {
        self.queue.publish(kind);

        if consume_now {
            self.consumer.consume().await;
        }
    }

    pub async fn post_created(&self, post_id: &str, author_id: &str, tags: &[String]) {
        self.trigger(
            EventKind::PostCreated {
                post_id: post_id.to_string(),
                author_id: author_id.to_string(),
                tags: tags.to_vec(),
            },
            true,
        )
        .await;
    }

    pub async fn post_deleted(&self, post_id: &str, author_id: &str) {
        self.trigger(
            EventKind::PostDeleted {
                post_id: post_id.to_string(),
                author_id: author_id.to_string(),
            },
            true,
        )
        .await;
    }

    pub async fn avatar_changed(&self, user_id: &str) {
        self.trigger(
            EventKind::AvatarChanged {
                user_id: user_id.to_string(),
            },
            true,
        )
        .await;
    }

    pub async fn post_liked(&self, post_id: &str, liker_id: &str) {
        self.trigger(
            EventKind::PostLiked {
                post_id: post_id.to_string(),
                liker_id: liker_id.to_string(),
            },
            true,
        )
        .await;
    }

    pub async fn user_followed(&self, follower_id: &str, followee_id: &str) {
        self.trigger(
            EventKind::UserFollowed {
                follower_id: follower_id.to_string(),
                followee_id: followee_id.to_string(),
            },
            true,
        )
        .await;
    }

    pub async fn community_joined(&self, community_id: &str, user_id: &str) {
        self.trigger(
            EventKind::CommunityJoined {
                community_id: community_id.to_string(),
                user_id: user_id.to_string(),
            },
            true,
        )
        .await;
    }

    pub async fn community_left(&self, community_id: &str, user_id: &str) {
        self.trigger(
            EventKind::CommunityLeft {
                community_id: community_id.to_string(),
                user_id: user_id.to_string(),
            },
            true,
        )
        .await;
    }

    pub async fn tag_created(&self, tag: &str) {
        self.trigger(
            EventKind::TagCreated {
                tag: tag.to_string(),
            },
            true,
        )
        .await;
    }

    /// Get the underlying event queue.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Get the underlying consumer.
    pub fn consumer(&self) -> &Arc<CacheConsumer> {
        &self.consumer
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::activity::{
        ActivityConfig, ActivityMonitor, AdaptiveTtlPolicy, ManualClock, TtlConfig,
    };
    use crate::cache::config::CacheConfig;
    use crate::cache::dispatch::InvalidationDispatcher;
    use crate::cache::layer::CacheLayer;
    use crate::domain::types::ActivityDomain;
    use crate::infra::MemoryKvStore;

    fn create_trigger() -> (Arc<ActivityMonitor>, CacheTrigger) {
        let clock = Arc::new(ManualClock::default());
        let monitor = Arc::new(ActivityMonitor::new(ActivityConfig::default(), clock.clone()));
        let policy = Arc::new(AdaptiveTtlPolicy::new(TtlConfig::default(), monitor.clone()));
        let layer = Arc::new(CacheLayer::new(
            Arc::new(MemoryKvStore::new()),
            policy,
            &CacheConfig::default(),
        ));
        let dispatcher = Arc::new(InvalidationDispatcher::new(layer, monitor.clone()));
        let queue = Arc::new(EventQueue::new(NonZeroUsize::new(100).unwrap(), clock));
        let consumer = Arc::new(CacheConsumer::new(
            NonZeroUsize::new(100).unwrap(),
            queue.clone(),
            dispatcher,
        ));

        (monitor, CacheTrigger::new(queue, consumer))
    }

    #[tokio::test]
    async fn trigger_publishes_event() {
        let (_monitor, trigger) = create_trigger();

        // Before: queue is empty
        assert!(trigger.queue.is_empty());

        // Trigger without immediate consumption
        trigger
            .trigger(EventKind::TagCreated { tag: "t".into() }, false)
            .await;

        // After: queue has one event (not consumed since consume_now=false)
        assert_eq!(trigger.queue.len(), 1);
    }

    #[tokio::test]
    async fn convenience_methods_consume_immediately() {
        let (monitor, trigger) = create_trigger();

        trigger.post_created("p", "a", &["rust".to_string()]).await;
        trigger.post_deleted("p", "a").await;
        trigger.avatar_changed("u").await;
        trigger.post_liked("p", "u").await;
        trigger.user_followed("a", "b").await;
        trigger.community_joined("c", "u").await;
        trigger.community_left("c", "u").await;
        trigger.tag_created("rust").await;

        // All events should have been consumed
        assert!(trigger.queue.is_empty());
        assert_eq!(monitor.current_rate(&ActivityDomain::POSTS), 2.0);
        assert_eq!(monitor.current_rate(&ActivityDomain::TAGS), 2.0);
        assert_eq!(monitor.current_rate(&ActivityDomain::COMMUNITIES), 2.0 / 24.0);
    }
}
