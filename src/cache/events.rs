//! Domain event system.
//!
//! Defines the mutation events that drive invalidation and a bounded
//! in-memory queue they are published to.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::activity::Clock;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_EVENT_QUEUE_LEN: &str = "chirp_cache_event_queue_len";
const METRIC_EVENT_DROPPED: &str = "chirp_cache_event_dropped_total";

/// Monotonic epoch for ordering events.
///
/// Each event gets a unique, monotonically increasing epoch number within
/// this process.
pub type Epoch = u64;

/// Domain event with idempotency and ordering support.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    /// Monotonic epoch for ordering within this process.
    pub epoch: Epoch,
    pub kind: EventKind,
    /// When the mutation happened. Activity is recorded at this instant.
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch, timestamp: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp,
        }
    }
}

/// Mutations that make cached results stale.
///
/// Ids are the document store's opaque identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    PostCreated {
        post_id: String,
        author_id: String,
        /// Tags attached to the post; each one counts as tag activity.
        tags: Vec<String>,
    },
    PostDeleted {
        post_id: String,
        author_id: String,
    },
    AvatarChanged {
        user_id: String,
    },
    PostLiked {
        post_id: String,
        liker_id: String,
    },
    UserFollowed {
        follower_id: String,
        followee_id: String,
    },
    CommunityJoined {
        community_id: String,
        user_id: String,
    },
    CommunityLeft {
        community_id: String,
        user_id: String,
    },
    TagCreated {
        tag: String,
    },
}

impl EventKind {
    /// Wire name of the event type, e.g. `post.created`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PostCreated { .. } => "post.created",
            Self::PostDeleted { .. } => "post.deleted",
            Self::AvatarChanged { .. } => "user.avatar_changed",
            Self::PostLiked { .. } => "user.liked",
            Self::UserFollowed { .. } => "user.followed",
            Self::CommunityJoined { .. } => "community.joined",
            Self::CommunityLeft { .. } => "community.left",
            Self::TagCreated { .. } => "tag.created",
        }
    }
}

/// Bounded in-memory event queue for cache invalidation.
///
/// Events are published by write operations and consumed by the cache
/// consumer. When the queue is full the oldest event is dropped; the
/// periodic consumer keeps the backlog short and store TTLs bound the
/// staleness of anything a dropped event would have cleared.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
    limit: NonZeroUsize,
    clock: Arc<dyn Clock>,
}

impl EventQueue {
    pub fn new(limit: NonZeroUsize, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            limit,
            clock,
        }
    }

    /// Get the next epoch number.
    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Publish an event stamped with the current time.
    pub fn publish(&self, kind: EventKind) -> Epoch {
        self.publish_at(kind, self.clock.now())
    }

    /// Publish an event that happened at `timestamp`.
    pub fn publish_at(&self, kind: EventKind, timestamp: OffsetDateTime) -> Epoch {
        let epoch = self.next_epoch();
        let event = CacheEvent::new(kind, epoch, timestamp);

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = event.kind.name(),
            "Domain event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        if queue.len() >= self.limit.get()
            && let Some(dropped) = queue.pop_front()
        {
            warn!(
                event_id = %dropped.id,
                event_kind = dropped.kind.name(),
                limit = self.limit.get(),
                "Event queue full, dropped oldest event"
            );
            counter!(METRIC_EVENT_DROPPED).increment(1);
        }
        queue.push_back(event);
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        epoch
    }

    /// Drain up to `limit` events from the queue.
    ///
    /// Returns the events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let events = queue.drain(..count).collect();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        events
    }

    /// Get the current queue length.
    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all events from the queue.
    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(0.0);
    }

    pub fn limit(&self) -> NonZeroUsize {
        self.limit
    }
}
