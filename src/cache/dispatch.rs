//! Event-driven invalidation.
//!
//! One table, [`resolve`], maps every event type to the key patterns it
//! makes stale and the activity domain it counts towards. The dispatcher
//! walks each event through `Received -> PatternsResolved -> Deleted ->
//! MetricRecorded`; a pattern that fails to clear is reported and logged
//! but never stops the others.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::activity::ActivityMonitor;
use crate::domain::types::ActivityDomain;

use super::events::{CacheEvent, EventKind};
use super::keys::KeyPattern;
use super::layer::Invalidator;
use super::planner::InvalidationPlan;

const METRIC_INVALIDATION_FAILED: &str = "chirp_invalidation_failed_total";

/// What an event invalidates and which activity it represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub patterns: Vec<KeyPattern>,
    pub domain: ActivityDomain,
    /// Additional `tags` events carried by the event, one per tag.
    pub tag_events: usize,
}

/// The dispatch table.
pub fn resolve(kind: &EventKind) -> Resolution {
    let (patterns, domain, tag_events) = match kind {
        EventKind::PostCreated {
            author_id, tags, ..
        } => (post_patterns(author_id), ActivityDomain::POSTS, tags.len()),
        EventKind::PostDeleted { post_id, author_id } => {
            let mut patterns = post_patterns(author_id);
            patterns.push(KeyPattern::exact(format!("post:{post_id}")));
            (patterns, ActivityDomain::POSTS, 0)
        }
        EventKind::AvatarChanged { user_id } => (
            vec![
                KeyPattern::exact(format!("user:{user_id}")),
                KeyPattern::prefix("user_batch:"),
                KeyPattern::prefix("feed:"),
                KeyPattern::prefix("core_feed:"),
                KeyPattern::prefix("follow_suggestions:"),
            ],
            ActivityDomain::USERS,
            0,
        ),
        EventKind::PostLiked { post_id, liker_id } => (
            vec![
                KeyPattern::exact(format!("post:{post_id}")),
                KeyPattern::prefix(format!("feed:{liker_id}:")),
                KeyPattern::prefix("trending_posts:"),
            ],
            ActivityDomain::LIKES,
            0,
        ),
        EventKind::UserFollowed {
            follower_id,
            followee_id,
        } => (
            vec![
                KeyPattern::prefix(format!("feed:{follower_id}:")),
                KeyPattern::prefix(format!("core_feed:{follower_id}:")),
                KeyPattern::exact(format!("follow_suggestions:{follower_id}")),
                KeyPattern::exact(format!("follow_suggestions:{followee_id}")),
                KeyPattern::exact(format!("user:{followee_id}")),
            ],
            ActivityDomain::FOLLOWS,
            0,
        ),
        EventKind::CommunityJoined {
            community_id,
            user_id,
        }
        | EventKind::CommunityLeft {
            community_id,
            user_id,
        } => (
            vec![
                KeyPattern::exact(format!("community:{community_id}")),
                KeyPattern::prefix(format!("community_members:{community_id}:")),
                KeyPattern::prefix(format!("feed:{user_id}:")),
                KeyPattern::prefix(format!("core_feed:{user_id}:")),
                KeyPattern::exact(format!("follow_suggestions:{user_id}")),
            ],
            ActivityDomain::COMMUNITIES,
            0,
        ),
        EventKind::TagCreated { .. } => (
            vec![KeyPattern::prefix("trending_tags:")],
            ActivityDomain::TAGS,
            0,
        ),
    };

    Resolution {
        patterns,
        domain,
        tag_events,
    }
}

fn post_patterns(author_id: &str) -> Vec<KeyPattern> {
    vec![
        KeyPattern::prefix(format!("feed:{author_id}:")),
        KeyPattern::prefix(format!("core_feed:{author_id}:")),
        KeyPattern::prefix("trending_tags:"),
        KeyPattern::prefix("trending_posts:"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Received,
    PatternsResolved,
    Deleted,
    MetricRecorded,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Received => "received",
            Self::PatternsResolved => "patterns_resolved",
            Self::Deleted => "deleted",
            Self::MetricRecorded => "metric_recorded",
        })
    }
}

/// Outcome of dispatching one event or one batch.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationReport {
    pub events: usize,
    pub state: DispatchState,
    #[serde(serialize_with = "serialize_patterns")]
    pub patterns: Vec<KeyPattern>,
    pub keys_removed: u64,
    /// Patterns that could not be cleared; their entries expire by TTL.
    #[serde(serialize_with = "serialize_patterns")]
    pub failed: Vec<KeyPattern>,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

fn serialize_patterns<S: serde::Serializer>(
    patterns: &[KeyPattern],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(patterns.iter().map(ToString::to_string))
}

/// Applies domain events to the cache and the activity monitor.
pub struct InvalidationDispatcher {
    invalidator: Arc<dyn Invalidator>,
    monitor: Arc<ActivityMonitor>,
}

impl fmt::Debug for InvalidationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationDispatcher").finish_non_exhaustive()
    }
}

impl InvalidationDispatcher {
    pub fn new(invalidator: Arc<dyn Invalidator>, monitor: Arc<ActivityMonitor>) -> Self {
        Self {
            invalidator,
            monitor,
        }
    }

    /// Dispatch a single event.
    pub async fn handle(&self, event: &CacheEvent) -> InvalidationReport {
        let name = event.kind.name();
        debug!(
            event_id = %event.id,
            event_kind = name,
            state = %DispatchState::Received,
            "Dispatching event"
        );

        let resolution = resolve(&event.kind);
        debug!(
            event_id = %event.id,
            patterns = resolution.patterns.len(),
            state = %DispatchState::PatternsResolved,
            "Event patterns resolved"
        );

        let mut report = self.delete(resolution.patterns, 1).await;
        self.record(&resolution.domain, resolution.tag_events, event.timestamp);
        report.state = DispatchState::MetricRecorded;

        self.log_report(name, &report);
        report
    }

    /// Dispatch a batch: patterns are merged so that each key family is
    /// cleared once, then activity is recorded for every event.
    pub async fn handle_batch(&self, events: Vec<CacheEvent>) -> InvalidationReport {
        let plan = InvalidationPlan::from_events(events);
        debug!(
            events = plan.events.len(),
            patterns = plan.patterns.len(),
            state = %DispatchState::PatternsResolved,
            "Batch patterns resolved"
        );

        let patterns = plan.patterns.into_iter().collect();
        let mut report = self.delete(patterns, plan.events.len()).await;
        for (domain, tag_events, timestamp) in &plan.events {
            self.record(domain, *tag_events, *timestamp);
        }
        report.state = DispatchState::MetricRecorded;

        self.log_report("batch", &report);
        report
    }

    async fn delete(&self, patterns: Vec<KeyPattern>, events: usize) -> InvalidationReport {
        let mut keys_removed = 0;
        let mut failed = Vec::new();

        for pattern in &patterns {
            match self.invalidator.invalidate(pattern).await {
                Ok(removed) => keys_removed += removed,
                Err(err) => {
                    warn!(pattern = %pattern, error = %err, "Invalidation pattern not cleared");
                    counter!(METRIC_INVALIDATION_FAILED).increment(1);
                    failed.push(pattern.clone());
                }
            }
        }

        InvalidationReport {
            events,
            state: DispatchState::Deleted,
            patterns,
            keys_removed,
            failed,
        }
    }

    fn record(&self, domain: &ActivityDomain, tag_events: usize, at: OffsetDateTime) {
        self.monitor.record_event(domain, at);
        for _ in 0..tag_events {
            self.monitor.record_event(&ActivityDomain::TAGS, at);
        }
    }

    fn log_report(&self, source: &str, report: &InvalidationReport) {
        if report.is_complete() {
            info!(
                source,
                events = report.events,
                patterns = report.patterns.len(),
                keys_removed = report.keys_removed,
                "Invalidation applied"
            );
        } else {
            let failed: Vec<String> = report.failed.iter().map(ToString::to_string).collect();
            warn!(
                source,
                events = report.events,
                keys_removed = report.keys_removed,
                failed = ?failed,
                "Invalidation partially applied"
            );
        }
    }
}
