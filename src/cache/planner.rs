//! Invalidation plan generation.
//!
//! Merges a batch of domain events into one plan so each key family is
//! cleared once, however many events in the batch touched it.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use time::OffsetDateTime;

use crate::domain::types::ActivityDomain;

use super::dispatch::resolve;
use super::events::CacheEvent;
use super::keys::KeyPattern;

/// Activity to record for one event: its domain, the number of extra tag
/// events it carries and when it happened.
pub type ActivityRecord = (ActivityDomain, usize, OffsetDateTime);

#[derive(Debug, Default)]
pub struct InvalidationPlan {
    /// Patterns to clear, with every pattern already covered by a broader
    /// one removed.
    pub patterns: BTreeSet<KeyPattern>,
    /// One entry per distinct event, in epoch order.
    pub events: Vec<ActivityRecord>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ events: {}, patterns: {} }}",
            self.events.len(),
            self.patterns.len()
        )
    }
}

impl InvalidationPlan {
    /// Merge multiple events into an optimized plan.
    ///
    /// - Deduplicates by event ID
    /// - Orders by epoch
    /// - Drops patterns subsumed by a broader prefix
    pub fn from_events(events: Vec<CacheEvent>) -> Self {
        let mut seen_ids = HashSet::new();
        let mut events: Vec<_> = events
            .into_iter()
            .filter(|event| seen_ids.insert(event.id))
            .collect();
        events.sort_by_key(|event| event.epoch);

        let mut plan = Self::default();
        for event in events {
            let resolution = resolve(&event.kind);
            plan.patterns.extend(resolution.patterns);
            plan.events
                .push((resolution.domain, resolution.tag_events, event.timestamp));
        }
        plan.compact();
        plan
    }

    /// Check if the plan has any actions to execute.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.events.is_empty()
    }

    fn compact(&mut self) {
        let prefixes: Vec<KeyPattern> = self
            .patterns
            .iter()
            .filter(|pattern| matches!(pattern, KeyPattern::Prefix(_)))
            .cloned()
            .collect();
        self.patterns.retain(|pattern| {
            !prefixes
                .iter()
                .any(|prefix| prefix != pattern && pattern.is_covered_by(prefix))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::events::EventKind;

    fn make_event(kind: EventKind, epoch: u64) -> CacheEvent {
        CacheEvent::new(kind, epoch, OffsetDateTime::UNIX_EPOCH)
    }

    fn rendered(plan: &InvalidationPlan) -> Vec<String> {
        plan.patterns.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn avatar_change_subsumes_user_feeds() {
        let events = vec![
            make_event(
                EventKind::PostLiked {
                    post_id: "p1".into(),
                    liker_id: "u1".into(),
                },
                0,
            ),
            make_event(
                EventKind::AvatarChanged {
                    user_id: "u2".into(),
                },
                1,
            ),
        ];
        let plan = InvalidationPlan::from_events(events);
        let patterns = rendered(&plan);

        assert!(patterns.contains(&"feed:*".to_string()));
        assert!(!patterns.contains(&"feed:u1:*".to_string()));
        assert!(patterns.contains(&"post:p1".to_string()));
        assert!(patterns.contains(&"trending_posts:*".to_string()));
        assert_eq!(plan.events.len(), 2);
    }

    #[test]
    fn shared_patterns_are_merged() {
        let events = (0..5)
            .map(|epoch| {
                make_event(
                    EventKind::TagCreated {
                        tag: format!("t{epoch}"),
                    },
                    epoch,
                )
            })
            .collect();
        let plan = InvalidationPlan::from_events(events);

        assert_eq!(rendered(&plan), vec!["trending_tags:*".to_string()]);
        assert_eq!(plan.events.len(), 5);
    }

    #[test]
    fn dedupe_by_event_id() {
        let event = make_event(
            EventKind::PostCreated {
                post_id: "p1".into(),
                author_id: "a1".into(),
                tags: vec!["rust".into()],
            },
            0,
        );

        // Same event twice
        let plan = InvalidationPlan::from_events(vec![event.clone(), event]);

        assert_eq!(plan.events.len(), 1);
        assert_eq!(plan.events[0].1, 1);
    }

    #[test]
    fn events_keep_epoch_order() {
        let plan = InvalidationPlan::from_events(vec![
            make_event(
                EventKind::TagCreated { tag: "b".into() },
                7,
            ),
            make_event(
                EventKind::AvatarChanged {
                    user_id: "u".into(),
                },
                3,
            ),
        ]);
        assert_eq!(plan.events[0].0, ActivityDomain::USERS);
        assert_eq!(plan.events[1].0, ActivityDomain::TAGS);
    }

    #[test]
    fn display_format() {
        let plan = InvalidationPlan::default();
        let display = format!("{}", plan);
        assert!(display.contains("InvalidationPlan"));
        assert!(display.contains("patterns: 0"));
    }

    #[test]
    fn is_empty() {
        assert!(InvalidationPlan::default().is_empty());

        let plan = InvalidationPlan::from_events(vec![make_event(
            EventKind::TagCreated { tag: "x".into() },
            0,
        )]);
        assert!(!plan.is_empty());
    }
}
