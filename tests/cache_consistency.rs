//! Every write event clears exactly the reads it affects.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chirp::activity::ManualClock;
use chirp::application::CoreServices;
use chirp::cache::EventKind;
use chirp::config::Settings;
use chirp::domain::types::ActivityDomain;
use chirp::infra::KvStore;

const KEYS: &[&str] = &[
    "feed:alice:page:1",
    "feed:alice:page:2",
    "feed:bob:page:1",
    "core_feed:alice:page:1",
    "core_feed:bob:page:1",
    "trending_tags:1h",
    "trending_posts:24h",
    "follow_suggestions:alice",
    "follow_suggestions:bob",
    "follow_suggestions:carol",
    "user:alice",
    "user:bob",
    "user_batch:42",
    "post:p1",
    "post:p2",
    "community:c1",
    "community_members:c1:page:1",
    "community_members:c2:page:1",
];

fn services() -> CoreServices {
    CoreServices::with_clock(&Settings::default(), Arc::new(ManualClock::default()))
}

async fn seed(services: &CoreServices) {
    for key in KEYS {
        services
            .store
            .set_with_ttl(key, Bytes::from_static(b"[]"), Duration::from_secs(600))
            .await
            .expect("store online");
    }
}

async fn surviving(services: &CoreServices) -> BTreeSet<&'static str> {
    let mut alive = BTreeSet::new();
    for key in KEYS {
        if services.store.get(key).await.expect("store online").is_some() {
            alive.insert(*key);
        }
    }
    alive
}

async fn removed_by(kind: EventKind) -> BTreeSet<&'static str> {
    let services = services();
    seed(&services).await;
    services.trigger.trigger(kind, true).await;
    let alive = surviving(&services).await;
    KEYS.iter().copied().filter(|key| !alive.contains(key)).collect()
}

fn set(keys: &[&'static str]) -> BTreeSet<&'static str> {
    keys.iter().copied().collect()
}

#[tokio::test]
async fn post_created_clears_author_feeds_and_trending() {
    let removed = removed_by(EventKind::PostCreated {
        post_id: "p3".into(),
        author_id: "alice".into(),
        tags: vec!["rust".into()],
    })
    .await;

    assert_eq!(
        removed,
        set(&[
            "feed:alice:page:1",
            "feed:alice:page:2",
            "core_feed:alice:page:1",
            "trending_tags:1h",
            "trending_posts:24h",
        ])
    );
}

#[tokio::test]
async fn post_deleted_also_clears_the_post() {
    let removed = removed_by(EventKind::PostDeleted {
        post_id: "p1".into(),
        author_id: "bob".into(),
    })
    .await;

    assert_eq!(
        removed,
        set(&[
            "feed:bob:page:1",
            "core_feed:bob:page:1",
            "trending_tags:1h",
            "trending_posts:24h",
            "post:p1",
        ])
    );
}

#[tokio::test]
async fn avatar_change_clears_every_feed_and_batch() {
    let removed = removed_by(EventKind::AvatarChanged {
        user_id: "alice".into(),
    })
    .await;

    assert_eq!(
        removed,
        set(&[
            "feed:alice:page:1",
            "feed:alice:page:2",
            "feed:bob:page:1",
            "core_feed:alice:page:1",
            "core_feed:bob:page:1",
            "follow_suggestions:alice",
            "follow_suggestions:bob",
            "follow_suggestions:carol",
            "user:alice",
            "user_batch:42",
        ])
    );
}

#[tokio::test]
async fn like_clears_post_liker_feed_and_trending_posts() {
    let removed = removed_by(EventKind::PostLiked {
        post_id: "p2".into(),
        liker_id: "bob".into(),
    })
    .await;

    assert_eq!(
        removed,
        set(&["post:p2", "feed:bob:page:1", "trending_posts:24h"])
    );
}

#[tokio::test]
async fn follow_clears_both_sides() {
    let removed = removed_by(EventKind::UserFollowed {
        follower_id: "alice".into(),
        followee_id: "bob".into(),
    })
    .await;

    assert_eq!(
        removed,
        set(&[
            "feed:alice:page:1",
            "feed:alice:page:2",
            "core_feed:alice:page:1",
            "follow_suggestions:alice",
            "follow_suggestions:bob",
            "user:bob",
        ])
    );
}

#[tokio::test]
async fn membership_changes_clear_community_and_member_reads() {
    for kind in [
        EventKind::CommunityJoined {
            community_id: "c1".into(),
            user_id: "carol".into(),
        },
        EventKind::CommunityLeft {
            community_id: "c1".into(),
            user_id: "carol".into(),
        },
    ] {
        let removed = removed_by(kind).await;
        assert_eq!(
            removed,
            set(&[
                "community:c1",
                "community_members:c1:page:1",
                "follow_suggestions:carol",
            ])
        );
    }
}

#[tokio::test]
async fn new_tag_clears_trending_tags_only() {
    let removed = removed_by(EventKind::TagCreated { tag: "zig".into() }).await;
    assert_eq!(removed, set(&["trending_tags:1h"]));
}

#[tokio::test]
async fn deferred_events_apply_on_the_next_consume() {
    let services = services();
    seed(&services).await;

    services
        .trigger
        .trigger(
            EventKind::PostLiked {
                post_id: "p1".into(),
                liker_id: "alice".into(),
            },
            false,
        )
        .await;
    services
        .trigger
        .trigger(EventKind::TagCreated { tag: "go".into() }, false)
        .await;

    assert_eq!(surviving(&services).await.len(), KEYS.len());
    assert_eq!(services.queue.len(), 2);

    let report = services.consumer.consume().await.expect("pending events");
    assert!(report.is_complete());
    assert_eq!(report.events, 2);

    let alive = surviving(&services).await;
    for key in ["post:p1", "feed:alice:page:1", "trending_posts:24h", "trending_tags:1h"] {
        assert!(!alive.contains(key), "{key} should be gone");
    }
    assert_eq!(
        services.monitor.current_rate(&ActivityDomain::LIKES),
        1.0,
        "one like recorded over a one-hour window"
    );
}

#[tokio::test]
async fn store_outage_leaves_patterns_unresolved() {
    let services = services();
    seed(&services).await;
    services.store.set_offline(true);

    services
        .trigger
        .trigger(EventKind::TagCreated { tag: "go".into() }, false)
        .await;
    let report = services.consumer.consume().await.expect("pending events");

    assert!(!report.is_complete());
    assert_eq!(report.failed.len(), 1);
    services.store.set_offline(false);
    assert!(services.store.get("trending_tags:1h").await.expect("online").is_some());
}
