//! Typed read paths over [`CacheLayer`].
//!
//! Each helper builds the canonical key and picks the matching TTL table,
//! so callers only supply the compute function for a miss.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::activity::TtlConfig;
use crate::cache::{CacheKey, CacheLayer};

#[derive(Debug, Clone)]
pub struct FeedCache {
    layer: Arc<CacheLayer>,
}

impl FeedCache {
    pub fn new(layer: Arc<CacheLayer>) -> Self {
        Self { layer }
    }

    pub fn layer(&self) -> &Arc<CacheLayer> {
        &self.layer
    }

    /// Personal home feed page of `user`.
    pub async fn feed<T, E, F, Fut>(&self, user: &str, page: u32, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.layer
            .get_or_compute(&CacheKey::feed(user, page), TtlConfig::FEED, compute)
            .await
    }

    /// The follow-graph-only variant of the feed, shared by the ranker.
    pub async fn core_feed<T, E, F, Fut>(
        &self,
        user: &str,
        page: u32,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.layer
            .get_or_compute(
                &CacheKey::core_feed(user, page),
                TtlConfig::CORE_FEED,
                compute,
            )
            .await
    }

    pub async fn trending_tags<T, E, F, Fut>(&self, window: &str, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.layer
            .get_or_compute(
                &CacheKey::trending_tags(window),
                TtlConfig::TRENDING_TAGS,
                compute,
            )
            .await
    }

    pub async fn trending_posts<T, E, F, Fut>(&self, window: &str, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.layer
            .get_or_compute(
                &CacheKey::trending_posts(window),
                TtlConfig::TRENDING_POSTS,
                compute,
            )
            .await
    }

    pub async fn follow_suggestions<T, E, F, Fut>(&self, user: &str, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.layer
            .get_or_compute(
                &CacheKey::follow_suggestions(user),
                TtlConfig::FOLLOW_SUGGESTIONS,
                compute,
            )
            .await
    }

    /// Profiles for a set of users. The key does not depend on the order
    /// or multiplicity of `ids`.
    pub async fn user_batch<T, E, F, Fut>(&self, ids: &[&str], compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.layer
            .get_or_compute(&CacheKey::user_batch(ids), TtlConfig::USER_BATCH, compute)
            .await
    }

    pub async fn community_members<T, E, F, Fut>(
        &self,
        community: &str,
        page: u32,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.layer
            .get_or_compute(
                &CacheKey::community_members(community, page),
                TtlConfig::COMMUNITY_MEMBERS,
                compute,
            )
            .await
    }
}
