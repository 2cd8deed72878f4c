//! Cache key definitions.
//!
//! Keys are semantic strings, `<feature>:<subject>[:<variant>...]`. The
//! first segment names the feature whose TTL table applies. Invalidation
//! patterns are either exact keys or prefix wildcards ending in `*`.

use std::fmt;

use glob::Pattern;
use sha2::{Digest, Sha256};

/// Builders for the keys the read APIs cache under.
pub struct CacheKey;

impl CacheKey {
    pub fn feed(user: &str, page: u32) -> String {
        format!("feed:{user}:page:{page}")
    }

    pub fn core_feed(user: &str, page: u32) -> String {
        format!("core_feed:{user}:page:{page}")
    }

    pub fn trending_tags(window: &str) -> String {
        format!("trending_tags:{window}")
    }

    pub fn trending_posts(window: &str) -> String {
        format!("trending_posts:{window}")
    }

    pub fn follow_suggestions(user: &str) -> String {
        format!("follow_suggestions:{user}")
    }

    pub fn user(user: &str) -> String {
        format!("user:{user}")
    }

    /// Batch lookups are keyed by a digest of the sorted id list.
    pub fn user_batch(ids: &[&str]) -> String {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        format!("user_batch:{}", digest_ids(&sorted))
    }

    pub fn post(post: &str) -> String {
        format!("post:{post}")
    }

    pub fn community(community: &str) -> String {
        format!("community:{community}")
    }

    pub fn community_members(community: &str, page: u32) -> String {
        format!("community_members:{community}:page:{page}")
    }

    /// Feature segment of a key, used to pick its TTL table.
    pub fn feature(key: &str) -> &str {
        key.split_once(':').map_or(key, |(feature, _)| feature)
    }
}

/// An invalidation target: one exact key or every key under a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPattern {
    Exact(String),
    /// Matches every key starting with the stored prefix (the `*` is not
    /// part of it).
    Prefix(String),
}

impl KeyPattern {
    pub fn exact(key: impl Into<String>) -> Self {
        Self::Exact(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Parse `feed:42:*` style notation. Only a trailing `*` is a wildcard.
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }

    /// Whether every key this pattern matches is also matched by `other`.
    pub fn is_covered_by(&self, other: &KeyPattern) -> bool {
        match (self, other) {
            (_, Self::Exact(exact)) => matches!(self, Self::Exact(mine) if mine == exact),
            (Self::Exact(key), Self::Prefix(prefix)) => key.starts_with(prefix.as_str()),
            (Self::Prefix(mine), Self::Prefix(prefix)) => mine.starts_with(prefix.as_str()),
        }
    }

    /// Glob form understood by [`KvStore::delete_by_pattern`](crate::infra::KvStore).
    pub fn as_glob(&self) -> String {
        match self {
            Self::Exact(key) => escape_glob(key),
            Self::Prefix(prefix) => format!("{}*", escape_glob(prefix)),
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => f.write_str(key),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

fn escape_glob(value: &str) -> String {
    Pattern::escape(value)
}

/// Digest of an id list for keys shared across processes.
///
/// SHA-256 keeps the key identical for every build and host writing to the
/// same store. Each id is length-prefixed so `["ab", "c"]` and `["a", "bc"]`
/// differ. Returns the first 8 bytes as lowercase hex.
pub fn digest_ids(ids: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update((id.len() as u64).to_be_bytes());
        hasher.update(id.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
