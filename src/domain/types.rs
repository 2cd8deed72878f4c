//! Shared domain enumerations for activity tracking.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discrete classification of how busy a platform feature currently is.
///
/// Variants are declared from busiest to quietest, so the derived ordering
/// satisfies `High < Medium < Low < VeryLow < Dormant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityTier {
    High,
    Medium,
    Low,
    VeryLow,
    Dormant,
}

impl ActivityTier {
    /// All tiers, busiest first.
    pub const ALL: [ActivityTier; 5] = [
        ActivityTier::High,
        ActivityTier::Medium,
        ActivityTier::Low,
        ActivityTier::VeryLow,
        ActivityTier::Dormant,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityTier::High => "high",
            ActivityTier::Medium => "medium",
            ActivityTier::Low => "low",
            ActivityTier::VeryLow => "very_low",
            ActivityTier::Dormant => "dormant",
        }
    }
}

impl fmt::Display for ActivityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown activity tier `{0}`")]
pub struct ParseTierError(String);

impl FromStr for ActivityTier {
    type Err = ParseTierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(ActivityTier::High),
            "medium" => Ok(ActivityTier::Medium),
            "low" => Ok(ActivityTier::Low),
            "very_low" | "very-low" | "verylow" => Ok(ActivityTier::VeryLow),
            "dormant" => Ok(ActivityTier::Dormant),
            other => Err(ParseTierError(other.to_string())),
        }
    }
}

/// Name of an activity domain (`tags`, `posts`, ...).
///
/// Domains are open-ended: any name is accepted and tracked from its first
/// recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityDomain(Cow<'static, str>);

impl ActivityDomain {
    pub const TAGS: ActivityDomain = ActivityDomain(Cow::Borrowed("tags"));
    pub const POSTS: ActivityDomain = ActivityDomain(Cow::Borrowed("posts"));
    pub const LIKES: ActivityDomain = ActivityDomain(Cow::Borrowed("likes"));
    pub const FOLLOWS: ActivityDomain = ActivityDomain(Cow::Borrowed("follows"));
    pub const COMMUNITIES: ActivityDomain = ActivityDomain(Cow::Borrowed("communities"));
    pub const USERS: ActivityDomain = ActivityDomain(Cow::Borrowed("users"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into().trim().to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActivityDomain {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
