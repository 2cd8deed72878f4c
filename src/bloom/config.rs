//! Bloom filter families.
//!
//! A family is the text before the first `:` of a filter key, so
//! `post_views:9f2c` is an instance of the `post_views` family. Lazily
//! created instances take their sizing from the family configuration.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::params::{BloomError, BloomParams};

const DAY: u64 = 24 * 60 * 60;

/// What `test` answers when the backing store cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Answer "not present". Suits hints where a miss only costs an extra
    /// authoritative lookup.
    FailOpen,
    /// Answer "present". Suits deduplication where double counting is worse
    /// than skipping a count.
    FailClosed,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailOpen => "fail_open",
            Self::FailClosed => "fail_closed",
        }
    }

    /// The membership answer used when the store is unavailable.
    pub fn fallback_answer(self) -> bool {
        matches!(self, Self::FailClosed)
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail_open" | "open" => Ok(Self::FailOpen),
            "fail_closed" | "closed" => Ok(Self::FailClosed),
            other => Err(format!(
                "unknown store error policy `{other}`, expected fail_open or fail_closed"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomFamilyConfig {
    pub expected_items: u64,
    pub false_positive_rate: f64,
    /// Lifetime of each instance; `None` keeps it until reset.
    pub ttl: Option<Duration>,
    pub on_store_error: FailurePolicy,
}

impl BloomFamilyConfig {
    pub fn params(&self) -> Result<BloomParams, BloomError> {
        BloomParams::optimal(self.expected_items, self.false_positive_rate)
    }
}

#[derive(Debug, Clone)]
pub struct BloomConfig {
    pub families: HashMap<String, BloomFamilyConfig>,
    pub fallback: BloomFamilyConfig,
}

impl BloomConfig {
    pub const USERNAME: &'static str = "username";
    pub const POST_VIEWS: &'static str = "post_views";

    pub fn for_family(&self, family: &str) -> &BloomFamilyConfig {
        self.families.get(family).unwrap_or(&self.fallback)
    }

    pub fn builtin(family: &str) -> Option<BloomFamilyConfig> {
        match family {
            Self::USERNAME => Some(BloomFamilyConfig {
                expected_items: 500_000,
                false_positive_rate: 0.001,
                ttl: None,
                on_store_error: FailurePolicy::FailOpen,
            }),
            Self::POST_VIEWS => Some(BloomFamilyConfig {
                expected_items: 200_000,
                false_positive_rate: 0.001,
                ttl: Some(Duration::from_secs(180 * DAY)),
                on_store_error: FailurePolicy::FailClosed,
            }),
            _ => None,
        }
    }

    pub fn builtin_fallback() -> BloomFamilyConfig {
        BloomFamilyConfig {
            expected_items: 10_000,
            false_positive_rate: 0.01,
            ttl: None,
            on_store_error: FailurePolicy::FailOpen,
        }
    }
}

impl Default for BloomConfig {
    fn default() -> Self {
        let families = [Self::USERNAME, Self::POST_VIEWS]
            .into_iter()
            .filter_map(|family| Self::builtin(family).map(|config| (family.to_string(), config)))
            .collect();
        Self {
            families,
            fallback: Self::builtin_fallback(),
        }
    }
}

/// Family of a filter key: everything before the first `:`.
pub fn family_of(key: &str) -> &str {
    key.split_once(':').map_or(key, |(family, _)| family)
}
