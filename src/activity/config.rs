//! Activity thresholds and TTL tables.
//!
//! Both tables are loaded once at startup and treated as immutable. The
//! built-in defaults below are used for any domain or feature that the
//! configuration file omits or gets wrong.

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::types::{ActivityDomain, ActivityTier};

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

const DEFAULT_BUCKET_SECS: u64 = 60;
const DEFAULT_TTL_SECS: u64 = 300;

/// Rate thresholds in events per hour, busiest first. Lower bounds are
/// inclusive: a rate exactly on a threshold belongs to the busier tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    /// Floor of the `VeryLow` band, kept for dashboards and validation.
    /// Classification never reads it: any rate under `low` is `VeryLow`
    /// until the domain has been idle past its dormancy threshold.
    pub very_low: f64,
}

impl TierThresholds {
    pub const fn new(high: f64, medium: f64, low: f64, very_low: f64) -> Self {
        Self {
            high,
            medium,
            low,
            very_low,
        }
    }

    /// Thresholds must be finite, non-negative and non-increasing.
    pub fn validate(&self) -> Result<(), String> {
        let ordered = [self.high, self.medium, self.low, self.very_low];
        if ordered.iter().any(|value| !value.is_finite() || *value < 0.0) {
            return Err("thresholds must be finite and non-negative".to_string());
        }
        if ordered.windows(2).any(|pair| pair[0] < pair[1]) {
            return Err("thresholds must not increase from high to very_low".to_string());
        }
        Ok(())
    }
}

/// Window and dormancy settings for one activity domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainActivityConfig {
    /// Length of the rolling window the rate is computed over.
    pub window: Duration,
    /// Idle time after which the domain is dormant regardless of rate.
    pub dormant_after: Duration,
    /// Granularity of the event-count buckets kept inside the window.
    pub bucket: Duration,
    pub thresholds: TierThresholds,
}

impl DomainActivityConfig {
    pub fn new(window_hours: u64, dormant_after_hours: u64, thresholds: TierThresholds) -> Self {
        Self {
            window: Duration::from_secs(window_hours * HOUR),
            dormant_after: Duration::from_secs(dormant_after_hours * HOUR),
            bucket: Duration::from_secs(DEFAULT_BUCKET_SECS),
            thresholds,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.window.is_zero() {
            return Err("window must be greater than zero".to_string());
        }
        if self.bucket.is_zero() || self.bucket > self.window {
            return Err("bucket must be non-zero and no longer than the window".to_string());
        }
        if self.dormant_after.is_zero() {
            return Err("dormant_after must be greater than zero".to_string());
        }
        self.thresholds.validate()
    }

    pub fn window_hours(&self) -> f64 {
        self.window.as_secs_f64() / HOUR as f64
    }

    pub fn dormant_after_hours(&self) -> f64 {
        self.dormant_after.as_secs_f64() / HOUR as f64
    }
}

/// Per-domain activity configuration with a fallback for unknown domains.
#[derive(Debug, Clone)]
pub struct ActivityConfig {
    pub domains: HashMap<ActivityDomain, DomainActivityConfig>,
    pub fallback: DomainActivityConfig,
}

impl ActivityConfig {
    pub fn for_domain(&self, domain: &ActivityDomain) -> &DomainActivityConfig {
        self.domains.get(domain).unwrap_or(&self.fallback)
    }

    /// Built-in configuration for a well-known domain, if any.
    pub fn builtin(domain: &ActivityDomain) -> Option<DomainActivityConfig> {
        let config = match domain.as_str() {
            "tags" => DomainActivityConfig::new(1, 24, TierThresholds::new(10.0, 2.0, 0.5, 0.1)),
            "posts" => DomainActivityConfig::new(1, 6, TierThresholds::new(60.0, 15.0, 3.0, 0.5)),
            "likes" => {
                DomainActivityConfig::new(1, 6, TierThresholds::new(300.0, 60.0, 10.0, 1.0))
            }
            "follows" => {
                DomainActivityConfig::new(6, 48, TierThresholds::new(20.0, 5.0, 1.0, 0.1))
            }
            "communities" => {
                DomainActivityConfig::new(24, 72, TierThresholds::new(5.0, 1.0, 0.2, 0.05))
            }
            "users" => DomainActivityConfig::new(24, 72, TierThresholds::new(10.0, 2.0, 0.5, 0.1)),
            _ => return None,
        };
        Some(config)
    }

    pub fn builtin_fallback() -> DomainActivityConfig {
        DomainActivityConfig::new(1, 24, TierThresholds::new(10.0, 2.0, 0.5, 0.1))
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        let domains = [
            ActivityDomain::TAGS,
            ActivityDomain::POSTS,
            ActivityDomain::LIKES,
            ActivityDomain::FOLLOWS,
            ActivityDomain::COMMUNITIES,
            ActivityDomain::USERS,
        ]
        .into_iter()
        .filter_map(|domain| Self::builtin(&domain).map(|config| (domain, config)))
        .collect();

        Self {
            domains,
            fallback: Self::builtin_fallback(),
        }
    }
}

/// TTL per activity tier for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTtls {
    pub high: Duration,
    pub medium: Duration,
    pub low: Duration,
    pub very_low: Duration,
    pub dormant: Duration,
}

impl TierTtls {
    pub const fn from_secs(high: u64, medium: u64, low: u64, very_low: u64, dormant: u64) -> Self {
        Self {
            high: Duration::from_secs(high),
            medium: Duration::from_secs(medium),
            low: Duration::from_secs(low),
            very_low: Duration::from_secs(very_low),
            dormant: Duration::from_secs(dormant),
        }
    }

    pub fn get(&self, tier: ActivityTier) -> Duration {
        match tier {
            ActivityTier::High => self.high,
            ActivityTier::Medium => self.medium,
            ActivityTier::Low => self.low,
            ActivityTier::VeryLow => self.very_low,
            ActivityTier::Dormant => self.dormant,
        }
    }

    /// TTLs must be non-zero and non-decreasing from `High` to `Dormant`.
    pub fn validate(&self) -> Result<(), String> {
        let ordered = ActivityTier::ALL.map(|tier| self.get(tier));
        if ordered.iter().any(Duration::is_zero) {
            return Err("ttls must be greater than zero".to_string());
        }
        if ordered.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err("ttls must not decrease from high to dormant".to_string());
        }
        Ok(())
    }
}

/// TTL table of one cached feature, driven by the activity of `domain`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePolicy {
    pub domain: ActivityDomain,
    pub ttls: TierTtls,
}

/// TTL tables per feature plus the global default for unconfigured features.
#[derive(Debug, Clone)]
pub struct TtlConfig {
    pub features: HashMap<String, FeaturePolicy>,
    pub default_ttl: Duration,
}

impl TtlConfig {
    pub const TRENDING_TAGS: &'static str = "trending_tags";
    pub const TRENDING_POSTS: &'static str = "trending_posts";
    pub const FEED: &'static str = "feed";
    pub const CORE_FEED: &'static str = "core_feed";
    pub const FOLLOW_SUGGESTIONS: &'static str = "follow_suggestions";
    pub const USER_BATCH: &'static str = "user_batch";
    pub const COMMUNITY_MEMBERS: &'static str = "community_members";

    /// Built-in table for a well-known feature, if any.
    pub fn builtin(feature: &str) -> Option<FeaturePolicy> {
        let (domain, ttls) = match feature {
            Self::TRENDING_TAGS => (
                ActivityDomain::TAGS,
                TierTtls::from_secs(300, 1_800, DAY, 7 * DAY, 30 * DAY),
            ),
            Self::TRENDING_POSTS => (
                ActivityDomain::LIKES,
                TierTtls::from_secs(60, 300, 1_800, 2 * HOUR, DAY),
            ),
            Self::FEED => (
                ActivityDomain::POSTS,
                TierTtls::from_secs(30, 120, 600, 1_800, 2 * HOUR),
            ),
            Self::CORE_FEED => (
                ActivityDomain::POSTS,
                TierTtls::from_secs(60, 300, 900, HOUR, 4 * HOUR),
            ),
            Self::FOLLOW_SUGGESTIONS => (
                ActivityDomain::FOLLOWS,
                TierTtls::from_secs(600, 1_800, 2 * HOUR, 12 * HOUR, DAY),
            ),
            Self::USER_BATCH => (
                ActivityDomain::USERS,
                TierTtls::from_secs(300, 900, HOUR, 6 * HOUR, DAY),
            ),
            Self::COMMUNITY_MEMBERS => (
                ActivityDomain::COMMUNITIES,
                TierTtls::from_secs(120, 600, HOUR, 6 * HOUR, DAY),
            ),
            _ => return None,
        };
        Some(FeaturePolicy { domain, ttls })
    }

    pub const BUILTIN_FEATURES: [&'static str; 7] = [
        Self::TRENDING_TAGS,
        Self::TRENDING_POSTS,
        Self::FEED,
        Self::CORE_FEED,
        Self::FOLLOW_SUGGESTIONS,
        Self::USER_BATCH,
        Self::COMMUNITY_MEMBERS,
    ];

    pub fn builtin_default_ttl() -> Duration {
        Duration::from_secs(DEFAULT_TTL_SECS)
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        let features = Self::BUILTIN_FEATURES
            .into_iter()
            .filter_map(|name| Self::builtin(name).map(|policy| (name.to_string(), policy)))
            .collect();

        Self {
            features,
            default_ttl: Self::builtin_default_ttl(),
        }
    }
}
