//! Activity-driven TTL resolution.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::types::{ActivityDomain, ActivityTier};

use super::config::{TierTtls, TtlConfig};
use super::monitor::ActivityMonitor;

/// Outcome of a TTL lookup, kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTtl {
    /// `None` when the feature has no table and the global default applied.
    pub tier: Option<ActivityTier>,
    pub ttl: Duration,
}

/// Maps `(feature, activity tier)` to how long a computed result may be
/// served: the busier the feature's domain, the shorter the TTL.
#[derive(Debug)]
pub struct AdaptiveTtlPolicy {
    config: TtlConfig,
    monitor: Arc<ActivityMonitor>,
}

impl AdaptiveTtlPolicy {
    pub fn new(config: TtlConfig, monitor: Arc<ActivityMonitor>) -> Self {
        Self { config, monitor }
    }

    /// TTL for `feature` given the current activity of its domain.
    ///
    /// Never fails: a feature without a table gets the global default.
    pub fn resolve_ttl(&self, feature: &str) -> Duration {
        self.resolve(feature).ttl
    }

    pub fn resolve(&self, feature: &str) -> ResolvedTtl {
        match self.config.features.get(feature) {
            Some(policy) => {
                let tier = self.monitor.current_tier(&policy.domain);
                ResolvedTtl {
                    tier: Some(tier),
                    ttl: policy.ttls.get(tier),
                }
            }
            None => ResolvedTtl {
                tier: None,
                ttl: self.config.default_ttl,
            },
        }
    }

    /// The configured TTL for `feature` at a given tier, independent of
    /// current activity.
    pub fn ttl_for_tier(&self, feature: &str, tier: ActivityTier) -> Duration {
        self.config
            .features
            .get(feature)
            .map_or(self.config.default_ttl, |policy| policy.ttls.get(tier))
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    pub fn monitor(&self) -> &Arc<ActivityMonitor> {
        &self.monitor
    }

    /// Every configured feature with its domain and TTL table, sorted by name.
    pub fn table(&self) -> Vec<(String, ActivityDomain, TierTtls)> {
        let mut rows: Vec<_> = self
            .config
            .features
            .iter()
            .map(|(name, policy)| (name.clone(), policy.domain.clone(), policy.ttls))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use time::Duration as TimeDuration;

    use super::*;
    use crate::activity::clock::ManualClock;
    use crate::activity::config::{ActivityConfig, FeaturePolicy};

    fn policy() -> (Arc<ManualClock>, AdaptiveTtlPolicy) {
        let clock = Arc::new(ManualClock::default());
        let monitor = Arc::new(ActivityMonitor::new(ActivityConfig::default(), clock.clone()));
        (clock, AdaptiveTtlPolicy::new(TtlConfig::default(), monitor))
    }

    #[test]
    fn unconfigured_feature_gets_default() {
        let (_clock, policy) = policy();
        let resolved = policy.resolve("leaderboard");
        assert_eq!(resolved.tier, None);
        assert_eq!(resolved.ttl, Duration::from_secs(300));
        assert_eq!(
            policy.ttl_for_tier("leaderboard", ActivityTier::Dormant),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn ttl_is_monotonic_for_every_feature() {
        let (_clock, policy) = policy();
        for (feature, _, _) in policy.table() {
            let ttls = ActivityTier::ALL.map(|tier| policy.ttl_for_tier(&feature, tier));
            assert!(
                ttls.windows(2).all(|pair| pair[0] <= pair[1]),
                "{feature}: {ttls:?}"
            );
        }
    }

    #[test]
    fn busy_tags_shorten_trending_ttl() {
        let (_clock, policy) = policy();
        for _ in 0..15 {
            policy.monitor().record_now(&ActivityDomain::TAGS);
        }
        let resolved = policy.resolve(TtlConfig::TRENDING_TAGS);
        assert_eq!(resolved.tier, Some(ActivityTier::High));
        assert_eq!(resolved.ttl.as_secs(), 300);
    }

    #[test]
    fn moderate_tags_use_medium_ttl() {
        let (_clock, policy) = policy();
        for _ in 0..2 {
            policy.monitor().record_now(&ActivityDomain::TAGS);
        }
        assert_eq!(policy.resolve_ttl(TtlConfig::TRENDING_TAGS).as_secs(), 1_800);
    }

    #[test]
    fn dormancy_takes_precedence_over_stale_rate() {
        let clock = Arc::new(ManualClock::default());
        let mut activity = ActivityConfig::default();
        // A window long enough that old events still produce a rate.
        let tags = activity.domains.get_mut(&ActivityDomain::TAGS).unwrap();
        tags.window = Duration::from_secs(48 * 3_600);
        let monitor = Arc::new(ActivityMonitor::new(activity, clock.clone()));
        let policy = AdaptiveTtlPolicy::new(TtlConfig::default(), monitor);

        for _ in 0..500 {
            policy.monitor().record_now(&ActivityDomain::TAGS);
        }
        clock.advance(TimeDuration::hours(25));

        assert!(policy.monitor().current_rate(&ActivityDomain::TAGS) >= 10.0);
        assert_eq!(
            policy.resolve_ttl(TtlConfig::TRENDING_TAGS).as_secs(),
            2_592_000
        );
    }

    #[test]
    fn feature_follows_its_own_domain() {
        let clock = Arc::new(ManualClock::default());
        let monitor = Arc::new(ActivityMonitor::new(ActivityConfig::default(), clock));
        let mut features = HashMap::new();
        features.insert(
            "polls".to_string(),
            FeaturePolicy {
                domain: ActivityDomain::new("polls"),
                ttls: TierTtls::from_secs(1, 2, 3, 4, 5),
            },
        );
        let policy = AdaptiveTtlPolicy::new(
            TtlConfig {
                features,
                default_ttl: Duration::from_secs(9),
            },
            monitor,
        );

        for _ in 0..20 {
            policy.monitor().record_now(&ActivityDomain::TAGS);
        }
        assert_eq!(policy.resolve_ttl("polls").as_secs(), 4);

        for _ in 0..20 {
            policy.monitor().record_now(&ActivityDomain::new("polls"));
        }
        assert_eq!(policy.resolve_ttl("polls").as_secs(), 1);
    }
}
