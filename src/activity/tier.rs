use crate::domain::types::ActivityTier;

use super::config::TierThresholds;

/// Classify a domain's activity.
///
/// Dormancy wins over rate: a domain idle for longer than `dormant_after_hours`
/// is dormant even if stale events still produce a non-zero rate. Otherwise
/// the first threshold the rate meets (inclusive) picks the tier, and a rate
/// below every threshold is `VeryLow` until the dormancy period elapses.
pub fn classify(
    rate: f64,
    hours_since_last_event: f64,
    dormant_after_hours: f64,
    thresholds: &TierThresholds,
) -> ActivityTier {
    if hours_since_last_event > dormant_after_hours {
        return ActivityTier::Dormant;
    }

    if rate >= thresholds.high {
        ActivityTier::High
    } else if rate >= thresholds.medium {
        ActivityTier::Medium
    } else if rate >= thresholds.low {
        ActivityTier::Low
    } else {
        ActivityTier::VeryLow
    }
}
