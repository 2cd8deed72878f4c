//! Platform activity measurement and the adaptive TTL policy built on it.
//!
//! [`ActivityMonitor`] keeps a rolling window of event counts per domain and
//! classifies each domain into an [`ActivityTier`](crate::domain::types::ActivityTier).
//! [`AdaptiveTtlPolicy`] turns a feature's tier into the TTL its cached
//! results are stored with.

mod clock;
mod config;
mod monitor;
mod policy;
mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ActivityConfig, DomainActivityConfig, FeaturePolicy, TierThresholds, TierTtls, TtlConfig,
};
pub use monitor::{ActivityMonitor, DomainActivity};
pub use policy::{AdaptiveTtlPolicy, ResolvedTtl};
pub use tier::classify;
