use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the cache core emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "chirp_cache_hit_total",
            Unit::Count,
            "Total number of cache hits served from the backing store."
        );
        describe_counter!(
            "chirp_cache_miss_total",
            Unit::Count,
            "Total number of cache misses that led to a compute."
        );
        describe_counter!(
            "chirp_cache_coalesced_total",
            Unit::Count,
            "Total number of callers served by another caller's in-flight compute."
        );
        describe_counter!(
            "chirp_cache_store_error_total",
            Unit::Count,
            "Total number of backing-store failures on the cache path."
        );
        describe_histogram!(
            "chirp_cache_compute_ms",
            Unit::Milliseconds,
            "Latency of cache-miss compute functions in milliseconds."
        );
        describe_counter!(
            "chirp_cache_invalidated_keys_total",
            Unit::Count,
            "Total number of cache keys removed by invalidation."
        );
        describe_counter!(
            "chirp_invalidation_failed_total",
            Unit::Count,
            "Total number of invalidation patterns that could not be cleared."
        );
        describe_gauge!(
            "chirp_cache_event_queue_len",
            Unit::Count,
            "Current number of pending domain events in the queue."
        );
        describe_counter!(
            "chirp_cache_event_dropped_total",
            Unit::Count,
            "Total number of domain events dropped due to queue overflow."
        );
        describe_histogram!(
            "chirp_cache_consume_ms",
            Unit::Milliseconds,
            "Event consumption latency in milliseconds."
        );
        describe_counter!(
            "chirp_bloom_store_error_total",
            Unit::Count,
            "Total number of Bloom filter operations that hit a store failure."
        );
        describe_counter!(
            "chirp_activity_events_total",
            Unit::Count,
            "Total number of activity events recorded per domain."
        );
    });
}
