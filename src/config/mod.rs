//! Configuration layer: typed settings with layered precedence (file → env → CLI).
//!
//! Logging settings are strict: an invalid value aborts startup. The caching
//! sections (`cache`, `activity`, `ttl`, `bloom`) are permissive: an invalid
//! entry falls back to its built-in default and is reported as a
//! [`ConfigWarning`] so the process still starts with safe TTLs.

use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::activity::{
    ActivityConfig, DomainActivityConfig, FeaturePolicy, TierThresholds, TierTtls, TtlConfig,
};
use crate::bloom::{BloomConfig, BloomFamilyConfig, FailurePolicy};
use crate::domain::types::ActivityDomain;

mod cli;

pub use cli::{BloomSizeArgs, CliArgs, Command, ServeArgs, ServeOverrides, TiersArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "chirp";
const ENV_PREFIX: &str = "CHIRP";

const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_SINGLE_FLIGHT_WAIT_MS: u64 = 5_000;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 10_000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 1_000;
const DEFAULT_PURGE_INTERVAL_MS: u64 = 60_000;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Fully-resolved deployment settings after precedence resolution and validation.
///
/// `Default` yields the built-in tables without reading any source.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub activity: ActivityConfig,
    pub ttl: TtlConfig,
    pub bloom: BloomConfig,
    /// Entries that were replaced by their defaults.
    pub warnings: Vec<ConfigWarning>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl_seconds: u64,
    pub single_flight_wait_ms: u64,
    pub event_queue_limit: usize,
    pub consume_batch_limit: usize,
    pub auto_consume_interval_ms: u64,
    pub purge_interval_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: DEFAULT_CACHE_TTL_SECS,
            single_flight_wait_ms: DEFAULT_SINGLE_FLIGHT_WAIT_MS,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            auto_consume_interval_ms: DEFAULT_AUTO_CONSUME_INTERVAL_MS,
            purge_interval_ms: DEFAULT_PURGE_INTERVAL_MS,
        }
    }
}

/// A caching entry that was rejected and replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub reason: String,
}

impl ConfigWarning {
    fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` ignored: {}", self.key, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    if let Some(Command::Serve(args)) = cli.command.as_ref() {
        raw.apply_serve_overrides(&args.overrides);
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    activity: RawActivitySettings,
    ttl: RawTtlSettings,
    bloom: RawBloomSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(wait) = overrides.single_flight_wait_ms {
            self.cache.single_flight_wait_ms = Some(wait);
        }
        if let Some(interval) = overrides.auto_consume_interval_ms {
            self.cache.auto_consume_interval_ms = Some(interval);
        }
        if let Some(interval) = overrides.purge_interval_ms {
            self.cache.purge_interval_ms = Some(interval);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            activity,
            ttl,
            bloom,
        } = raw;

        let mut warnings = Vec::new();
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache, &mut warnings);
        let activity = build_activity_config(activity, &mut warnings);
        let ttl = build_ttl_config(ttl, cache.default_ttl_seconds, &mut warnings);
        let bloom = build_bloom_config(bloom, &mut warnings);

        Ok(Self {
            logging,
            cache,
            activity,
            ttl,
            bloom,
            warnings,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings, warnings: &mut Vec<ConfigWarning>) -> CacheSettings {
    let defaults = CacheSettings::default();
    CacheSettings {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        default_ttl_seconds: positive(
            cache.default_ttl_seconds,
            defaults.default_ttl_seconds,
            "cache.default_ttl_seconds",
            warnings,
        ),
        single_flight_wait_ms: positive(
            cache.single_flight_wait_ms,
            defaults.single_flight_wait_ms,
            "cache.single_flight_wait_ms",
            warnings,
        ),
        event_queue_limit: positive(
            cache.event_queue_limit,
            defaults.event_queue_limit,
            "cache.event_queue_limit",
            warnings,
        ),
        consume_batch_limit: positive(
            cache.consume_batch_limit,
            defaults.consume_batch_limit,
            "cache.consume_batch_limit",
            warnings,
        ),
        auto_consume_interval_ms: positive(
            cache.auto_consume_interval_ms,
            defaults.auto_consume_interval_ms,
            "cache.auto_consume_interval_ms",
            warnings,
        ),
        purge_interval_ms: positive(
            cache.purge_interval_ms,
            defaults.purge_interval_ms,
            "cache.purge_interval_ms",
            warnings,
        ),
    }
}

fn build_activity_config(
    activity: RawActivitySettings,
    warnings: &mut Vec<ConfigWarning>,
) -> ActivityConfig {
    let mut config = ActivityConfig::default();

    for (name, raw) in activity.domains {
        let domain = ActivityDomain::new(name.as_str());
        let key = format!("activity.domains.{domain}");
        let base = ActivityConfig::builtin(&domain).unwrap_or_else(ActivityConfig::builtin_fallback);

        let candidate = DomainActivityConfig {
            window: raw.window_hours.map_or(base.window, hours),
            dormant_after: raw.dormant_after_hours.map_or(base.dormant_after, hours),
            bucket: raw
                .bucket_seconds
                .map_or(base.bucket, Duration::from_secs),
            thresholds: TierThresholds::new(
                raw.high.unwrap_or(base.thresholds.high),
                raw.medium.unwrap_or(base.thresholds.medium),
                raw.low.unwrap_or(base.thresholds.low),
                raw.very_low.unwrap_or(base.thresholds.very_low),
            ),
        };

        let resolved = match candidate.validate() {
            Ok(()) => candidate,
            Err(reason) => {
                warnings.push(ConfigWarning::new(key, reason));
                base
            }
        };
        config.domains.insert(domain, resolved);
    }

    config
}

fn build_ttl_config(
    ttl: RawTtlSettings,
    default_ttl_seconds: u64,
    warnings: &mut Vec<ConfigWarning>,
) -> TtlConfig {
    let mut config = TtlConfig {
        default_ttl: Duration::from_secs(default_ttl_seconds),
        ..TtlConfig::default()
    };

    for (feature, raw) in ttl.features {
        let key = format!("ttl.features.{feature}");
        let base = TtlConfig::builtin(&feature);

        let domain = raw
            .domain
            .as_deref()
            .map(ActivityDomain::new)
            .or_else(|| base.as_ref().map(|policy| policy.domain.clone()));
        let Some(domain) = domain else {
            warnings.push(ConfigWarning::new(key, "domain is required for a custom feature"));
            continue;
        };

        let fields = [raw.high, raw.medium, raw.low, raw.very_low, raw.dormant];
        let ttls = match base.as_ref() {
            Some(policy) => {
                let builtin = policy.ttls;
                TierTtls {
                    high: fields[0].map_or(builtin.high, Duration::from_secs),
                    medium: fields[1].map_or(builtin.medium, Duration::from_secs),
                    low: fields[2].map_or(builtin.low, Duration::from_secs),
                    very_low: fields[3].map_or(builtin.very_low, Duration::from_secs),
                    dormant: fields[4].map_or(builtin.dormant, Duration::from_secs),
                }
            }
            None => match fields {
                [Some(high), Some(medium), Some(low), Some(very_low), Some(dormant)] => {
                    TierTtls::from_secs(high, medium, low, very_low, dormant)
                }
                _ => {
                    warnings.push(ConfigWarning::new(
                        key,
                        "a custom feature needs a ttl for every tier",
                    ));
                    continue;
                }
            },
        };

        match ttls.validate() {
            Ok(()) => {
                config
                    .features
                    .insert(feature, FeaturePolicy { domain, ttls });
            }
            Err(reason) => {
                warnings.push(ConfigWarning::new(key, reason));
                // The built-in table, if any, is already in place.
            }
        }
    }

    config
}

fn build_bloom_config(bloom: RawBloomSettings, warnings: &mut Vec<ConfigWarning>) -> BloomConfig {
    let mut config = BloomConfig::default();

    for (family, raw) in bloom.filters {
        let key = format!("bloom.filters.{family}");
        let base = BloomConfig::builtin(&family).unwrap_or_else(BloomConfig::builtin_fallback);

        let on_store_error = match raw.on_store_error.as_deref().map(FailurePolicy::from_str) {
            None => base.on_store_error,
            Some(Ok(policy)) => policy,
            Some(Err(reason)) => {
                warnings.push(ConfigWarning::new(key, reason));
                config.families.insert(family, base);
                continue;
            }
        };

        let candidate = BloomFamilyConfig {
            expected_items: raw.expected_items.unwrap_or(base.expected_items),
            false_positive_rate: raw.false_positive_rate.unwrap_or(base.false_positive_rate),
            ttl: match raw.ttl_days {
                None => base.ttl,
                Some(0) => None,
                Some(days) => Some(Duration::from_secs(days.saturating_mul(DAY))),
            },
            on_store_error,
        };

        let resolved = match candidate.params() {
            Ok(_) => candidate,
            Err(err) => {
                warnings.push(ConfigWarning::new(key, err.to_string()));
                base
            }
        };
        config.families.insert(family, resolved);
    }

    config
}

fn positive<T>(value: Option<T>, default: T, key: &str, warnings: &mut Vec<ConfigWarning>) -> T
where
    T: Copy + PartialEq + Default,
{
    match value {
        Some(value) if value == T::default() => {
            warnings.push(ConfigWarning::new(key, "must be greater than zero"));
            default
        }
        Some(value) => value,
        None => default,
    }
}

fn hours(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(HOUR))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    default_ttl_seconds: Option<u64>,
    single_flight_wait_ms: Option<u64>,
    event_queue_limit: Option<usize>,
    consume_batch_limit: Option<usize>,
    auto_consume_interval_ms: Option<u64>,
    purge_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawActivitySettings {
    domains: HashMap<String, RawDomainActivity>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDomainActivity {
    window_hours: Option<u64>,
    dormant_after_hours: Option<u64>,
    bucket_seconds: Option<u64>,
    high: Option<f64>,
    medium: Option<f64>,
    low: Option<f64>,
    very_low: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTtlSettings {
    features: HashMap<String, RawFeatureTtl>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeatureTtl {
    domain: Option<String>,
    high: Option<u64>,
    medium: Option<u64>,
    low: Option<u64>,
    very_low: Option<u64>,
    dormant: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBloomSettings {
    filters: HashMap<String, RawBloomFilter>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBloomFilter {
    expected_items: Option<u64>,
    false_positive_rate: Option<f64>,
    ttl_days: Option<u64>,
    on_store_error: Option<String>,
}

#[cfg(test)]
mod tests;
