use std::io::Write;

use serial_test::serial;

use super::*;
use crate::domain::types::ActivityTier;

fn settings_from(raw: RawSettings) -> Settings {
    Settings::from_raw(raw).expect("valid settings")
}

#[test]
fn defaults_match_builtin_tables() {
    let settings = settings_from(RawSettings::default());

    assert!(settings.warnings.is_empty());
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.default_ttl_seconds, 300);
    assert_eq!(settings.cache.single_flight_wait_ms, 5_000);
    assert_eq!(settings.cache.event_queue_limit, 10_000);
    assert_eq!(settings.cache.consume_batch_limit, 100);
    assert_eq!(settings.ttl.default_ttl, Duration::from_secs(300));
    assert_eq!(settings.activity.domains.len(), 6);
    assert_eq!(
        settings.bloom.for_family("post_views").on_store_error,
        FailurePolicy::FailClosed
    );
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.cache.single_flight_wait_ms = Some(100);

    let overrides = ServeOverrides {
        log_level: Some("debug".to_string()),
        log_json: Some(true),
        cache_enabled: Some(false),
        single_flight_wait_ms: Some(250),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = settings_from(raw);

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(matches!(settings.logging.format, LogFormat::Json));
    assert!(!settings.cache.enabled);
    assert_eq!(settings.cache.single_flight_wait_ms, 250);
    // Untouched fields keep their defaults.
    assert_eq!(settings.cache.purge_interval_ms, 60_000);
}

#[test]
fn invalid_log_level_is_fatal() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());

    let err = Settings::from_raw(raw).expect_err("level should be rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));
}

#[test]
fn zero_cache_values_fall_back_with_warning() {
    let mut raw = RawSettings::default();
    raw.cache.default_ttl_seconds = Some(0);
    raw.cache.event_queue_limit = Some(0);

    let settings = settings_from(raw);

    assert_eq!(settings.cache.default_ttl_seconds, 300);
    assert_eq!(settings.cache.event_queue_limit, 10_000);
    let keys: Vec<_> = settings.warnings.iter().map(|w| w.key.as_str()).collect();
    assert!(keys.contains(&"cache.default_ttl_seconds"));
    assert!(keys.contains(&"cache.event_queue_limit"));
}

#[test]
fn default_ttl_follows_cache_section() {
    let mut raw = RawSettings::default();
    raw.cache.default_ttl_seconds = Some(42);
    let settings = settings_from(raw);
    assert_eq!(settings.ttl.default_ttl, Duration::from_secs(42));
}

#[test]
fn partial_ttl_override_keeps_builtin_tiers() {
    let mut raw = RawSettings::default();
    raw.ttl.features.insert(
        "trending_tags".to_string(),
        RawFeatureTtl {
            high: Some(120),
            ..Default::default()
        },
    );

    let settings = settings_from(raw);
    let policy = &settings.ttl.features["trending_tags"];
    assert_eq!(policy.domain, ActivityDomain::TAGS);
    assert_eq!(policy.ttls.get(ActivityTier::High).as_secs(), 120);
    assert_eq!(policy.ttls.get(ActivityTier::Dormant).as_secs(), 2_592_000);
    assert!(settings.warnings.is_empty());
}

#[test]
fn non_monotonic_ttls_keep_builtin_table() {
    let mut raw = RawSettings::default();
    raw.ttl.features.insert(
        "feed".to_string(),
        RawFeatureTtl {
            high: Some(10_000),
            ..Default::default()
        },
    );

    let settings = settings_from(raw);
    assert_eq!(
        settings.ttl.features["feed"],
        TtlConfig::builtin("feed").expect("builtin feed")
    );
    assert_eq!(settings.warnings.len(), 1);
    assert_eq!(settings.warnings[0].key, "ttl.features.feed");
}

#[test]
fn custom_feature_requires_domain_and_every_tier() {
    let mut raw = RawSettings::default();
    raw.ttl.features.insert(
        "polls".to_string(),
        RawFeatureTtl {
            domain: Some("polls".to_string()),
            high: Some(10),
            medium: Some(20),
            low: Some(30),
            very_low: Some(40),
            dormant: Some(50),
        },
    );
    raw.ttl.features.insert(
        "orphan".to_string(),
        RawFeatureTtl {
            high: Some(10),
            ..Default::default()
        },
    );
    raw.ttl.features.insert(
        "half".to_string(),
        RawFeatureTtl {
            domain: Some("posts".to_string()),
            high: Some(10),
            ..Default::default()
        },
    );

    let settings = settings_from(raw);
    let polls = &settings.ttl.features["polls"];
    assert_eq!(polls.domain.as_str(), "polls");
    assert_eq!(polls.ttls.get(ActivityTier::Dormant).as_secs(), 50);
    assert!(!settings.ttl.features.contains_key("orphan"));
    assert!(!settings.ttl.features.contains_key("half"));
    assert_eq!(settings.warnings.len(), 2);
}

#[test]
fn invalid_activity_domain_uses_builtin() {
    let mut raw = RawSettings::default();
    raw.activity.domains.insert(
        "tags".to_string(),
        RawDomainActivity {
            high: Some(1.0),
            medium: Some(5.0),
            ..Default::default()
        },
    );
    raw.activity.domains.insert(
        "polls".to_string(),
        RawDomainActivity {
            window_hours: Some(2),
            ..Default::default()
        },
    );

    let settings = settings_from(raw);
    assert_eq!(
        settings.activity.for_domain(&ActivityDomain::TAGS),
        &ActivityConfig::builtin(&ActivityDomain::TAGS).expect("builtin tags")
    );
    assert_eq!(
        settings
            .activity
            .for_domain(&ActivityDomain::new("polls"))
            .window_hours(),
        2.0
    );
    assert_eq!(settings.warnings.len(), 1);
    assert_eq!(settings.warnings[0].key, "activity.domains.tags");
}

#[test]
fn bloom_families_are_permissive() {
    let mut raw = RawSettings::default();
    raw.bloom.filters.insert(
        "post_views".to_string(),
        RawBloomFilter {
            false_positive_rate: Some(1.5),
            ..Default::default()
        },
    );
    raw.bloom.filters.insert(
        "emails".to_string(),
        RawBloomFilter {
            expected_items: Some(1_000),
            ttl_days: Some(0),
            on_store_error: Some("closed".to_string()),
            ..Default::default()
        },
    );
    raw.bloom.filters.insert(
        "username".to_string(),
        RawBloomFilter {
            on_store_error: Some("maybe".to_string()),
            ..Default::default()
        },
    );

    let settings = settings_from(raw);

    assert_eq!(
        settings.bloom.for_family("post_views"),
        &BloomConfig::builtin("post_views").expect("builtin post_views")
    );
    let emails = settings.bloom.for_family("emails");
    assert_eq!(emails.expected_items, 1_000);
    assert_eq!(emails.false_positive_rate, 0.01);
    assert_eq!(emails.ttl, None);
    assert_eq!(emails.on_store_error, FailurePolicy::FailClosed);
    assert_eq!(
        settings.bloom.for_family("username").on_store_error,
        FailurePolicy::FailOpen
    );
    assert_eq!(settings.warnings.len(), 2);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["chirp"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "chirp",
        "serve",
        "--log-level",
        "warn",
        "--cache-enabled=false",
        "--cache-single-flight-wait-ms",
        "750",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.log_level.as_deref(), Some("warn"));
            assert_eq!(serve.overrides.cache_enabled, Some(false));
            assert_eq!(serve.overrides.single_flight_wait_ms, Some(750));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_bloom_size_arguments() {
    let args = CliArgs::parse_from(["chirp", "bloom-size", "-n", "500000", "-p", "0.001"]);

    match args.command.expect("bloom-size command") {
        Command::BloomSize(sizing) => {
            assert_eq!(sizing.expected_items, Some(500_000));
            assert_eq!(sizing.false_positive_rate, Some(0.001));
            assert!(sizing.family.is_none());
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_tiers_arguments() {
    let args = CliArgs::parse_from(["chirp", "tiers", "--json"]);
    assert!(matches!(args.command, Some(Command::Tiers(TiersArgs { json: true }))));
}

#[test]
#[serial]
fn config_file_layer_is_loaded() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    writeln!(
        file,
        r#"
[cache]
single_flight_wait_ms = 1234

[ttl.features.feed]
high = 45

[bloom.filters.username]
expected_items = 1000
"#
    )
    .expect("write config");

    let path = file.path().to_string_lossy().into_owned();
    let cli = CliArgs::parse_from(["chirp", "--config-file", path.as_str()]);
    let settings = load(&cli).expect("config loads");

    assert_eq!(settings.cache.single_flight_wait_ms, 1234);
    assert_eq!(
        settings.ttl.features["feed"].ttls.get(ActivityTier::High),
        Duration::from_secs(45)
    );
    assert_eq!(settings.bloom.for_family("username").expected_items, 1000);
}

#[test]
#[serial]
fn missing_config_file_is_an_error() {
    let cli = CliArgs::parse_from(["chirp", "--config-file", "/nonexistent/chirp.toml"]);
    assert!(matches!(load(&cli), Err(LoadError::Build(_))));
}

#[test]
#[serial]
fn environment_overrides_file_defaults() {
    // SAFETY: serialized with every other test that reads the environment.
    unsafe {
        std::env::set_var("CHIRP__CACHE__CONSUME_BATCH_LIMIT", "7");
    }
    let cli = CliArgs::parse_from(["chirp"]);
    let result = load(&cli);
    unsafe {
        std::env::remove_var("CHIRP__CACHE__CONSUME_BATCH_LIMIT");
    }

    let settings = result.expect("config loads");
    assert_eq!(settings.cache.consume_batch_limit, 7);
}
