use std::process;

use chirp::{
    activity::{DomainActivity, TierTtls},
    application::{CoreServices, error::AppError},
    bloom::BloomParams,
    config::{self, BloomSizeArgs, TiersArgs},
    domain::types::{ActivityDomain, ActivityTier},
    infra::{error::InfraError, telemetry},
    util::units::{format_bytes, format_duration},
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, kind = error.kind(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, kind = error.kind(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    for warning in &settings.warnings {
        warn!(key = %warning.key, reason = %warning.reason, "Configuration entry replaced by default");
    }

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Tiers(args) => run_tiers(&settings, &args),
        config::Command::BloomSize(args) => run_bloom_size(&settings, &args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let services = CoreServices::from_settings(&settings);
    let config = services.config.clone();

    let consume_handle: JoinHandle<()> = {
        let consumer = services.consumer.clone();
        let period = config.auto_consume_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                consumer.consume().await;
            }
        })
    };

    let purge_handle: JoinHandle<()> = {
        let services = services.clone();
        let period = config.purge_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                services.purge_expired();
            }
        })
    };

    info!(
        auto_consume_interval = %format_duration(config.auto_consume_interval()),
        purge_interval = %format_duration(config.purge_interval()),
        single_flight_wait_ms = config.single_flight_wait_ms,
        "Chirp cache core running; press ctrl-c to stop"
    );

    let signal = tokio::signal::ctrl_c().await;

    consume_handle.abort();
    let _ = consume_handle.await;
    purge_handle.abort();
    let _ = purge_handle.await;

    let batches = services.consumer.consume_all().await;
    info!(batches, "Drained pending cache events");

    signal.map_err(|err| AppError::from(InfraError::from(err)))
}

#[derive(Debug, Serialize)]
struct FeatureRow {
    feature: String,
    domain: ActivityDomain,
    tier: ActivityTier,
    current_ttl_seconds: u64,
    ttl_seconds: TierSeconds,
}

#[derive(Debug, Serialize)]
struct TierSeconds {
    high: u64,
    medium: u64,
    low: u64,
    very_low: u64,
    dormant: u64,
}

impl From<TierTtls> for TierSeconds {
    fn from(ttls: TierTtls) -> Self {
        Self {
            high: ttls.high.as_secs(),
            medium: ttls.medium.as_secs(),
            low: ttls.low.as_secs(),
            very_low: ttls.very_low.as_secs(),
            dormant: ttls.dormant.as_secs(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TiersReport {
    default_ttl_seconds: u64,
    features: Vec<FeatureRow>,
    domains: Vec<DomainActivity>,
}

fn run_tiers(settings: &config::Settings, args: &TiersArgs) -> Result<(), AppError> {
    let services = CoreServices::from_settings(settings);
    let policy = &services.ttl_policy;

    let features = policy
        .table()
        .into_iter()
        .map(|(feature, domain, ttls)| {
            let tier = services.monitor.current_tier(&domain);
            FeatureRow {
                current_ttl_seconds: ttls.get(tier).as_secs(),
                ttl_seconds: TierSeconds::from(ttls),
                feature,
                domain,
                tier,
            }
        })
        .collect();

    let report = TiersReport {
        default_ttl_seconds: policy.default_ttl().as_secs(),
        features,
        domains: services.monitor.snapshot(),
    };

    if args.json {
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|err| AppError::unexpected(format!("failed to render tiers: {err}")))?;
        println!("{rendered}");
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:<9} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "feature", "domain", "tier", "high", "medium", "low", "very_low", "dormant"
    );
    for row in &report.features {
        let ttls = &row.ttl_seconds;
        let cells = [ttls.high, ttls.medium, ttls.low, ttls.very_low, ttls.dormant]
            .map(|secs| format_duration(std::time::Duration::from_secs(secs)));
        println!(
            "{:<20} {:<12} {:<9} {:>8} {:>8} {:>8} {:>8} {:>8}",
            row.feature,
            row.domain.as_str(),
            row.tier.as_str(),
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            cells[4]
        );
    }
    println!(
        "default ttl for other features: {}",
        format_duration(policy.default_ttl())
    );
    Ok(())
}

fn run_bloom_size(settings: &config::Settings, args: &BloomSizeArgs) -> Result<(), AppError> {
    let base = match args.family.as_deref() {
        Some(family) => *settings.bloom.for_family(family),
        None => settings.bloom.fallback,
    };
    let expected_items = args.expected_items.unwrap_or(base.expected_items);
    let false_positive_rate = args.false_positive_rate.unwrap_or(base.false_positive_rate);

    let params = BloomParams::optimal(expected_items, false_positive_rate)
        .map_err(|err| AppError::validation(err.to_string()))?;

    println!("expected items (n):      {expected_items}");
    println!("false positive rate (p): {false_positive_rate}");
    println!("bits (m):                {}", params.bits);
    println!("hash functions (k):      {}", params.hashes);
    println!(
        "memory:                  {}",
        format_bytes(params.memory_bytes())
    );
    println!(
        "estimated rate at n:     {:.6}",
        params.estimated_false_positive_rate(expected_items)
    );
    Ok(())
}
