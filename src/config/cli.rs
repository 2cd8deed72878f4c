use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Chirp binary.
#[derive(Debug, Parser)]
#[command(name = "chirp", version, about = "Chirp adaptive feed cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CHIRP_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the cache core: event consumption and store maintenance.
    Serve(Box<ServeArgs>),
    /// Print the resolved TTL table per feature and the current tiers.
    Tiers(TiersArgs),
    /// Print Bloom filter sizing for an item count and false-positive rate.
    #[command(name = "bloom-size")]
    BloomSize(BloomSizeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the cache layer.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override how long followers wait on an in-flight compute.
    #[arg(long = "cache-single-flight-wait-ms", value_name = "MILLIS")]
    pub single_flight_wait_ms: Option<u64>,

    /// Override the event auto-consume interval.
    #[arg(long = "cache-auto-consume-interval-ms", value_name = "MILLIS")]
    pub auto_consume_interval_ms: Option<u64>,

    /// Override the expired-entry purge interval.
    #[arg(long = "cache-purge-interval-ms", value_name = "MILLIS")]
    pub purge_interval_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct TiersArgs {
    /// Emit JSON instead of a table.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct BloomSizeArgs {
    /// Start from a configured filter family (e.g. `username`).
    #[arg(long, value_name = "FAMILY")]
    pub family: Option<String>,

    /// Expected number of distinct items.
    #[arg(long = "expected-items", short = 'n', value_name = "COUNT")]
    pub expected_items: Option<u64>,

    /// Target false-positive rate, strictly between 0 and 1.
    #[arg(long = "false-positive-rate", short = 'p', value_name = "RATE")]
    pub false_positive_rate: Option<f64>,
}
