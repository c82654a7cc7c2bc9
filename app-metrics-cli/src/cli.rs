use std::path::PathBuf;

use app_metrics_engine::NormalizerKind;
use clap::{Parser, ValueEnum};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(
    name = "app-metrics",
    version,
    about = "Hits the metrics endpoint across all your app instances",
    long_about = "Reads an application descriptor, sends one request per running instance \
                  through the app's route pinned with the instance routing header, and prints \
                  the normalized metrics of every instance ordered by instance index."
)]
pub struct Args {
    /// Application descriptor JSON file, or `-` to read it from stdin
    #[arg(value_name = "DESCRIPTOR")]
    pub descriptor: String,

    /// Path of the metrics endpoint
    #[arg(short = 'e', long, value_name = "PATH")]
    pub endpoint: Option<String>,

    /// Format of the metrics endpoint
    #[arg(short = 'f', long, value_enum)]
    pub format: Option<NormalizerKind>,

    /// Top-level key to drop from expvar output (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "KEY")]
    pub exclude: Vec<String>,

    /// Keep the raw body when the format cannot be parsed
    #[arg(long)]
    pub raw_fallback: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, conflicts_with = "raw")]
    pub output: Option<OutputFormat>,

    /// Print compact JSON output (same as `--output json-compact`)
    #[arg(short = 'r', long)]
    pub raw: bool,

    /// Per-request timeout in seconds (0 disables it)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Give up on the whole collection after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Access token sent as the Authorization header
    #[arg(long, env = "APP_METRICS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl Args {
    /// Output format picked on the command line, if any.
    pub fn output_format(&self) -> Option<OutputFormat> {
        if self.raw {
            Some(OutputFormat::JsonCompact)
        } else {
            self.output
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Human-readable listing per instance
    #[default]
    Pretty,
    /// Pretty-printed JSON array
    Json,
    /// Single-line JSON array
    JsonCompact,
}

impl OutputFormat {
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json | Self::JsonCompact)
    }
}
