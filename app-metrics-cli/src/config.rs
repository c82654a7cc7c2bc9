use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use app_metrics_engine::{
    ApplicationDescriptor, CollectorConfig, DEFAULT_METRICS_PATH, DEFAULT_REQUEST_TIMEOUT,
    HttpTransportConfig, NormalizeFailurePolicy, NormalizerKind, normalizer::DEFAULT_EXCLUSIONS,
};
use serde::Deserialize;
use tracing::debug;

use crate::cli::{Args, OutputFormat};
use crate::error::{AppError, Result};

/// Settings read from the TOML config file, then overridden by flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub metrics_path: String,
    pub format: NormalizerKind,
    pub exclude: Vec<String>,
    pub raw_fallback: bool,
    pub output: OutputFormat,
    pub timeout_secs: u64,
    pub deadline_secs: Option<u64>,
    pub token: Option<String>,
    pub colored: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            metrics_path: DEFAULT_METRICS_PATH.to_owned(),
            format: NormalizerKind::default(),
            exclude: DEFAULT_EXCLUSIONS.iter().map(|key| key.to_string()).collect(),
            raw_fallback: false,
            output: OutputFormat::default(),
            timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            deadline_secs: None,
            token: None,
            colored: true,
        }
    }
}

impl AppConfig {
    /// `<config_dir>/app-metrics/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("app-metrics").join("config.toml"))
    }

    /// Load `path`, or the default file when it exists, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path().filter(|path| path.is_file()) {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration");
        let content = fs::read_to_string(path).map_err(|e| AppError::read_file(path, e))?;
        toml::from_str(&content).map_err(|source| AppError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Command-line flags win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(endpoint) = &args.endpoint {
            self.metrics_path = endpoint.clone();
        }
        if let Some(format) = args.format {
            self.format = format;
        }
        if !args.exclude.is_empty() {
            self.exclude = args.exclude.clone();
        }
        if args.raw_fallback {
            self.raw_fallback = true;
        }
        if let Some(output) = args.output_format() {
            self.output = output;
        }
        if let Some(timeout) = args.timeout {
            self.timeout_secs = timeout;
        }
        if let Some(deadline) = args.deadline {
            self.deadline_secs = Some(deadline);
        }
        if let Some(token) = &args.token {
            self.token = Some(token.clone());
        }
        if args.no_color {
            self.colored = false;
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        let config =
            HttpTransportConfig::default().with_timeout(Duration::from_secs(self.timeout_secs));
        match self.token.as_deref().filter(|token| !token.is_empty()) {
            Some(token) => config.with_authorization(token),
            None => config,
        }
    }

    pub fn collector_config(&self) -> CollectorConfig {
        let policy = if self.raw_fallback {
            NormalizeFailurePolicy::RawFallback
        } else {
            NormalizeFailurePolicy::Error
        };
        CollectorConfig::default()
            .with_metrics_path(self.metrics_path.as_str())
            .with_normalize_failure_policy(policy)
    }
}

/// Read the descriptor from a file, or from stdin when `source` is `-`.
pub fn load_descriptor(source: &str) -> Result<ApplicationDescriptor> {
    let content = if source == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(source).map_err(|e| AppError::read_file(source, e))?
    };
    parse_descriptor(&content)
}

pub fn parse_descriptor(content: &str) -> Result<ApplicationDescriptor> {
    serde_json::from_str(content).map_err(AppError::Descriptor)
}
