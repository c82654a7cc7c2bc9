use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid application descriptor: {0}")]
    Descriptor(#[source] serde_json::Error),

    #[error("Invalid transport settings: {0}")]
    Transport(#[from] app_metrics_engine::ConfigError),

    #[error("Unable to get metrics: {0}")]
    Collect(#[from] app_metrics_engine::CollectError),

    #[error("Failed to render output: {0}")]
    Render(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// True when the collection was interrupted; its partial batch is printed
    /// before the error is returned.
    pub fn printed_partial_batch(&self) -> bool {
        matches!(self, Self::Collect(e) if e.is_cancellation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_error_message() {
        let err = AppError::from(app_metrics_engine::CollectError::no_routes("demo"));
        assert_eq!(
            err.to_string(),
            "Unable to get metrics: app `demo` does not have any routes to hit"
        );
    }

    #[test]
    fn test_only_interrupted_collections_printed_a_batch() {
        let cancelled = AppError::from(app_metrics_engine::CollectError::Cancelled {
            partial: Vec::new(),
            expected: 3,
        });
        assert!(cancelled.printed_partial_batch());

        let deadline = AppError::from(app_metrics_engine::CollectError::DeadlineExceeded {
            deadline: std::time::Duration::from_secs(1),
            partial: Vec::new(),
            expected: 3,
        });
        assert!(deadline.printed_partial_batch());

        let no_routes = AppError::from(app_metrics_engine::CollectError::no_routes("demo"));
        assert!(!no_routes.printed_partial_batch());
        assert!(!AppError::Logging("busy".into()).printed_partial_batch());
    }

    #[test]
    fn test_read_file_message_names_path() {
        let err = AppError::read_file(
            "/nope/app.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        );
        assert_eq!(err.to_string(), "Failed to read /nope/app.json: not found");
    }
}
