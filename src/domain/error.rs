use thiserror::Error;

/// Top-level error type for the exporter.
///
/// Only configuration and startup problems surface here; delivery and
/// storage failures are resolved inside the pipeline.
#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("HTTP client error: {0}")]
    Client(#[from] crate::sender::ClientError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::reliability::StorageError),
}
