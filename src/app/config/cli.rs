use super::connection_string::ConnectionString;
use super::{ConfigError, LogLevel};
use crate::reliability::StorageConfig;
use crate::sender::ClientConfig;
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://dc.services.visualstudio.com";

const STATSBEAT_DISABLED_ENV: &str = "APPLICATIONINSIGHTS_STATSBEAT_DISABLED_ALL";

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Options {
    /// Instrumentation key identifying the target resource
    #[arg(long, env = "APPLICATIONINSIGHTS_INSTRUMENTATION_KEY")]
    pub instrumentation_key: Option<String>,

    /// Connection string (InstrumentationKey=...;IngestionEndpoint=...)
    #[arg(long, env = "APPLICATIONINSIGHTS_CONNECTION_STRING")]
    pub connection_string: Option<String>,

    /// Ingestion endpoint base URL
    #[arg(long, env = "RASK_EXPORTER_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Export interval in seconds
    #[arg(long, env = "EXPORT_INTERVAL_SECS", default_value = "15")]
    pub export_interval_secs: u64,

    /// Maximum number of envelopes per request
    #[arg(long, env = "MAX_BATCH_SIZE", default_value = "100")]
    pub max_batch_size: usize,

    /// Persist batches that failed transiently for a later retry
    #[arg(long, env = "ENABLE_LOCAL_STORAGE", default_value_t = true, action = ArgAction::Set)]
    pub enable_local_storage: bool,

    /// Local storage directory (defaults to a per-key temp directory)
    #[arg(long, env = "STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Local storage capacity in bytes
    #[arg(long, env = "STORAGE_MAX_SIZE", default_value = "52428800")]
    pub storage_max_size: u64,

    /// How long stored batches are kept, in seconds
    #[arg(long, env = "STORAGE_RETENTION_SECS", default_value = "604800")]
    pub storage_retention_secs: u64,

    /// Interval between storage maintenance sweeps, in seconds
    #[arg(long, env = "STORAGE_MAINTENANCE_SECS", default_value = "60")]
    pub storage_maintenance_secs: u64,

    /// Minimum delay before a stored batch is retried, in seconds
    #[arg(long, env = "MINIMUM_RETRY_INTERVAL_SECS", default_value = "60")]
    pub minimum_retry_interval_secs: u64,

    /// Network timeout per request, in seconds
    #[arg(long, env = "TIMEOUT_SECS", default_value = "10")]
    pub timeout_secs: u64,

    /// Export built-in process and host metrics
    #[arg(long, env = "ENABLE_STANDARD_METRICS", default_value_t = true, action = ArgAction::Set)]
    pub enable_standard_metrics: bool,

    /// Report exporter health through the self-monitoring pipeline
    #[arg(long, env = "ENABLE_SELF_MONITORING", default_value_t = true, action = ArgAction::Set)]
    pub enable_self_monitoring: bool,

    /// Instrumentation key for self-monitoring (defaults to the main key)
    #[arg(long, env = "SELF_MONITORING_INSTRUMENTATION_KEY")]
    pub self_monitoring_instrumentation_key: Option<String>,

    /// Ingestion endpoint for self-monitoring (defaults to the main endpoint)
    #[arg(long, env = "SELF_MONITORING_ENDPOINT")]
    pub self_monitoring_endpoint: Option<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Extra `target=level` log directives, repeatable or comma separated
    #[arg(long = "log-directive", env = "LOG_DIRECTIVES", value_delimiter = ',')]
    pub log_directives: Vec<String>,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            instrumentation_key: None,
            connection_string: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            export_interval_secs: 15,
            max_batch_size: 100,
            enable_local_storage: true,
            storage_path: None,
            storage_max_size: 50 * 1024 * 1024,
            storage_retention_secs: 7 * 24 * 3600,
            storage_maintenance_secs: 60,
            minimum_retry_interval_secs: 60,
            timeout_secs: 10,
            enable_standard_metrics: true,
            enable_self_monitoring: true,
            self_monitoring_instrumentation_key: None,
            self_monitoring_endpoint: None,
            log_level: LogLevel::Info,
            log_json: false,
            log_directives: Vec::new(),
            config_file: None,
        }
    }
}

impl Options {
    pub fn new(instrumentation_key: impl Into<String>) -> Self {
        Self {
            instrumentation_key: Some(instrumentation_key.into()),
            ..Self::default()
        }
    }

    /// Parses CLI args (env vars included). A `--config-file` replaces
    /// everything else with the file's contents.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Options::try_parse_from(args)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if let Some(config_file) = &config.config_file {
            return Self::from_file(config_file);
        }

        config.resolve()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Options = toml::from_str(content)?;
        config.resolve()
    }

    /// Applies the connection string on top of the individual options and
    /// validates the result.
    pub fn resolve(mut self) -> Result<Self, ConfigError> {
        if let Some(raw) = &self.connection_string {
            let parsed = ConnectionString::parse(raw)?;
            if let Some(key) = parsed.instrumentation_key {
                self.instrumentation_key = Some(key);
            }
            if let Some(endpoint) = parsed.ingestion_endpoint {
                self.endpoint = endpoint;
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn instrumentation_key(&self) -> Result<&str, ConfigError> {
        self.instrumentation_key.as_deref().ok_or_else(|| {
            ConfigError::InvalidInstrumentationKey("Instrumentation key not configured".to_string())
        })
    }

    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_secs)
    }

    pub fn minimum_retry_interval(&self) -> Duration {
        Duration::from_secs(self.minimum_retry_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn self_monitoring_enabled(&self) -> bool {
        self.enable_self_monitoring && std::env::var_os(STATSBEAT_DISABLED_ENV).is_none()
    }

    pub fn storage_config(&self) -> StorageConfig {
        let path = self.storage_path.clone().unwrap_or_else(|| {
            let key = self.instrumentation_key.as_deref().unwrap_or("default");
            std::env::temp_dir().join("rask-metrics-exporter").join(key)
        });

        StorageConfig {
            path,
            max_size: self.storage_max_size,
            retention_period: Duration::from_secs(self.storage_retention_secs),
            maintenance_period: Duration::from_secs(self.storage_maintenance_secs),
            ..StorageConfig::default()
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            timeout: self.timeout(),
            ..ClientConfig::default()
        }
    }
}
