use super::config::{ConfigError, LogLevel};
use parking_lot::RwLock;
use std::sync::{Mutex, Once};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Noisy dependencies kept at `warn` regardless of the configured level.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

/// Collects `target=level` directives and installs the global subscriber.
pub struct LoggingSystem {
    directives: RwLock<Vec<String>>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: RwLock::new(Vec::new()),
        }
    }

    /// Adds a `target=level` directive. Malformed directives are skipped
    /// with a warning on stderr, since logging is not up yet.
    pub fn add_directive(&self, directive: &str) -> bool {
        let Some((target, level)) = directive.split_once('=') else {
            eprintln!("Warning: ignoring malformed log directive '{directive}'");
            return false;
        };
        if target.is_empty() || level.parse::<tracing::Level>().is_err() {
            eprintln!("Warning: ignoring invalid log directive '{directive}'");
            return false;
        }
        self.directives.write().push(directive.to_string());
        true
    }

    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in QUIET_TARGETS {
            directives.push(format!("{target}=warn"));
        }
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        std::iter::once(default_level.as_str().to_string())
            .chain(directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn initialize_tracing(&self, default_level: LogLevel, json: bool) -> Result<(), ConfigError> {
        let filter_string = self.build_filter_string(default_level);
        let env_filter = EnvFilter::try_new(&filter_string).map_err(|e| {
            ConfigError::Logging(format!("Failed to create EnvFilter with '{filter_string}': {e}"))
        })?;

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = if json {
            registry
                .with(fmt::layer().json().with_target(true).with_current_span(false))
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_target(true).with_level(true).compact())
                .try_init()
        };

        result.map_err(|e| ConfigError::Logging(format!("Failed to set global subscriber: {e}")))
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global subscriber once; later calls return the first
/// outcome. User directives apply after the defaults, so they can override
/// the quiet targets.
pub fn setup_logging(level: LogLevel, json: bool, directives: &[String]) -> Result<(), ConfigError> {
    static INIT: Once = Once::new();
    static INIT_ERROR: Mutex<Option<String>> = Mutex::new(None);

    INIT.call_once(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        for directive in directives {
            logging_system.add_directive(directive);
        }
        if let Err(e) = logging_system.initialize_tracing(level, json)
            && let Ok(mut slot) = INIT_ERROR.lock()
        {
            *slot = Some(e.to_string());
        }
    });

    match INIT_ERROR.lock() {
        Ok(slot) => match slot.as_ref() {
            Some(message) => Err(ConfigError::Logging(message.clone())),
            None => Ok(()),
        },
        Err(_) => Err(ConfigError::Logging("Logging state poisoned".to_string())),
    }
}
