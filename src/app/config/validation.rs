use super::{ConfigError, Options};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

const INSTRUMENTATION_KEY_PATTERN: &str =
    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";

fn instrumentation_key_pattern() -> Result<&'static Regex, ConfigError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(INSTRUMENTATION_KEY_PATTERN))
        .as_ref()
        .map_err(|e| ConfigError::InvalidConfig(format!("Instrumentation key pattern: {e}")))
}

/// Instrumentation keys are GUIDs.
pub fn validate_instrumentation_key(key: &str) -> Result<(), ConfigError> {
    if key.trim().is_empty() {
        return Err(ConfigError::InvalidInstrumentationKey(
            "Instrumentation key cannot be empty".to_string(),
        ));
    }
    if !instrumentation_key_pattern()?.is_match(key) {
        return Err(ConfigError::InvalidInstrumentationKey(format!(
            "'{key}' is not a valid GUID"
        )));
    }
    Ok(())
}

impl Options {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_instrumentation_key(self.instrumentation_key.as_deref().unwrap_or_default())?;

        let endpoint = Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint must be http(s), got '{}'",
                self.endpoint
            )));
        }

        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max batch size must be at least 1".to_string(),
            ));
        }

        if self.export_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Export interval must be greater than 0".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if self.enable_local_storage && self.storage_maintenance_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Storage maintenance period must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(validate_instrumentation_key("1aB0cdef-1234-4567-89ab-0123456789AB").is_ok());
    }

    #[test]
    fn test_invalid_keys() {
        let keys = [
            "",
            "   ",
            "not-a-guid",
            "1234567-1234-1234-1234-123456789012",
            "g0000000-0000-0000-0000-000000000000",
        ];
        for key in keys {
            assert!(
                matches!(
                    validate_instrumentation_key(key),
                    Err(ConfigError::InvalidInstrumentationKey(_))
                ),
                "key {key:?}"
            );
        }
    }
}
