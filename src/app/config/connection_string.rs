use super::ConfigError;

/// Parsed `Key=Value;Key=Value` connection string. Keys are matched
/// case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub instrumentation_key: Option<String>,
    pub ingestion_endpoint: Option<String>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut parsed = ConnectionString::default();

        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ConfigError::InvalidConfig(format!(
                    "Malformed connection string segment '{pair}'"
                )));
            };
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "instrumentationkey" => parsed.instrumentation_key = Some(value),
                "ingestionendpoint" => parsed.ingestion_endpoint = Some(value),
                _ => {}
            }
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection_string() {
        let cs = ConnectionString::parse(
            "InstrumentationKey=00000000-0000-0000-0000-000000000001;IngestionEndpoint=https://westus-0.example.com/;Other=x",
        )
        .unwrap();
        assert_eq!(
            cs.instrumentation_key.as_deref(),
            Some("00000000-0000-0000-0000-000000000001")
        );
        assert_eq!(cs.ingestion_endpoint.as_deref(), Some("https://westus-0.example.com/"));
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let cs = ConnectionString::parse("instrumentationkey=abc").unwrap();
        assert_eq!(cs.instrumentation_key.as_deref(), Some("abc"));
        assert_eq!(cs.ingestion_endpoint, None);
    }

    #[test]
    fn test_malformed_segment() {
        assert!(ConnectionString::parse("InstrumentationKey").is_err());
    }
}
