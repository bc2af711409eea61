use reqwest::{Client, ClientBuilder, redirect};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const TRACK_PATH: &str = "v2.1/track";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://dc.services.visualstudio.com".to_string(),
            timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            user_agent: format!("rask-metrics-exporter/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Thin reqwest wrapper. Redirects are never followed automatically; the
/// transmitter owns that decision.
#[derive(Debug, Clone)]
pub struct HttpClient {
    pub client: Client,
    pub config: ClientConfig,
    endpoint_url: Url,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint_url = parse_endpoint(&config.endpoint)?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .user_agent(&config.user_agent)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            endpoint_url,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint_url
    }
}

pub fn parse_endpoint(endpoint: &str) -> Result<Url, ClientError> {
    let url: Url = endpoint
        .parse()
        .map_err(|e| ClientError::InvalidConfiguration(format!("Invalid endpoint URL: {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ClientError::InvalidConfiguration(format!(
            "Unsupported endpoint scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

/// `<endpoint>/v2.1/track`, keeping any path prefix of the endpoint.
pub fn track_url(endpoint: &Url) -> Url {
    let mut url = endpoint.clone();
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{path}/{TRACK_PATH}"));
    url.set_query(None);
    url
}

/// Scheme, host and port of a redirect target; the track path is appended
/// per request.
pub fn redirect_base(location: &Url) -> Url {
    let mut base = location.clone();
    base.set_path("");
    base.set_query(None);
    base.set_fragment(None);
    base
}
