use super::client::{HttpClient, redirect_base, track_url};
use super::stats::TransmissionStats;
use crate::buffer::Batch;
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, LOCATION};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Consecutive redirect hops followed for one batch before giving up.
pub const MAX_CONSECUTIVE_REDIRECTS: u32 = 10;

/// Failed requests tolerated by a self-monitoring exporter that has never
/// reached ingestion before it shuts itself down.
pub const STATSBEAT_FAILURE_THRESHOLD: u32 = 3;

/// Status codes showing the request reached the ingestion service.
const REACHED_INGESTION_CODES: [u16; 7] = [200, 206, 402, 408, 429, 439, 500];

/// Result of one transmission attempt. A batch succeeds or fails as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    Success,
    Retryable,
    NonRetryable,
    Redirect(Url),
    SpecialShutdown,
}

/// Capability to deliver a batch, substitutable in tests.
pub trait Transmit: Send + Sync {
    fn transmit(&self, batch: &Batch) -> impl Future<Output = TransportOutcome> + Send;
}

/// Maps an ingestion response onto the outcome taxonomy.
pub fn classify_response(status: StatusCode, headers: &HeaderMap, request_url: &Url) -> TransportOutcome {
    if status.is_success() {
        return TransportOutcome::Success;
    }

    if status.is_redirection() {
        return headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| request_url.join(location).ok())
            .map(TransportOutcome::Redirect)
            .unwrap_or(TransportOutcome::NonRetryable);
    }

    match status.as_u16() {
        408 | 429 => TransportOutcome::Retryable,
        code if status.is_server_error() => {
            debug!("Server error {code} from ingestion endpoint");
            TransportOutcome::Retryable
        }
        _ => TransportOutcome::NonRetryable,
    }
}

#[derive(Debug, Default)]
struct SelfMonitoringState {
    initial_success: AtomicBool,
    failures: AtomicU32,
}

pub struct BatchTransmitter {
    client: HttpClient,
    endpoint: RwLock<Url>,
    stats: Arc<TransmissionStats>,
    self_monitoring: Option<SelfMonitoringState>,
}

impl BatchTransmitter {
    pub fn new(client: HttpClient, stats: Arc<TransmissionStats>) -> Self {
        let endpoint = RwLock::new(client.endpoint().clone());
        Self {
            client,
            endpoint,
            stats,
            self_monitoring: None,
        }
    }

    /// Transmitter for the self-monitoring pipeline, which may receive the
    /// shutdown signal.
    pub fn self_monitoring(client: HttpClient, stats: Arc<TransmissionStats>) -> Self {
        Self {
            self_monitoring: Some(SelfMonitoringState::default()),
            ..Self::new(client, stats)
        }
    }

    /// Current ingestion endpoint, updated by followed redirects.
    pub fn endpoint(&self) -> Url {
        self.endpoint.read().clone()
    }

    pub fn stats(&self) -> &Arc<TransmissionStats> {
        &self.stats
    }

    pub async fn send_batch(&self, batch: &Batch) -> TransportOutcome {
        if batch.is_empty() {
            return TransportOutcome::Success;
        }

        let payload = match serde_json::to_vec(batch.envelopes()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize batch {}: {e}. Dropping telemetry.", batch.id());
                return TransportOutcome::NonRetryable;
            }
        };

        let mut redirects = 0;
        loop {
            match self.send_once(batch, &payload).await {
                TransportOutcome::Redirect(location) => {
                    if redirects >= MAX_CONSECUTIVE_REDIRECTS {
                        warn!(
                            "Batch {} hit {} consecutive redirects, will retry later",
                            batch.id(),
                            redirects
                        );
                        return TransportOutcome::Retryable;
                    }
                    redirects += 1;
                    let base = redirect_base(&location);
                    info!("Ingestion endpoint redirected to {base}");
                    *self.endpoint.write() = base;
                }
                outcome => return outcome,
            }
        }
    }

    async fn send_once(&self, batch: &Batch, payload: &[u8]) -> TransportOutcome {
        let url = track_url(&self.endpoint.read());
        let start = Instant::now();

        debug!("Sending batch {} with {} envelopes to {url}", batch.id(), batch.size());

        let response = self
            .client
            .client
            .post(url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/json; charset=utf-8"),
            )
            .timeout(self.client.config.timeout)
            .body(payload.to_vec())
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_exception();
                self.stats.record_request(false, start.elapsed());
                if e.is_timeout() {
                    warn!("Request timed out. Ingestion may be backed up. Retrying.");
                } else {
                    warn!("Transient error while sending batch {}: {e}. Retrying.", batch.id());
                }
                return self.check_self_monitoring_shutdown(None, TransportOutcome::Retryable);
            }
        };

        let status = response.status();
        let outcome = classify_response(status, response.headers(), &url);
        // A redirect hop is not a finished request; the followed one is counted.
        if !matches!(outcome, TransportOutcome::Redirect(_)) {
            self.stats
                .record_request(outcome == TransportOutcome::Success, start.elapsed());
        }

        match &outcome {
            TransportOutcome::Success => {
                debug!("Sent batch {} ({} envelopes)", batch.id(), batch.size());
                if let Some(state) = &self.self_monitoring {
                    state.initial_success.store(true, Ordering::Relaxed);
                }
            }
            TransportOutcome::Retryable => {
                if matches!(status.as_u16(), 429 | 439) {
                    self.stats.record_throttle();
                }
                self.stats.record_retry();
                warn!("Transient HTTP {status} for batch {}. Retrying.", batch.id());
            }
            TransportOutcome::NonRetryable => {
                if status.as_u16() == 439 {
                    self.stats.record_throttle();
                }
                let body = response.text().await.unwrap_or_default();
                warn!(
                    "Ingestion rejected batch {} with HTTP {status}: {}. Dropping telemetry.",
                    batch.id(),
                    truncate(&body, 256)
                );
            }
            TransportOutcome::Redirect(_) | TransportOutcome::SpecialShutdown => {}
        }

        self.check_self_monitoring_shutdown(Some(status), outcome)
    }

    fn check_self_monitoring_shutdown(
        &self,
        status: Option<StatusCode>,
        outcome: TransportOutcome,
    ) -> TransportOutcome {
        let Some(state) = &self.self_monitoring else {
            return outcome;
        };
        if state.initial_success.load(Ordering::Relaxed) {
            return outcome;
        }

        let reached = status.is_some_and(|s| REACHED_INGESTION_CODES.contains(&s.as_u16()));
        if reached || matches!(outcome, TransportOutcome::Redirect(_)) {
            return outcome;
        }

        let failures = state.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= STATSBEAT_FAILURE_THRESHOLD {
            warn!("Self-monitoring could not reach ingestion after {failures} attempts, shutting it down");
            TransportOutcome::SpecialShutdown
        } else {
            outcome
        }
    }
}

impl Transmit for BatchTransmitter {
    fn transmit(&self, batch: &Batch) -> impl Future<Output = TransportOutcome> + Send {
        self.send_batch(batch)
    }
}

impl std::fmt::Debug for BatchTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTransmitter")
            .field("endpoint", &*self.endpoint.read())
            .field("self_monitoring", &self.self_monitoring.is_some())
            .finish()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
