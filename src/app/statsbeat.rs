//! Self-monitoring: the exporter reports its own request statistics
//! through a second, low-frequency pipeline.

use super::config::Options;
use super::exporter::{ExporterKind, MetricsExporter};
use super::producer::MetricProducer;
use super::scheduler::ExporterHandle;
use crate::domain::{ExporterError, Metric};
use crate::sender::{BatchTransmitter, HttpClient, TransmissionStats};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub const STATSBEAT_INTERVAL: Duration = Duration::from_secs(900);

pub const REQUEST_SUCCESS_COUNT: &str = "Request Success Count";
pub const REQUEST_FAILURE_COUNT: &str = "Requests Failure Count";
pub const REQUEST_DURATION: &str = "Request Duration";
pub const RETRY_COUNT: &str = "Retry Count";
pub const THROTTLE_COUNT: &str = "Throttle Count";
pub const EXCEPTION_COUNT: &str = "Exception Count";

/// Turns the primary pipeline's counters into gauges. Each read resets
/// the counters, so every export reports one interval's worth.
#[derive(Debug)]
pub struct StatsbeatProducer {
    stats: Arc<TransmissionStats>,
    labels: Vec<(String, String)>,
}

impl StatsbeatProducer {
    pub fn new(stats: Arc<TransmissionStats>, customer_ikey: &str, endpoint_host: &str) -> Self {
        let labels = vec![
            ("rp".to_string(), "unknown".to_string()),
            ("attach".to_string(), "Manual".to_string()),
            ("cikey".to_string(), customer_ikey.to_string()),
            ("os".to_string(), std::env::consts::OS.to_string()),
            ("language".to_string(), "rust".to_string()),
            ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
            ("host".to_string(), endpoint_host.to_string()),
        ];
        Self { stats, labels }
    }

    fn gauge(&self, name: &str, value: f64) -> Metric {
        Metric::gauge(name, value, Utc::now()).with_labels(self.labels.iter().cloned())
    }
}

impl MetricProducer for StatsbeatProducer {
    fn get_metrics(&self) -> Vec<Metric> {
        let snapshot = self.stats.take();

        let mut metrics = vec![
            self.gauge(REQUEST_SUCCESS_COUNT, snapshot.successful_requests as f64),
            self.gauge(REQUEST_DURATION, snapshot.average_duration_ms()),
        ];

        let optional = [
            (REQUEST_FAILURE_COUNT, snapshot.failed_requests),
            (RETRY_COUNT, snapshot.retries),
            (THROTTLE_COUNT, snapshot.throttles),
            (EXCEPTION_COUNT, snapshot.exceptions),
        ];
        metrics.extend(
            optional
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(name, count)| self.gauge(name, count as f64)),
        );

        metrics
    }
}

/// Lazily creates the self-monitoring pipeline on first use. A failure to
/// build it is logged once and self-monitoring stays off.
pub struct StatsbeatFactory {
    options: Options,
    stats: Arc<TransmissionStats>,
    interval: Duration,
    handle: OnceCell<Option<ExporterHandle>>,
}

impl StatsbeatFactory {
    /// `stats` are the counters of the pipeline being monitored.
    pub fn new(options: &Options, stats: Arc<TransmissionStats>) -> Self {
        Self {
            options: options.clone(),
            stats,
            interval: STATSBEAT_INTERVAL,
            handle: OnceCell::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Starts the pipeline if it is not running yet.
    pub async fn get_or_start(&self) -> Option<&ExporterHandle> {
        self.handle
            .get_or_init(|| async {
                match self.build().await {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        warn!("Self-monitoring disabled: {e}");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    pub fn is_started(&self) -> bool {
        matches!(self.handle.get(), Some(Some(_)))
    }

    /// Cancels the pipeline. Returns `false` if it never started or was
    /// already stopped.
    pub async fn shutdown(&self) -> bool {
        match self.handle.get() {
            Some(Some(handle)) => handle.shutdown().await,
            _ => false,
        }
    }

    /// Options of the self-monitoring exporter: same destination unless
    /// overridden, no local storage, no standard metrics.
    pub fn exporter_options(&self) -> Options {
        let mut options = self.options.clone();
        if let Some(key) = &self.options.self_monitoring_instrumentation_key {
            options.instrumentation_key = Some(key.clone());
        }
        if let Some(endpoint) = &self.options.self_monitoring_endpoint {
            options.endpoint = endpoint.clone();
        }
        options.connection_string = None;
        options.enable_local_storage = false;
        options.enable_standard_metrics = false;
        options.enable_self_monitoring = false;
        options.export_interval_secs = self.interval.as_secs().max(1);
        options
    }

    async fn build(&self) -> Result<ExporterHandle, ExporterError> {
        let options = self.exporter_options();
        let client = HttpClient::new(options.client_config())?;
        let host = client.endpoint().host_str().unwrap_or_default().to_string();

        // The self-monitoring pipeline does not count its own requests.
        let transmitter = BatchTransmitter::self_monitoring(client, Arc::new(TransmissionStats::new()));
        let exporter =
            MetricsExporter::with_transmitter(&options, ExporterKind::SelfMonitoring, transmitter).await?;

        let customer_ikey = self.options.instrumentation_key()?;
        let producer = StatsbeatProducer::new(self.stats.clone(), customer_ikey, &host);

        info!("Starting self-monitoring for {host}");
        Ok(ExporterHandle::start(
            Arc::new(exporter),
            vec![Arc::new(producer)],
            self.interval,
        ))
    }
}

impl std::fmt::Debug for StatsbeatFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsbeatFactory")
            .field("interval", &self.interval)
            .field("started", &self.is_started())
            .finish()
    }
}
