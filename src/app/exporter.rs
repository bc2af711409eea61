use super::config::Options;
use crate::buffer::{Batch, Batcher};
use crate::converter::MetricConverter;
use crate::domain::{ExporterError, Metric};
use crate::reliability::RetryStore;
use crate::sender::{
    BatchTransmitter, HttpClient, ProcessorChain, Transmit, TransmissionStats, TransportOutcome,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which pipeline an exporter belongs to. The self-monitoring pipeline is
/// cancelled on shutdown and stops for good on the shutdown signal; the
/// primary one flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterKind {
    Primary,
    SelfMonitoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterState {
    Idle,
    Exporting,
    ShuttingDown,
}

/// What happened to the batches of one export cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub envelopes: usize,
    pub batches: usize,
    pub delivered: usize,
    pub stored: usize,
    pub dropped: usize,
    pub filtered: usize,
    pub retried_from_storage: usize,
    pub shutdown_signalled: bool,
}

/// Gathers, batches and delivers metrics; failed batches go to the retry
/// store.
pub struct MetricsExporter<T: Transmit = BatchTransmitter> {
    kind: ExporterKind,
    converter: MetricConverter,
    batcher: Batcher,
    processors: ProcessorChain,
    transmitter: T,
    storage: Option<Arc<RetryStore>>,
    minimum_retry_interval: Duration,
    state: Mutex<ExporterState>,
    remote_shutdown: AtomicBool,
}

impl MetricsExporter<BatchTransmitter> {
    /// Primary exporter talking HTTP to the configured endpoint.
    pub async fn new(options: &Options, stats: Arc<TransmissionStats>) -> Result<Self, ExporterError> {
        options.validate()?;
        let client = HttpClient::new(options.client_config())?;
        let transmitter = BatchTransmitter::new(client, stats);
        Self::with_transmitter(options, ExporterKind::Primary, transmitter).await
    }
}

impl<T: Transmit> MetricsExporter<T> {
    /// Builds an exporter around any transmitter. Configuration is
    /// validated here and never at export time.
    pub async fn with_transmitter(
        options: &Options,
        kind: ExporterKind,
        transmitter: T,
    ) -> Result<Self, ExporterError> {
        options.validate()?;
        let batcher = Batcher::new(options.max_batch_size)?;
        let ikey = options.instrumentation_key()?;

        let storage = if options.enable_local_storage {
            Some(Arc::new(RetryStore::new(options.storage_config()).await?))
        } else {
            None
        };

        Ok(Self {
            kind,
            converter: MetricConverter::new(ikey, kind == ExporterKind::SelfMonitoring),
            batcher,
            processors: ProcessorChain::new(),
            transmitter,
            storage,
            minimum_retry_interval: options.minimum_retry_interval(),
            state: Mutex::new(ExporterState::Idle),
            remote_shutdown: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> ExporterKind {
        self.kind
    }

    pub fn state(&self) -> ExporterState {
        *self.state.lock()
    }

    /// Registration point for telemetry processors.
    pub fn processors(&self) -> &ProcessorChain {
        &self.processors
    }

    pub fn storage(&self) -> Option<&Arc<RetryStore>> {
        self.storage.as_ref()
    }

    pub fn transmitter(&self) -> &T {
        &self.transmitter
    }

    /// True once the ingestion service told this exporter to stop.
    pub fn is_remotely_shut_down(&self) -> bool {
        self.remote_shutdown.load(Ordering::Acquire)
    }

    /// Idle -> Exporting -> Idle. Skipped once shutdown has begun.
    pub async fn run_cycle(&self, metrics: &[Metric]) -> Option<CycleReport> {
        {
            let mut state = self.state.lock();
            if *state != ExporterState::Idle {
                return None;
            }
            *state = ExporterState::Exporting;
        }

        let report = self.export_metrics(metrics).await;

        let mut state = self.state.lock();
        if *state == ExporterState::Exporting {
            *state = ExporterState::Idle;
        }
        Some(report)
    }

    /// Moves to the terminal state; an in-flight cycle still completes.
    pub fn begin_shutdown(&self) {
        *self.state.lock() = ExporterState::ShuttingDown;
    }

    /// One full export: convert, batch, process, transmit, store failures,
    /// then drain storage when this cycle left headroom.
    pub async fn export_metrics(&self, metrics: &[Metric]) -> CycleReport {
        let mut report = CycleReport::default();
        if self.is_remotely_shut_down() {
            report.shutdown_signalled = true;
            return report;
        }

        let envelopes = self.converter.convert_all(metrics);
        report.envelopes = envelopes.len();

        let batches = self.batcher.batches(envelopes);
        report.batches = batches.len();

        for batch in batches {
            let Some(batch) = self.processors.apply(batch) else {
                report.filtered += 1;
                continue;
            };

            let outcome = self.transmitter.transmit(&batch).await;
            if !self.handle_outcome(&batch, outcome, &mut report).await {
                return report;
            }
        }

        if report.envelopes < self.batcher.max_size() {
            self.transmit_from_storage(&mut report).await;
        }

        debug!("Export cycle finished: {report:?}");
        report
    }

    /// Returns `false` when the cycle must stop.
    async fn handle_outcome(
        &self,
        batch: &Batch,
        outcome: TransportOutcome,
        report: &mut CycleReport,
    ) -> bool {
        match outcome {
            TransportOutcome::Success => report.delivered += 1,
            TransportOutcome::Retryable | TransportOutcome::Redirect(_) => {
                match &self.storage {
                    Some(storage) => {
                        if storage.put(batch, self.minimum_retry_interval).await.is_some() {
                            report.stored += 1;
                        } else {
                            report.dropped += 1;
                        }
                    }
                    None => {
                        debug!("Local storage disabled, dropping batch {}", batch.id());
                        report.dropped += 1;
                    }
                }
            }
            TransportOutcome::NonRetryable => report.dropped += 1,
            TransportOutcome::SpecialShutdown => return self.on_shutdown_signal(report),
        }
        true
    }

    fn on_shutdown_signal(&self, report: &mut CycleReport) -> bool {
        if self.kind == ExporterKind::SelfMonitoring {
            info!("Ingestion requested self-monitoring shutdown");
            self.remote_shutdown.store(true, Ordering::Release);
            report.shutdown_signalled = true;
            false
        } else {
            warn!("Ignoring self-monitoring shutdown signal on the primary exporter");
            report.dropped += 1;
            true
        }
    }

    async fn transmit_from_storage(&self, report: &mut CycleReport) {
        let Some(storage) = &self.storage else {
            return;
        };

        // Failed records are held back until the drain ends, so each stored
        // record is attempted at most once per cycle.
        let budget = storage.len().await;
        let mut requeue = Vec::new();
        for _ in 0..budget {
            let Some(record) = storage.get().await else {
                break;
            };
            report.retried_from_storage += 1;

            match self.transmitter.transmit(&record.batch).await {
                TransportOutcome::Success => report.delivered += 1,
                TransportOutcome::Retryable | TransportOutcome::Redirect(_) => requeue.push(record),
                TransportOutcome::NonRetryable => report.dropped += 1,
                TransportOutcome::SpecialShutdown => {
                    if !self.on_shutdown_signal(report) {
                        break;
                    }
                }
            }
        }

        for record in requeue {
            if storage.requeue(&record, self.minimum_retry_interval).await.is_some() {
                report.stored += 1;
            } else {
                report.dropped += 1;
            }
        }
    }
}

impl<T: Transmit> std::fmt::Debug for MetricsExporter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("max_batch_size", &self.batcher.max_size())
            .field("storage", &self.storage.is_some())
            .finish()
    }
}
