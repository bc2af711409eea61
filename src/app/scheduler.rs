use super::exporter::{ExporterKind, ExporterState, MetricsExporter};
use super::producer::{MetricProducer, gather};
use crate::sender::{BatchTransmitter, Transmit};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns the periodic export task of one exporter. `shutdown` must be
/// called once at teardown; repeated calls are no-ops.
pub struct ExporterHandle<T: Transmit + 'static = BatchTransmitter> {
    exporter: Arc<MetricsExporter<T>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl<T: Transmit + 'static> ExporterHandle<T> {
    /// Starts the export loop and, when local storage is enabled, the
    /// storage maintenance loop. The first export happens one interval
    /// after start.
    pub fn start(
        exporter: Arc<MetricsExporter<T>>,
        producers: Vec<Arc<dyn MetricProducer>>,
        interval: Duration,
    ) -> Self {
        if let Some(storage) = exporter.storage() {
            storage.start_maintenance();
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::export_loop(
            exporter.clone(),
            producers,
            interval,
            cancel.clone(),
        ));

        info!(
            "Started {:?} exporter with a {:?} export interval",
            exporter.kind(),
            interval
        );

        Self {
            exporter,
            cancel,
            task: Mutex::new(Some(task)),
            shut_down: AtomicBool::new(false),
        }
    }

    async fn export_loop(
        exporter: Arc<MetricsExporter<T>>,
        producers: Vec<Arc<dyn MetricProducer>>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let metrics = gather(&producers);
            match exporter.kind() {
                // Let the cycle run to completion; shutdown waits for it.
                ExporterKind::Primary => {
                    exporter.run_cycle(&metrics).await;
                }
                ExporterKind::SelfMonitoring => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("Self-monitoring cycle abandoned on shutdown");
                            return;
                        }
                        _ = exporter.run_cycle(&metrics) => {}
                    }
                }
            }

            if exporter.is_remotely_shut_down() {
                info!("Export loop stopped by ingestion shutdown signal");
                exporter.begin_shutdown();
                return;
            }
        }

        if exporter.kind() == ExporterKind::Primary {
            debug!("Flushing metrics before shutdown");
            let metrics = gather(&producers);
            exporter.export_metrics(&metrics).await;
        }
    }

    pub fn exporter(&self) -> &Arc<MetricsExporter<T>> {
        &self.exporter
    }

    pub fn state(&self) -> ExporterState {
        self.exporter.state()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stops the loop (flushing for the primary exporter, cancelling for
    /// the self-monitoring one) and closes the retry store. Blocks until
    /// both are done. Returns `false` if shutdown already happened.
    pub async fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Exporter already shut down");
            return false;
        }

        info!("Shutting down {:?} exporter", self.exporter.kind());
        self.exporter.begin_shutdown();
        self.cancel.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("Export task ended abnormally: {e}");
        }

        if let Some(storage) = self.exporter.storage() {
            storage.close().await;
        }

        info!("{:?} exporter stopped", self.exporter.kind());
        true
    }
}

impl<T: Transmit + 'static> Drop for ExporterHandle<T> {
    fn drop(&mut self) {
        // Without an explicit shutdown the loop is cancelled without a flush.
        if !self.is_shut_down() {
            self.cancel.cancel();
        }
    }
}

impl<T: Transmit + 'static> std::fmt::Debug for ExporterHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterHandle")
            .field("exporter", &self.exporter)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
