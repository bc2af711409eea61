use super::config::Options;
use super::exporter::MetricsExporter;
use super::producer::MetricProducer;
use super::scheduler::ExporterHandle;
use super::standard_metrics::StandardMetricsProducer;
use super::statsbeat::StatsbeatFactory;
use crate::domain::ExporterError;
use crate::sender::{ProcessorChain, TransmissionStats};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// The running exporter: the primary pipeline plus, when enabled, the
/// self-monitoring pipeline reporting on it.
pub struct Pipeline {
    primary: ExporterHandle,
    stats: Arc<TransmissionStats>,
    statsbeat: Option<StatsbeatFactory>,
    shut_down: AtomicBool,
}

impl Pipeline {
    /// Builds and starts both pipelines. Producers are read in the given
    /// order, after the built-in standard metrics when those are enabled.
    pub async fn start(
        options: &Options,
        producers: Vec<Arc<dyn MetricProducer>>,
    ) -> Result<Self, ExporterError> {
        let stats = Arc::new(TransmissionStats::new());
        let exporter = MetricsExporter::new(options, stats.clone()).await?;

        let mut all_producers: Vec<Arc<dyn MetricProducer>> = Vec::with_capacity(producers.len() + 1);
        if options.enable_standard_metrics {
            all_producers.push(Arc::new(StandardMetricsProducer::new()));
        }
        all_producers.extend(producers);

        info!(
            "Starting metrics pipeline ({} producers, batch size {}, storage {})",
            all_producers.len(),
            options.max_batch_size,
            options.enable_local_storage
        );

        let primary = ExporterHandle::start(Arc::new(exporter), all_producers, options.export_interval());

        let statsbeat = if options.self_monitoring_enabled() {
            let factory = StatsbeatFactory::new(options, stats.clone());
            factory.get_or_start().await;
            Some(factory)
        } else {
            debug!("Self-monitoring disabled");
            None
        };

        Ok(Self {
            primary,
            stats,
            statsbeat,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Telemetry processors applied to every fresh batch of the primary
    /// pipeline. May be extended while running.
    pub fn processors(&self) -> &ProcessorChain {
        self.primary.exporter().processors()
    }

    pub fn primary(&self) -> &ExporterHandle {
        &self.primary
    }

    pub fn stats(&self) -> &Arc<TransmissionStats> {
        &self.stats
    }

    pub fn self_monitoring_active(&self) -> bool {
        self.statsbeat.as_ref().is_some_and(StatsbeatFactory::is_started)
    }

    /// Flushes the primary pipeline, then cancels self-monitoring.
    /// Returns `false` if shutdown already happened.
    pub async fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Pipeline already shut down");
            return false;
        }

        self.primary.shutdown().await;
        if let Some(statsbeat) = &self.statsbeat {
            statsbeat.shutdown().await;
        }

        let snapshot = self.stats.snapshot();
        info!(
            "Metrics pipeline stopped (requests ok={}, failed={}, retries={})",
            snapshot.successful_requests, snapshot.failed_requests, snapshot.retries
        );
        true
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("primary", &self.primary)
            .field("statsbeat", &self.statsbeat)
            .field("shut_down", &self.shut_down.load(Ordering::Acquire))
            .finish()
    }
}
