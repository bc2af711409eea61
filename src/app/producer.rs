use crate::domain::Metric;
use parking_lot::RwLock;
use std::sync::Arc;

/// Source of metric snapshots, read once per export cycle.
pub trait MetricProducer: Send + Sync {
    fn get_metrics(&self) -> Vec<Metric>;
}

impl<F> MetricProducer for F
where
    F: Fn() -> Vec<Metric> + Send + Sync,
{
    fn get_metrics(&self) -> Vec<Metric> {
        self()
    }
}

/// Producer backed by a snapshot that the owner replaces wholesale.
#[derive(Debug, Clone, Default)]
pub struct SnapshotProducer {
    metrics: Arc<RwLock<Vec<Metric>>>,
}

impl SnapshotProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, metrics: Vec<Metric>) {
        *self.metrics.write() = metrics;
    }
}

impl MetricProducer for SnapshotProducer {
    fn get_metrics(&self) -> Vec<Metric> {
        self.metrics.read().clone()
    }
}

/// Collects from every producer in order.
pub fn gather(producers: &[Arc<dyn MetricProducer>]) -> Vec<Metric> {
    producers.iter().flat_map(|p| p.get_metrics()).collect()
}
