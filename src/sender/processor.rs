use crate::buffer::Batch;
use crate::domain::Envelope;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// A batch mutation hook run before transmission.
///
/// Returning `false` drops the whole batch; it is then neither sent nor
/// stored.
pub trait TelemetryProcessor: Send + Sync {
    fn process(&self, envelopes: &mut Vec<Envelope>) -> bool;
}

impl<F> TelemetryProcessor for F
where
    F: Fn(&mut Vec<Envelope>) -> bool + Send + Sync,
{
    fn process(&self, envelopes: &mut Vec<Envelope>) -> bool {
        self(envelopes)
    }
}

/// Ordered, shareable list of processors. Clones share registrations.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Arc<RwLock<Vec<Arc<dyn TelemetryProcessor>>>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<P>(&self, processor: P)
    where
        P: TelemetryProcessor + 'static,
    {
        self.processors.write().push(Arc::new(processor));
    }

    pub fn clear(&self) {
        self.processors.write().clear();
    }

    pub fn len(&self) -> usize {
        self.processors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.read().is_empty()
    }

    /// Runs every processor in registration order. `None` means the batch
    /// was dropped, either explicitly or because nothing is left in it.
    pub fn apply(&self, mut batch: Batch) -> Option<Batch> {
        let processors = self.processors.read().clone();

        for processor in &processors {
            if !processor.process(batch.envelopes_mut()) {
                debug!("Batch {} dropped by telemetry processor", batch.id());
                return None;
            }
        }

        if batch.is_empty() {
            debug!("Batch {} emptied by telemetry processors", batch.id());
            return None;
        }

        Some(batch)
    }
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("processors", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetricData;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn batch(n: usize) -> Batch {
        Batch::new(
            (0..n)
                .map(|_| {
                    Envelope::metric(
                        "ikey",
                        "test",
                        Utc::now(),
                        BTreeMap::new(),
                        MetricData::new(Vec::new(), BTreeMap::new()),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_processors_run_in_order() {
        let chain = ProcessorChain::new();
        chain.add(|envs: &mut Vec<Envelope>| {
            for e in envs.iter_mut() {
                e.tags.insert("step".to_string(), "one".to_string());
            }
            true
        });
        chain.add(|envs: &mut Vec<Envelope>| {
            for e in envs.iter_mut() {
                let prev = e.tags.get("step").cloned().unwrap_or_default();
                e.tags.insert("step".to_string(), format!("{prev}-two"));
            }
            true
        });

        let out = chain.apply(batch(2)).unwrap();
        assert!(out.envelopes().iter().all(|e| e.tags["step"] == "one-two"));
    }

    #[test]
    fn test_processor_can_drop_batch() {
        let chain = ProcessorChain::new();
        chain.add(|_: &mut Vec<Envelope>| false);
        assert!(chain.apply(batch(3)).is_none());
    }

    #[test]
    fn test_emptied_batch_is_dropped() {
        let chain = ProcessorChain::new();
        chain.add(|envs: &mut Vec<Envelope>| {
            envs.clear();
            true
        });
        assert!(chain.apply(batch(3)).is_none());
    }

    #[test]
    fn test_empty_chain_passes_through() {
        let chain = ProcessorChain::new();
        let b = batch(1);
        let id = b.id().to_string();
        assert_eq!(chain.apply(b).unwrap().id(), id);
    }
}
