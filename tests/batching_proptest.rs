use chrono::Utc;
use proptest::prelude::*;
use rask_metrics_exporter::buffer::Batcher;
use rask_metrics_exporter::converter::MetricConverter;
use rask_metrics_exporter::domain::{Envelope, Metric};

const IKEY: &str = "11111111-2222-3333-4444-555555555555";

fn envelopes(count: usize) -> Vec<Envelope> {
    let converter = MetricConverter::new(IKEY, false);
    let metrics: Vec<Metric> = (0..count)
        .map(|i| Metric::gauge(format!("metric_{i}"), i as f64, Utc::now()))
        .collect();
    converter.convert_all(&metrics)
}

proptest! {
    #[test]
    fn batches_respect_max_size_and_keep_order(count in 0usize..600, max_size in 1usize..150) {
        let input = envelopes(count);
        let batcher = Batcher::new(max_size).unwrap();
        let batches = batcher.batches(input.clone());

        prop_assert_eq!(batches.len(), count.div_ceil(max_size));
        for (i, batch) in batches.iter().enumerate() {
            prop_assert!(!batch.is_empty());
            prop_assert!(batch.size() <= max_size);
            if i + 1 < batches.len() {
                prop_assert_eq!(batch.size(), max_size);
            }
        }

        let flattened: Vec<Envelope> = batches.into_iter().flat_map(|b| b.into_envelopes()).collect();
        prop_assert_eq!(flattened, input);
    }
}
