//! Maps metric snapshots into wire envelopes.
//!
//! Pure and stateless apart from the identity and context tags fixed at
//! construction.

mod context;

pub use context::context_tags;

use crate::domain::envelope::{METRIC_ENVELOPE_NAME, STATSBEAT_ENVELOPE_NAME};
use crate::domain::{
    DataPoint, DataPointKind, Envelope, LabelKey, LabelValue, Metric, MetricData, TimeSeries,
};
use std::collections::BTreeMap;
use tracing::debug;

const MISSING_LABEL_VALUE: &str = "null";

#[derive(Debug, Clone)]
pub struct MetricConverter {
    instrumentation_key: String,
    envelope_name: &'static str,
    tags: BTreeMap<String, String>,
}

impl MetricConverter {
    pub fn new(instrumentation_key: impl Into<String>, self_monitoring: bool) -> Self {
        Self::with_tags(instrumentation_key, self_monitoring, context_tags())
    }

    pub fn with_tags(
        instrumentation_key: impl Into<String>,
        self_monitoring: bool,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            instrumentation_key: instrumentation_key.into(),
            envelope_name: if self_monitoring {
                STATSBEAT_ENVELOPE_NAME
            } else {
                METRIC_ENVELOPE_NAME
            },
            tags,
        }
    }

    /// Converts every metric in order and concatenates the results.
    pub fn convert_all(&self, metrics: &[Metric]) -> Vec<Envelope> {
        metrics
            .iter()
            .flat_map(|metric| self.metric_to_envelopes(metric))
            .collect()
    }

    /// One envelope per time series. Distribution metrics are not supported
    /// and yield nothing.
    pub fn metric_to_envelopes(&self, metric: &Metric) -> Vec<Envelope> {
        let descriptor = &metric.descriptor;
        if descriptor.kind.is_distribution() {
            debug!(
                "Skipping distribution metric {}: histograms are not exported",
                descriptor.name
            );
            return Vec::new();
        }

        metric
            .time_series
            .iter()
            .filter_map(|series| self.series_to_envelope(&descriptor.name, &descriptor.label_keys, series))
            .collect()
    }

    fn series_to_envelope(
        &self,
        metric_name: &str,
        label_keys: &[LabelKey],
        series: &TimeSeries,
    ) -> Option<Envelope> {
        // Series produced by stats aggregation carry a single point.
        let point = series.points.first()?;
        let value = point.value.as_f64()?;

        let data_point = DataPoint {
            ns: metric_name.to_string(),
            name: metric_name.to_string(),
            kind: DataPointKind::Measurement,
            value,
        };
        let properties = create_properties(label_keys, &series.label_values);

        Some(Envelope::metric(
            &self.instrumentation_key,
            self.envelope_name,
            point.timestamp,
            self.tags.clone(),
            MetricData::new(vec![data_point], properties),
        ))
    }
}

/// Pairs label keys with label values by index. A key without a recorded
/// value maps to `"null"`; values beyond the last key are ignored.
fn create_properties(label_keys: &[LabelKey], label_values: &[LabelValue]) -> BTreeMap<String, String> {
    if label_keys.len() != label_values.len() {
        debug!(
            "Label key/value length mismatch ({} keys, {} values)",
            label_keys.len(),
            label_values.len()
        );
    }

    label_keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let value = label_values
                .get(i)
                .and_then(|v| v.value.clone())
                .unwrap_or_else(|| MISSING_LABEL_VALUE.to_string());
            (key.key.clone(), value)
        })
        .collect()
}
